//! In-memory response cache keyed by payload fingerprint.

use moka::policy::EvictionPolicy;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Stable fingerprint of a request payload: hex SHA-256 of its JSON with
/// object keys sorted at every level.
pub fn fingerprint(payload: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(payload, &mut canonical);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Bounded LRU cache of raw provider responses.
///
/// There is no time-based expiry; entries leave only under capacity
/// pressure. Once written an entry is never replaced.
#[derive(Clone)]
pub struct ResponseCache {
    entries: moka::sync::Cache<String, Arc<Value>>,
}

impl ResponseCache {
    pub fn new(capacity: u64) -> Self {
        let entries = moka::sync::Cache::builder()
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self { entries }
    }

    pub fn get(&self, fingerprint: &str) -> Option<Arc<Value>> {
        self.entries.get(fingerprint)
    }

    /// Store a response and return the cached value. If another task wrote
    /// the same fingerprint first, that earlier value wins.
    pub fn insert(&self, fingerprint: String, response: Arc<Value>) -> Arc<Value> {
        self.entries
            .entry(fingerprint)
            .or_insert(response)
            .into_value()
    }

    /// Number of cached responses after pending maintenance has run.
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}
