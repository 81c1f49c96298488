//! Per-user provider preferences and owner-controlled runtime settings.
//!
//! Preferences live in memory behind one async mutex and are written to a
//! JSON file by a periodic flush task and once more at shutdown. The file is
//! a plain object mapping user ids to provider ids.

use crate::error::SettingsError;
use crate::llm::Provider;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct PreferenceState {
    selections: HashMap<u64, Provider>,
    dirty: bool,
}

/// User id to selected provider, persisted on a best-effort schedule.
#[derive(Debug)]
pub struct PreferenceStore {
    path: PathBuf,
    state: Mutex<PreferenceState>,
}

impl PreferenceStore {
    /// An empty store that will write to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(PreferenceState::default()),
        }
    }

    /// Load preferences from `path`. A missing file is an empty store;
    /// unparseable entries are skipped.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no preference file yet, starting empty");
                return Ok(Self::empty(path));
            }
            Err(error) => {
                return Err(SettingsError::Read {
                    path: path.display().to_string(),
                    source: Arc::new(error),
                });
            }
        };

        let selections = parse_selections(&raw)?;
        tracing::info!(users = selections.len(), "loaded user preferences");

        Ok(Self {
            path,
            state: Mutex::new(PreferenceState {
                selections,
                dirty: false,
            }),
        })
    }

    pub async fn get(&self, user_id: u64) -> Option<Provider> {
        self.state.lock().await.selections.get(&user_id).copied()
    }

    /// Record a selection and mark the store dirty.
    pub async fn set(&self, user_id: u64, provider: Provider) {
        let mut state = self.state.lock().await;
        state.selections.insert(user_id, provider);
        state.dirty = true;
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.selections.len()
    }

    pub async fn is_dirty(&self) -> bool {
        self.state.lock().await.dirty
    }

    /// Write the whole map if anything changed since the last flush.
    /// Returns whether a write happened.
    pub async fn flush(&self) -> Result<bool, SettingsError> {
        let mut state = self.state.lock().await;
        if !state.dirty {
            return Ok(false);
        }

        let snapshot: BTreeMap<String, &'static str> = state
            .selections
            .iter()
            .map(|(user_id, provider)| (user_id.to_string(), provider.as_str()))
            .collect();
        let body = serde_json::to_string_pretty(&snapshot)
            .map_err(|error| SettingsError::Parse(error.to_string()))?;

        let write_error = |source: std::io::Error| SettingsError::Write {
            path: self.path.display().to_string(),
            source: Arc::new(source),
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
        }
        tokio::fs::write(&self.path, body).await.map_err(write_error)?;

        state.dirty = false;
        tracing::debug!(users = snapshot.len(), "user preferences saved");
        Ok(true)
    }

    /// Flush every `interval` until `cancel` fires.
    pub fn spawn_flush_task(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if let Err(error) = self.flush().await {
                            tracing::error!(%error, "failed to save user preferences periodically");
                        }
                    }
                }
            }
            tracing::debug!("preference flush task stopped");
        })
    }
}

fn parse_selections(raw: &str) -> Result<HashMap<u64, Provider>, SettingsError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|error| SettingsError::Parse(error.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| SettingsError::Parse(format!("expected an object, found {value}")))?;

    let mut selections = HashMap::with_capacity(object.len());
    for (key, value) in object {
        let user_id = key.parse::<u64>();
        let provider = value.as_str().map(str::parse::<Provider>);
        match (user_id, provider) {
            (Ok(user_id), Some(Ok(provider))) => {
                selections.insert(user_id, provider);
            }
            _ => tracing::warn!(%key, %value, "skipping invalid preference entry"),
        }
    }
    Ok(selections)
}

/// Settings the owner can change while the bot runs. Not persisted.
#[derive(Debug, Default)]
pub struct RuntimeSettings {
    /// Discord ids are never zero, so zero means unset.
    react_target: AtomicU64,
}

impl RuntimeSettings {
    pub fn react_target(&self) -> Option<u64> {
        match self.react_target.load(Ordering::Relaxed) {
            0 => None,
            user_id => Some(user_id),
        }
    }

    pub fn set_react_target(&self, user_id: Option<u64>) {
        self.react_target
            .store(user_id.unwrap_or(0), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::load(dir.path().join("prefs.json")).await.unwrap();
        assert_eq!(store.len().await, 0);
        assert!(!store.is_dirty().await);
    }

    #[tokio::test]
    async fn invalid_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(
            &path,
            r#"{"1": "xai", "2": "openai", "abc": "xai", "3": "anthropic", "4": 7}"#,
        )
        .unwrap();

        let store = PreferenceStore::load(&path).await.unwrap();
        assert_eq!(store.len().await, 2);
        assert_eq!(store.get(1).await, Some(Provider::Xai));
        assert_eq!(store.get(2).await, Some(Provider::OpenAi));
        assert_eq!(store.get(3).await, None);
    }

    #[tokio::test]
    async fn non_object_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(
            PreferenceStore::load(&path).await.unwrap_err(),
            SettingsError::Parse(_)
        ));
    }

    #[tokio::test]
    async fn flush_writes_only_when_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prefs.json");
        let store = PreferenceStore::empty(&path);

        assert!(!store.flush().await.unwrap());
        assert!(!path.exists());

        store.set(42, Provider::Xai).await;
        assert!(store.is_dirty().await);
        assert!(store.flush().await.unwrap());
        assert!(!store.is_dirty().await);
        assert!(!store.flush().await.unwrap());

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, serde_json::json!({"42": "xai"}));

        let reloaded = PreferenceStore::load(&path).await.unwrap();
        assert_eq!(reloaded.get(42).await, Some(Provider::Xai));
    }

    #[tokio::test]
    async fn flush_task_persists_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        let store = Arc::new(PreferenceStore::empty(&path));
        let cancel = CancellationToken::new();
        let task = store
            .clone()
            .spawn_flush_task(Duration::from_millis(20), cancel.clone());

        store.set(7, Provider::OpenAi).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while store.is_dirty().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("flush task wrote preferences");

        cancel.cancel();
        task.await.unwrap();
        assert!(!store.is_dirty().await);
        assert!(path.exists());
    }

    #[test]
    fn react_target_round_trips() {
        let settings = RuntimeSettings::default();
        assert_eq!(settings.react_target(), None);
        settings.set_react_target(Some(99));
        assert_eq!(settings.react_target(), Some(99));
        settings.set_react_target(None);
        assert_eq!(settings.react_target(), None);
    }
}
