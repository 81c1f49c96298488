//! HTTP transport for provider calls.
//!
//! [`Transport`] is the network seam under the dispatcher. Production code
//! uses [`ReqwestTransport`] over a shared [`HttpSession`].

use arc_swap::ArcSwapOption;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Maximum number of bytes of an error body kept for diagnostics.
pub const MAX_ERROR_BODY_BYTES: usize = 500;

/// A single JSON POST.
#[derive(Debug, Clone, Copy)]
pub struct HttpRequest<'a> {
    pub endpoint: &'a str,
    pub headers: &'a [(String, String)],
    pub body: &'a Value,
    pub timeout: Duration,
}

/// Transport-level failure, classified for retry decisions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out")]
    Timeout,

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Rate limits, connection failures and timeouts are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Status { status: 429, .. }
                | TransportError::Connection(_)
                | TransportError::Timeout
        )
    }
}

/// Posts JSON and returns the decoded JSON response.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn post_json(&self, request: HttpRequest<'_>) -> Result<Value, TransportError>;
}

/// Truncate `text` to at most `max_bytes`, cutting on a char boundary.
pub fn truncate_body(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// The process-wide HTTP connection pool.
///
/// Closing releases the pool. Any later use transparently builds a fresh
/// one, so a closed session is never fatal.
pub struct HttpSession {
    client: ArcSwapOption<reqwest::Client>,
}

impl HttpSession {
    pub fn new() -> Result<Self, TransportError> {
        Ok(Self {
            client: ArcSwapOption::from_pointee(build_client()?),
        })
    }

    /// The live client, recreating it if the session was closed.
    pub fn client(&self) -> Result<Arc<reqwest::Client>, TransportError> {
        if let Some(client) = self.client.load_full() {
            return Ok(client);
        }

        tracing::warn!("HTTP session closed, creating a new one");
        let fresh = Arc::new(build_client()?);
        self.client
            .rcu(|current| current.clone().or_else(|| Some(fresh.clone())));
        Ok(self.client.load_full().unwrap_or(fresh))
    }

    /// Release the pool. Returns whether it was open.
    pub fn close(&self) -> bool {
        self.client.swap(None).is_some()
    }

    pub fn is_open(&self) -> bool {
        self.client.load().is_some()
    }
}

impl std::fmt::Debug for HttpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSession")
            .field("open", &self.is_open())
            .finish()
    }
}

fn build_client() -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(50)
        .build()
        .map_err(|error| TransportError::InvalidRequest(format!("failed to build HTTP client: {error}")))
}

/// [`Transport`] backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    session: Arc<HttpSession>,
}

impl ReqwestTransport {
    pub fn new(session: Arc<HttpSession>) -> Self {
        Self { session }
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn post_json(&self, request: HttpRequest<'_>) -> Result<Value, TransportError> {
        let client = self.session.client()?;

        let response = client
            .post(request.endpoint)
            .timeout(request.timeout)
            .json(request.body)
            .headers(header_map(request.headers)?)
            .send()
            .await
            .map_err(classify)?;
        let status = response.status();

        if !status.is_success() {
            let body = match response.text().await {
                Ok(text) => truncate_body(&text, MAX_ERROR_BODY_BYTES),
                Err(_) => "<unable to read response body>".to_string(),
            };
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await.map_err(classify)?;
        serde_json::from_str(&text).map_err(|error| {
            TransportError::Decode(format!(
                "{error}: {}",
                truncate_body(&text, MAX_ERROR_BODY_BYTES)
            ))
        })
    }
}

/// Collapse the header list so each name is sent once, last value wins.
fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|error| TransportError::InvalidRequest(format!("header {name}: {error}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|error| TransportError::InvalidRequest(format!("header {name}: {error}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_builder() {
        TransportError::InvalidRequest(error.to_string())
    } else {
        TransportError::Connection(error.to_string())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport for exercising the dispatch kernel without a network.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    pub(crate) struct ScriptedTransport {
        script: Mutex<VecDeque<Result<Value, TransportError>>>,
        fallback: Option<Value>,
        requests: Mutex<Vec<Value>>,
    }

    impl ScriptedTransport {
        /// Replay `script` in order, then fail with a connection error.
        pub(crate) fn new(script: impl IntoIterator<Item = Result<Value, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
                fallback: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Answer every request with `body`.
        pub(crate) fn repeating(body: Value) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                fallback: Some(body),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub(crate) fn requests(&self) -> Vec<Value> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn post_json(&self, request: HttpRequest<'_>) -> Result<Value, TransportError> {
            self.requests.lock().unwrap().push(request.body.clone());
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(result) => result,
                None => self
                    .fallback
                    .clone()
                    .ok_or_else(|| TransportError::Connection("script exhausted".into())),
            }
        }
    }
}
