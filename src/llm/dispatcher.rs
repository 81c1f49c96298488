//! Request dispatch with retry, backoff and response caching.

use crate::error::DispatchError;
use crate::llm::cache::{ResponseCache, fingerprint};
use crate::llm::provider::ProviderEndpoint;
use crate::llm::schema::{ChatRequest, ProviderReply};
use crate::llm::transport::{HttpRequest, Transport, TransportError};

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Attempts and backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Posts provider payloads, retrying transient failures and caching
/// successful responses by payload fingerprint.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    cache: ResponseCache,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, cache: ResponseCache) -> Self {
        Self {
            transport,
            cache,
            retry: RetryPolicy::default(),
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Send `payload` to `endpoint`, or return the cached response for an
    /// identical payload.
    pub async fn dispatch(
        &self,
        endpoint: &str,
        headers: &[(String, String)],
        payload: &Value,
        timeout: Duration,
    ) -> Result<Arc<Value>, DispatchError> {
        let key = fingerprint(payload);
        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!(fingerprint = %key, "response cache hit");
            return Ok(cached);
        }

        let request = HttpRequest {
            endpoint,
            headers,
            body: payload,
            timeout,
        };

        let mut last_error = None;
        for attempt in 1..=self.retry.max_attempts {
            if attempt > 1 {
                let delay = self.retry.delay_after(attempt - 1);
                tracing::debug!(
                    endpoint,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }

            match self.transport.post_json(request).await {
                Ok(body) => {
                    return Ok(self.cache.insert(key, Arc::new(body)));
                }
                Err(error) if error.is_transient() => {
                    tracing::warn!(endpoint, attempt, %error, "transient provider error");
                    last_error = Some(error);
                }
                Err(TransportError::Status { status, body }) => {
                    tracing::error!(endpoint, "API error: HTTP {status}: {body}");
                    return Err(DispatchError::Provider { status, body });
                }
                Err(TransportError::Decode(message)) => {
                    tracing::error!(endpoint, %message, "provider returned a non-JSON body");
                    return Err(DispatchError::Decode(message));
                }
                Err(error) => {
                    return Err(DispatchError::Request(error.to_string()));
                }
            }
        }

        let last_error = last_error
            .map(|error| error.to_string())
            .unwrap_or_else(|| "no attempts made".into());
        tracing::error!(
            endpoint,
            attempts = self.retry.max_attempts,
            %last_error,
            "failed to get response from provider"
        );
        Err(DispatchError::RetriesExceeded {
            attempts: self.retry.max_attempts,
            last_error,
        })
    }

    /// Dispatch a chat request and parse the response.
    pub async fn complete(
        &self,
        endpoint: &ProviderEndpoint,
        request: &ChatRequest,
    ) -> Result<ProviderReply, DispatchError> {
        let payload = serde_json::to_value(request)
            .map_err(|error| DispatchError::Request(error.to_string()))?;
        let body = self
            .dispatch(&endpoint.url, &endpoint.headers, &payload, endpoint.timeout)
            .await?;
        Ok(ProviderReply::from_json(&body))
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("cache", &self.cache)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::transport::testing::ScriptedTransport;
    use serde_json::json;
    use tokio::time::Instant;

    fn dispatcher(transport: Arc<ScriptedTransport>) -> Dispatcher {
        Dispatcher::new(transport, ResponseCache::new(100))
    }

    fn ok_body() -> Value {
        json!({"choices": [{"message": {"content": "hello"}}]})
    }

    fn rate_limited() -> Result<Value, TransportError> {
        Err(TransportError::Status {
            status: 429,
            body: "slow down".into(),
        })
    }

    async fn send(dispatcher: &Dispatcher, payload: &Value) -> Result<Arc<Value>, DispatchError> {
        dispatcher
            .dispatch("http://provider/chat", &[], payload, Duration::from_secs(5))
            .await
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_are_retried_with_backoff() {
        let transport = Arc::new(ScriptedTransport::new([
            rate_limited(),
            rate_limited(),
            Ok(ok_body()),
        ]));
        let dispatcher = dispatcher(transport.clone());

        let started = Instant::now();
        let body = send(&dispatcher, &json!({"q": 1})).await.unwrap();

        assert_eq!(*body, ok_body());
        assert_eq!(transport.calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failures_exhaust_retries() {
        let transport = Arc::new(ScriptedTransport::new([
            Err(TransportError::Timeout),
            Err(TransportError::Connection("reset".into())),
            rate_limited(),
        ]));
        let dispatcher = dispatcher(transport.clone());

        let error = send(&dispatcher, &json!({"q": 2})).await.unwrap_err();

        match error {
            DispatchError::RetriesExceeded { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("429"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.calls(), 3);
        assert!(dispatcher.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn other_statuses_fail_immediately() {
        let transport = Arc::new(ScriptedTransport::new([Err(TransportError::Status {
            status: 401,
            body: "bad key".into(),
        })]));
        let dispatcher = dispatcher(transport.clone());

        let started = Instant::now();
        let error = send(&dispatcher, &json!({"q": 3})).await.unwrap_err();

        assert!(matches!(error, DispatchError::Provider { status: 401, .. }));
        assert_eq!(transport.calls(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn identical_payload_is_served_from_cache() {
        let transport = Arc::new(ScriptedTransport::repeating(ok_body()));
        let dispatcher = dispatcher(transport.clone());

        let first = send(&dispatcher, &json!({"a": 1, "b": 2})).await.unwrap();
        let second = send(&dispatcher, &json!({"b": 2, "a": 1})).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(transport.calls(), 1);

        send(&dispatcher, &json!({"a": 2})).await.unwrap();
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn complete_parses_reply() {
        let transport = Arc::new(ScriptedTransport::repeating(ok_body()));
        let dispatcher = dispatcher(transport.clone());
        let endpoint = ProviderEndpoint {
            provider: crate::llm::Provider::OpenAi,
            url: "http://provider/chat".into(),
            model: "gpt".into(),
            headers: Vec::new(),
            timeout: Duration::from_secs(5),
        };
        let request = ChatRequest {
            model: "gpt".into(),
            messages: vec![crate::llm::ConversationMessage::user_text("hi")],
            tools: None,
            tool_choice: None,
            max_tokens: 10,
            stream: false,
        };

        let reply = dispatcher.complete(&endpoint, &request).await.unwrap();

        assert_eq!(
            reply,
            ProviderReply::Completion {
                content: "hello".into()
            }
        );
        assert_eq!(transport.requests()[0]["model"], "gpt");
    }
}
