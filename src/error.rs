//! Top-level error types for grokbot.

use std::sync::Arc;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Audio(#[from] AudioError),

}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}

/// Failures surfaced by the request dispatcher.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    /// Transient failures (429, connection, timeout) on every attempt.
    #[error("failed to get response after {attempts} attempts: {last_error}")]
    RetriesExceeded { attempts: u32, last_error: String },

    /// Non-retriable HTTP status. `body` is truncated for diagnostics.
    #[error("API error: HTTP {status}: {body}")]
    Provider { status: u16, body: String },

    /// 2xx response whose body was not JSON.
    #[error("failed to decode provider response: {0}")]
    Decode(String),

    #[error("failed to build request: {0}")]
    Request(String),
}

/// Chat platform errors (fetch, send, react).
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("message {message_id} not found")]
    NotFound { message_id: u64 },

    #[error("missing permissions: {0}")]
    Forbidden(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("platform error: {0}")]
    Other(String),
}

impl PlatformError {
    /// Whether this error should quietly end a reply-chain walk instead of
    /// failing the whole message.
    pub fn truncates_chain(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Forbidden(_))
    }
}

/// User preference persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read preferences from {path}: {source}")]
    Read {
        path: String,
        source: Arc<std::io::Error>,
    },

    #[error("failed to write preferences to {path}: {source}")]
    Write {
        path: String,
        source: Arc<std::io::Error>,
    },

    #[error("preference file is not a JSON object: {0}")]
    Parse(String),
}

/// Text-to-speech and transcription errors.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("audio request failed: {0}")]
    Request(String),

    #[error("audio API error: HTTP {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("invalid transcription response: {0}")]
    InvalidResponse(String),
}
