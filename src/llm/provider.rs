//! Provider identities and resolved chat endpoints.

use crate::config::ProviderConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// User agent sent with every chat completion request.
pub const USER_AGENT: &str = "DiscordBot/1.0";

/// LLM provider a user can select.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Xai,
    #[serde(rename = "openai")]
    OpenAi,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Xai, Provider::OpenAi];

    /// Stable identifier used in the preference file and command choices.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Xai => "xai",
            Provider::OpenAi => "openai",
        }
    }

    /// Human-facing name used in replies.
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Xai => "xAI",
            Provider::OpenAi => "OpenAI",
        }
    }

    /// Whether the provider accepts `image_url` content parts.
    pub fn supports_images(&self) -> bool {
        matches!(self, Provider::OpenAi)
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "xai" => Ok(Provider::Xai),
            "openai" => Ok(Provider::OpenAi),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Everything needed to post a chat completion to one provider.
#[derive(Clone)]
pub struct ProviderEndpoint {
    pub provider: Provider,
    pub url: String,
    pub model: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl ProviderEndpoint {
    /// Resolve an endpoint from config. Returns `None` when the provider has
    /// no API key.
    pub fn resolve(provider: Provider, config: &ProviderConfig, timeout: Duration) -> Option<Self> {
        let api_key = config.api_key.as_deref()?;
        Some(Self {
            provider,
            url: config.chat_url.clone(),
            model: config.model.clone(),
            headers: vec![
                ("Authorization".into(), format!("Bearer {api_key}")),
                ("User-Agent".into(), USER_AGENT.into()),
            ],
            timeout,
        })
    }
}

impl std::fmt::Debug for ProviderEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEndpoint")
            .field("provider", &self.provider)
            .field("url", &self.url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}
