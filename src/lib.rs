//! grokbot: a Discord bot that relays questions to xAI and OpenAI models.

pub mod agent;
pub mod bot;
pub mod chunking;
pub mod commands;
pub mod config;
pub mod error;
pub mod llm;
pub mod logs;
pub mod messaging;
pub mod settings;
pub mod tools;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Discord's per-message character limit.
pub const MESSAGE_CHAR_LIMIT: usize = 2000;

/// Inbound message from the chat platform. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: u64,
    pub channel_id: u64,
    pub guild_id: Option<u64>,
    pub author_id: u64,
    /// Guild display name when the author is a member, else the username.
    pub author_name: String,
    pub content: String,
    pub attachments: Vec<Attachment>,
    /// Id of the message this one replies to.
    pub reply_to: Option<u64>,
    pub mentions: Vec<MentionedUser>,
}

impl InboundMessage {
    /// URLs of image attachments, in attachment order.
    pub fn image_urls(&self) -> Vec<String> {
        self.attachments
            .iter()
            .filter(|attachment| attachment.is_image())
            .map(|attachment| attachment.url.clone())
            .collect()
    }
}

/// File attachment metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub url: String,
    pub content_type: Option<String>,
    pub size: u64,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.has_media_type("image/")
    }

    pub fn is_audio(&self) -> bool {
        self.has_media_type("audio/")
    }

    fn has_media_type(&self, prefix: &str) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|content_type| content_type.starts_with(prefix))
    }
}

/// A user mentioned in a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionedUser {
    pub id: u64,
    pub display_name: String,
}

/// How the bot appears in a given guild.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BotIdentity {
    pub id: u64,
    pub name: String,
    /// Guild nickname, if one is set.
    pub nickname: Option<String>,
}

/// Shared dependency bundle for the message pipeline and slash commands.
#[derive(Clone)]
pub struct BotDeps {
    pub config: Arc<config::Config>,
    pub queue: agent::MessageQueue,
    pub preferences: Arc<settings::PreferenceStore>,
    pub runtime: Arc<settings::RuntimeSettings>,
    pub http: Arc<llm::HttpSession>,
    pub dispatcher: llm::Dispatcher,
    pub tools: Arc<tools::ToolRegistry>,
    pub audio: llm::AudioClient,
    pub cooldowns: Arc<commands::Cooldowns>,
}

impl BotDeps {
    /// Wire up shared state. The returned receiver feeds the worker pool.
    pub fn new(
        config: Arc<config::Config>,
        preferences: Arc<settings::PreferenceStore>,
        http: Arc<llm::HttpSession>,
        transport: Arc<dyn llm::Transport>,
    ) -> (Self, agent::QueueReceiver) {
        let (queue, receiver) = agent::MessageQueue::new(config.queue_warn_depth);
        let dispatcher =
            llm::Dispatcher::new(transport, llm::ResponseCache::new(config.cache_capacity));
        let audio = llm::AudioClient::new(http.clone(), &config);

        let deps = Self {
            config,
            queue,
            preferences,
            runtime: Arc::new(settings::RuntimeSettings::default()),
            http,
            dispatcher,
            tools: Arc::new(tools::ToolRegistry::with_defaults()),
            audio,
            cooldowns: Arc::new(commands::Cooldowns::default()),
        };
        (deps, receiver)
    }

    /// An orchestrator over the shared dispatcher and tools.
    pub fn orchestrator(&self) -> agent::Orchestrator {
        agent::Orchestrator::new(
            self.dispatcher.clone(),
            self.tools.clone(),
            self.config.clone(),
        )
    }
}

impl std::fmt::Debug for BotDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotDeps")
            .field("queue_depth", &self.queue.depth())
            .field("http", &self.http)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(content_type: Option<&str>) -> Attachment {
        Attachment {
            filename: "file".into(),
            url: format!("https://cdn/{}", content_type.unwrap_or("none")),
            content_type: content_type.map(str::to_string),
            size: 10,
        }
    }

    #[test]
    fn image_urls_filter_by_content_type() {
        let message = InboundMessage {
            id: 1,
            channel_id: 2,
            guild_id: None,
            author_id: 3,
            author_name: "alice".into(),
            content: String::new(),
            attachments: vec![
                attachment(Some("image/png")),
                attachment(Some("audio/mpeg")),
                attachment(None),
                attachment(Some("image/jpeg")),
            ],
            reply_to: None,
            mentions: vec![MentionedUser {
                id: 9,
                display_name: "bot".into(),
            }],
        };

        assert_eq!(
            message.image_urls(),
            vec!["https://cdn/image/png", "https://cdn/image/jpeg"]
        );
        assert!(message.attachments[1].is_audio());
    }
}
