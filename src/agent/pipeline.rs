//! Per-message pipeline: normalize, orchestrate, chunk, reply.

use crate::agent::normalizer::{
    build_context, clean_question, collect_images, collect_reply_chain, mention_prefix,
};
use crate::agent::orchestrator::{Outcome, Request};
use crate::agent::worker::{FAILURE_NOTICE, MessageHandler};
use crate::chunking::split_message;
use crate::error::Result;
use crate::messaging::ChatPlatformDyn;
use crate::{BotDeps, InboundMessage, MESSAGE_CHAR_LIMIT};

use std::sync::Arc;
use std::time::Duration;

/// Reply sent when a message mentions the bot without asking anything.
pub const NO_QUESTION: &str = "Please ask a question or use slash commands.";

/// Pause between consecutive reply chunks.
const REPLY_PACING: Duration = Duration::from_millis(500);

/// The production [`MessageHandler`].
pub struct Pipeline {
    deps: BotDeps,
    platform: Arc<dyn ChatPlatformDyn>,
}

impl Pipeline {
    pub fn new(deps: BotDeps, platform: Arc<dyn ChatPlatformDyn>) -> Self {
        Self { deps, platform }
    }

    async fn reply(&self, message: &InboundMessage, content: &str) {
        if let Err(error) = self
            .platform
            .send_reply(message.channel_id, message.id, content)
            .await
        {
            tracing::error!(message_id = message.id, %error, "failed to send reply");
        }
    }

    /// Send `answer` as one or more replies, mentioning `prefix` on the first.
    async fn deliver(&self, message: &InboundMessage, prefix: &str, answer: &str) {
        let limit = MESSAGE_CHAR_LIMIT.saturating_sub(prefix.chars().count());
        let chunks = split_message(answer, limit);

        for (index, chunk) in chunks.iter().enumerate() {
            let content = if index == 0 {
                format!("{prefix}{chunk}")
            } else {
                chunk.clone()
            };

            if let Err(error) = self
                .platform
                .send_reply(message.channel_id, message.id, &content)
                .await
            {
                tracing::error!(
                    message_id = message.id,
                    chunk = index + 1,
                    total = chunks.len(),
                    %error,
                    "failed to deliver reply chunk"
                );
                return;
            }
            tokio::time::sleep(REPLY_PACING).await;
        }
    }
}

#[async_trait::async_trait]
impl MessageHandler for Pipeline {
    async fn handle(&self, message: &InboundMessage) -> Result<()> {
        let identity = self.platform.bot_identity(message.guild_id);

        let Some(question) = clean_question(message, &identity) else {
            self.reply(message, NO_QUESTION).await;
            return Ok(());
        };

        let chain = collect_reply_chain(self.platform.as_ref(), message).await?;
        let image_urls = collect_images(message, &chain);
        let context = build_context(&question, &chain, &message.author_name);
        let prefix = mention_prefix(message, &identity);

        let provider = self
            .deps
            .preferences
            .get(message.author_id)
            .await
            .unwrap_or(self.deps.config.default_provider);

        tracing::info!(
            message_id = message.id,
            provider = provider.as_str(),
            image_count = image_urls.len(),
            %context,
            "sending question to provider"
        );

        if let Err(error) = self.platform.broadcast_typing(message.channel_id).await {
            tracing::debug!(message_id = message.id, %error, "typing indicator failed");
        }

        let outcome = self
            .deps
            .orchestrator()
            .run(Request {
                provider,
                context,
                image_urls,
            })
            .await?;

        match outcome {
            Outcome::Rejected(reason) => self.reply(message, &reason).await,
            Outcome::Answer(answer) => self.deliver(message, &prefix, &answer).await,
        }
        Ok(())
    }

    async fn report_failure(&self, message: &InboundMessage) {
        self.reply(message, FAILURE_NOTICE).await;
    }
}
