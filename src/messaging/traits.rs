//! Chat platform trait and dynamic dispatch companion.

use crate::error::PlatformError;
use crate::{BotIdentity, InboundMessage};
use std::future::Future;
use std::pin::Pin;

/// Result of a platform call.
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Boxed future returned by [`ChatPlatformDyn`] methods.
pub type PlatformFuture<'a, T> = Pin<Box<dyn Future<Output = PlatformResult<T>> + Send + 'a>>;

/// Static trait for chat platform adapters.
/// Use this for type-safe implementations.
pub trait ChatPlatform: Send + Sync + 'static {
    /// Reply to `message_id` in `channel_id`.
    fn send_reply(
        &self,
        channel_id: u64,
        message_id: u64,
        content: &str,
    ) -> impl Future<Output = PlatformResult<()>> + Send;

    /// Fetch a message by id.
    fn fetch_message(
        &self,
        channel_id: u64,
        message_id: u64,
    ) -> impl Future<Output = PlatformResult<InboundMessage>> + Send;

    /// Show the typing indicator in a channel.
    fn broadcast_typing(&self, channel_id: u64) -> impl Future<Output = PlatformResult<()>> + Send {
        let _ = channel_id;
        async { Ok(()) }
    }

    /// React to a message with a unicode emoji.
    fn add_reaction(
        &self,
        channel_id: u64,
        message_id: u64,
        emoji: &str,
    ) -> impl Future<Output = PlatformResult<()>> + Send;

    /// The bot's own identity, with its nickname in `guild_id` if any.
    fn bot_identity(&self, guild_id: Option<u64>) -> BotIdentity;
}

/// Dynamic trait for runtime polymorphism.
/// Use this when you need `Arc<dyn ChatPlatformDyn>`.
pub trait ChatPlatformDyn: Send + Sync + 'static {
    fn send_reply<'a>(
        &'a self,
        channel_id: u64,
        message_id: u64,
        content: &'a str,
    ) -> PlatformFuture<'a, ()>;

    fn fetch_message<'a>(&'a self, channel_id: u64, message_id: u64)
    -> PlatformFuture<'a, InboundMessage>;

    fn broadcast_typing<'a>(&'a self, channel_id: u64) -> PlatformFuture<'a, ()>;

    fn add_reaction<'a>(
        &'a self,
        channel_id: u64,
        message_id: u64,
        emoji: &'a str,
    ) -> PlatformFuture<'a, ()>;

    fn bot_identity(&self, guild_id: Option<u64>) -> BotIdentity;
}

/// Blanket implementation: any type implementing ChatPlatform automatically implements ChatPlatformDyn.
impl<T: ChatPlatform> ChatPlatformDyn for T {
    fn send_reply<'a>(
        &'a self,
        channel_id: u64,
        message_id: u64,
        content: &'a str,
    ) -> PlatformFuture<'a, ()> {
        Box::pin(ChatPlatform::send_reply(self, channel_id, message_id, content))
    }

    fn fetch_message<'a>(
        &'a self,
        channel_id: u64,
        message_id: u64,
    ) -> PlatformFuture<'a, InboundMessage> {
        Box::pin(ChatPlatform::fetch_message(self, channel_id, message_id))
    }

    fn broadcast_typing<'a>(&'a self, channel_id: u64) -> PlatformFuture<'a, ()> {
        Box::pin(ChatPlatform::broadcast_typing(self, channel_id))
    }

    fn add_reaction<'a>(
        &'a self,
        channel_id: u64,
        message_id: u64,
        emoji: &'a str,
    ) -> PlatformFuture<'a, ()> {
        Box::pin(ChatPlatform::add_reaction(self, channel_id, message_id, emoji))
    }

    fn bot_identity(&self, guild_id: Option<u64>) -> BotIdentity {
        ChatPlatform::bot_identity(self, guild_id)
    }
}
