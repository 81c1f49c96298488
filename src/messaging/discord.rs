//! Discord adapter: the [`ChatPlatform`] implementation over serenity's HTTP
//! client and cache, and the gateway event handler that feeds the queue.

mod commands;

use crate::error::PlatformError;
use crate::messaging::traits::{ChatPlatform, PlatformResult};
use crate::{Attachment, BotDeps, BotIdentity, InboundMessage, MentionedUser};

use serenity::all::{
    Cache, ChannelId, Command, Context, CreateMessage, EventHandler, GuildId, Http, Interaction,
    Message, MessageId, ReactionType, Ready, ResumedEvent, User,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Reaction added to messages from the configured target user.
pub const REACTION_EMOJI: &str = "🏳️‍🌈";

/// Discord implementation of [`ChatPlatform`].
#[derive(Clone)]
pub struct DiscordAdapter {
    http: Arc<Http>,
    cache: Arc<Cache>,
}

impl DiscordAdapter {
    pub fn new(http: Arc<Http>, cache: Arc<Cache>) -> Self {
        Self { http, cache }
    }

    pub fn from_context(ctx: &Context) -> Self {
        Self::new(ctx.http.clone(), ctx.cache.clone())
    }
}

impl std::fmt::Debug for DiscordAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordAdapter").finish_non_exhaustive()
    }
}

impl ChatPlatform for DiscordAdapter {
    async fn send_reply(&self, channel_id: u64, message_id: u64, content: &str) -> PlatformResult<()> {
        let channel = ChannelId::new(channel_id);
        let builder = CreateMessage::new()
            .content(content)
            .reference_message((channel, MessageId::new(message_id)));

        channel
            .send_message((&self.cache, self.http.as_ref()), builder)
            .await
            .map(|_| ())
            .map_err(|error| PlatformError::Delivery(error.to_string()))
    }

    async fn fetch_message(&self, channel_id: u64, message_id: u64) -> PlatformResult<InboundMessage> {
        let channel = ChannelId::new(channel_id);
        let message = self
            .http
            .get_message(channel, MessageId::new(message_id))
            .await
            .map_err(|error| platform_error(error, message_id))?;

        let guild_id = message
            .guild_id
            .or_else(|| self.cache.channel(channel).map(|channel| channel.guild_id));
        Ok(inbound_from_message(&message, guild_id, &self.cache))
    }

    async fn broadcast_typing(&self, channel_id: u64) -> PlatformResult<()> {
        ChannelId::new(channel_id)
            .broadcast_typing(&self.http)
            .await
            .map_err(|error| platform_error(error, 0))
    }

    async fn add_reaction(&self, channel_id: u64, message_id: u64, emoji: &str) -> PlatformResult<()> {
        ChannelId::new(channel_id)
            .create_reaction(
                &self.http,
                MessageId::new(message_id),
                ReactionType::Unicode(emoji.to_string()),
            )
            .await
            .map_err(|error| platform_error(error, message_id))
    }

    fn bot_identity(&self, guild_id: Option<u64>) -> BotIdentity {
        let (id, name) = {
            let user = self.cache.current_user();
            (user.id, user.name.clone())
        };
        let nickname = guild_id
            .and_then(|guild_id| self.cache.member(GuildId::new(guild_id), id))
            .and_then(|member| member.nick.clone());

        BotIdentity {
            id: id.get(),
            name,
            nickname,
        }
    }
}

/// Map a serenity error, treating 404 and 403 as chain-ending conditions.
fn platform_error(error: serenity::Error, message_id: u64) -> PlatformError {
    let status = match &error {
        serenity::Error::Http(http_error) => http_error.status_code().map(|code| code.as_u16()),
        _ => None,
    };
    match status {
        Some(404) => PlatformError::NotFound { message_id },
        Some(403) => PlatformError::Forbidden(error.to_string()),
        _ => PlatformError::Other(error.to_string()),
    }
}

/// Guild nickname when known, else the user's global display name.
fn display_name(cache: &Cache, guild_id: Option<GuildId>, user: &User, nick: Option<&str>) -> String {
    if let Some(nick) = nick {
        return nick.to_string();
    }
    if let Some(member) = guild_id.and_then(|guild_id| cache.member(guild_id, user.id)) {
        return member.display_name().to_string();
    }
    user.display_name().to_string()
}

pub(crate) fn attachment_from(attachment: &serenity::all::Attachment) -> Attachment {
    Attachment {
        filename: attachment.filename.clone(),
        url: attachment.url.clone(),
        content_type: attachment.content_type.clone(),
        size: u64::from(attachment.size),
    }
}

pub(crate) fn inbound_from_message(
    message: &Message,
    guild_id: Option<GuildId>,
    cache: &Cache,
) -> InboundMessage {
    let author_nick = message
        .member
        .as_ref()
        .and_then(|member| member.nick.as_deref());

    InboundMessage {
        id: message.id.get(),
        channel_id: message.channel_id.get(),
        guild_id: guild_id.map(|guild_id| guild_id.get()),
        author_id: message.author.id.get(),
        author_name: display_name(cache, guild_id, &message.author, author_nick),
        content: message.content.clone(),
        attachments: message.attachments.iter().map(attachment_from).collect(),
        reply_to: message
            .message_reference
            .as_ref()
            .and_then(|reference| reference.message_id)
            .map(|id| id.get()),
        mentions: message
            .mentions
            .iter()
            .map(|user| {
                let nick = user.member.as_ref().and_then(|member| member.nick.as_deref());
                MentionedUser {
                    id: user.id.get(),
                    display_name: display_name(cache, guild_id, user, nick),
                }
            })
            .collect(),
    }
}

/// Gateway event handler.
pub struct Handler {
    deps: BotDeps,
    commands_registered: AtomicBool,
}

impl Handler {
    pub fn new(deps: BotDeps) -> Self {
        Self {
            deps,
            commands_registered: AtomicBool::new(false),
        }
    }
}

#[serenity::async_trait]
impl EventHandler for Handler {
    async fn message(&self, ctx: Context, message: Message) {
        if self.deps.runtime.react_target() == Some(message.author.id.get()) {
            let platform = DiscordAdapter::from_context(&ctx);
            if let Err(error) = platform
                .add_reaction(message.channel_id.get(), message.id.get(), REACTION_EMOJI)
                .await
            {
                tracing::warn!(message_id = %message.id, %error, "failed to add reaction");
            }
        }

        let bot_id = ctx.cache.current_user().id;
        if message.author.id == bot_id || !message.mentions_user_id(bot_id) {
            return;
        }

        let inbound = inbound_from_message(&message, message.guild_id, &ctx.cache);
        tracing::debug!(
            message_id = inbound.id,
            channel_id = inbound.channel_id,
            author = %inbound.author_name,
            "bot mentioned"
        );
        self.deps.queue.push(inbound);
    }

    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!(
            user = %ready.user.name,
            user_id = %ready.user.id,
            guilds = ready.guilds.len(),
            "connected to Discord"
        );

        if self.commands_registered.swap(true, Ordering::SeqCst) {
            return;
        }
        match Command::set_global_commands(&ctx.http, commands::definitions()).await {
            Ok(registered) => {
                tracing::info!(count = registered.len(), "registered slash commands globally");
            }
            Err(error) => {
                self.commands_registered.store(false, Ordering::SeqCst);
                tracing::error!(%error, "failed to register slash commands");
            }
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            commands::dispatch(&ctx, &self.deps, &command).await;
        }
    }

    async fn resume(&self, _ctx: Context, _event: ResumedEvent) {
        tracing::info!("gateway session resumed");
    }
}
