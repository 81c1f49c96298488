//! Slash command behavior.
//!
//! Everything here works on plain ids and strings so the Discord layer only
//! has to parse options, pick between an ephemeral response and deferred
//! follow-ups, and upload files.

use crate::agent::orchestrator::not_configured;
use crate::chunking::{split_log_lines, split_message};
use crate::llm::audio::format_segments;
use crate::llm::{ChatRequest, ConversationMessage, Provider, ProviderEndpoint, ProviderReply};
use crate::{Attachment, BotDeps, MESSAGE_CHAR_LIMIT, logs};

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const NOT_AUTHORIZED: &str = "You are not authorized to use this command.";

/// Longest persona context passed to the model, in characters.
pub const MAX_PERSONA_CONTEXT: usize = 500;

pub const MAX_TTS_TEXT: usize = 4096;
pub const MAX_TTS_AUDIO_BYTES: usize = 8 * 1024 * 1024;
pub const TTS_PREVIEW_CHARS: usize = 1800;

pub const MAX_TRANSCRIPTION_BYTES: u64 = 25 * 1024 * 1024;

pub const LOG_TAIL_LINES: usize = 50;
/// Leaves room for the code fence and header inside one message.
pub const LOG_CHUNK_CHARS: usize = 1960;

/// Every registered slash command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlashCommand {
    SelectApi,
    AiRoast,
    AiMotivate,
    AiTts,
    CheckLog,
    SetReactUser,
    DisableReact,
    TranscribeAudio,
}

impl SlashCommand {
    pub const ALL: [SlashCommand; 8] = [
        SlashCommand::SelectApi,
        SlashCommand::AiRoast,
        SlashCommand::AiMotivate,
        SlashCommand::AiTts,
        SlashCommand::CheckLog,
        SlashCommand::SetReactUser,
        SlashCommand::DisableReact,
        SlashCommand::TranscribeAudio,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SlashCommand::SelectApi => "selectapi",
            SlashCommand::AiRoast => "airoast",
            SlashCommand::AiMotivate => "aimotivate",
            SlashCommand::AiTts => "aitts",
            SlashCommand::CheckLog => "checklog",
            SlashCommand::SetReactUser => "setreactuser",
            SlashCommand::DisableReact => "disablereact",
            SlashCommand::TranscribeAudio => "transcribe_audio",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SlashCommand::SelectApi => "Select the AI API (xAI or OpenAI)",
            SlashCommand::AiRoast => "Roast a user in a funny way",
            SlashCommand::AiMotivate => {
                "Give cheesy and over-the-top motivational advice to a user"
            }
            SlashCommand::AiTts => "Send a voice message using AI text-to-speech",
            SlashCommand::CheckLog => "Post the last 50 lines of the bot.log file",
            SlashCommand::SetReactUser => "Set the user whose messages will be reacted to",
            SlashCommand::DisableReact => "Disable the message reaction feature",
            SlashCommand::TranscribeAudio => {
                "Transcribe an audio file using OpenAI. Supports mp3, wav, m4a, and ogg formats (up to 25MB)."
            }
        }
    }

    /// Restricted to the configured bot owner.
    pub fn owner_only(&self) -> bool {
        matches!(
            self,
            SlashCommand::CheckLog
                | SlashCommand::SetReactUser
                | SlashCommand::DisableReact
                | SlashCommand::TranscribeAudio
        )
    }

    /// Minimum time between uses by the same user.
    pub fn cooldown(&self) -> Option<Duration> {
        match self {
            SlashCommand::AiRoast | SlashCommand::AiMotivate | SlashCommand::AiTts => {
                Some(Duration::from_secs(10))
            }
            SlashCommand::CheckLog => Some(Duration::from_secs(30)),
            _ => None,
        }
    }
}

impl FromStr for SlashCommand {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        SlashCommand::ALL
            .into_iter()
            .find(|command| command.name() == name)
            .ok_or_else(|| format!("unknown command: {name}"))
    }
}

/// Per-user, per-command rate limiting.
#[derive(Debug, Default)]
pub struct Cooldowns {
    ready_at: Mutex<HashMap<(SlashCommand, u64), Instant>>,
}

impl Cooldowns {
    /// Record a use of `command` by `user_id`, or return how long until the
    /// next use is allowed.
    pub async fn try_acquire(
        &self,
        command: SlashCommand,
        user_id: u64,
        period: Duration,
    ) -> Result<(), Duration> {
        let now = Instant::now();
        let mut ready_at = self.ready_at.lock().await;
        ready_at.retain(|_, ready| *ready > now);

        if let Some(ready) = ready_at.get(&(command, user_id)) {
            return Err(ready.duration_since(now));
        }
        ready_at.insert((command, user_id), now + period);
        Ok(())
    }
}

pub fn cooldown_notice(remaining: Duration) -> String {
    format!(
        "This command is on cooldown. Try again in {:.1} seconds.",
        remaining.as_secs_f64()
    )
}

/// Owner and cooldown checks. `Err` carries the ephemeral refusal.
pub async fn gate(deps: &BotDeps, command: SlashCommand, user_id: u64) -> Result<(), String> {
    if command.owner_only() && !deps.config.is_owner(user_id) {
        tracing::info!(command = command.name(), user_id, "refused owner-only command");
        return Err(NOT_AUTHORIZED.to_string());
    }

    if let Some(period) = command.cooldown() {
        deps.cooldowns
            .try_acquire(command, user_id, period)
            .await
            .map_err(cooldown_notice)?;
    }
    Ok(())
}

/// `/selectapi`: store a provider preference for `user_id`.
pub async fn select_api(deps: &BotDeps, user_id: u64, provider: Provider) -> String {
    if !deps.config.provider(provider).is_configured() {
        return format!("{} API is not configured.", provider.display_name());
    }
    deps.preferences.set(user_id, provider).await;
    tracing::info!(user_id, provider = provider.as_str(), "provider preference updated");
    format!("Selected {} for your questions.", provider.display_name())
}

/// The two avatar-based persona commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persona {
    Roast,
    Motivate,
}

/// The member a persona command is about.
#[derive(Debug, Clone)]
pub struct PersonaTarget {
    pub user_id: u64,
    pub display_name: String,
    pub avatar_url: String,
}

impl Persona {
    pub fn command(&self) -> SlashCommand {
        match self {
            Persona::Roast => SlashCommand::AiRoast,
            Persona::Motivate => SlashCommand::AiMotivate,
        }
    }

    fn prompt(&self, display_name: &str, context: Option<&str>) -> String {
        let mut prompt = match self {
            Persona::Roast => format!(
                "Roast this user in a funny way based on their nickname '{display_name}' and their avatar. \
                 Make it humorous and don't be afraid of offensive jokes since it's a roast between \
                 friends and should not be taken seriously."
            ),
            Persona::Motivate => format!(
                "Give this user, {display_name}, some extremely cheesy and over-the-top motivational \
                 advice based on their nickname and their avatar. Make it as exaggerated and uplifting \
                 as possible. Don't hold back on the enthusiasm!"
            ),
        };
        if let Some(context) = trim_context(context) {
            prompt.push_str(&format!(" Additional context: {context}"));
        }
        prompt
    }

    fn headline(&self, user_id: u64, answer: &str) -> String {
        match self {
            Persona::Roast => format!("Roast for <@{user_id}>: {answer}"),
            Persona::Motivate => format!("Motivational advice for <@{user_id}>: {answer}"),
        }
    }

    fn apology(&self) -> &'static str {
        match self {
            Persona::Roast => "Sorry, I couldn't generate a roast at this time.",
            Persona::Motivate => "Sorry, I couldn't generate motivational advice at this time.",
        }
    }
}

/// Trim optional context and cap it at [`MAX_PERSONA_CONTEXT`] characters.
pub fn trim_context(context: Option<&str>) -> Option<String> {
    let context = context?.trim();
    if context.is_empty() {
        return None;
    }
    Some(context.chars().take(MAX_PERSONA_CONTEXT).collect())
}

/// `/airoast` and `/aimotivate`: one multimodal OpenAI request with the
/// target's avatar attached.
pub async fn persona_reply(
    deps: &BotDeps,
    persona: Persona,
    target: &PersonaTarget,
    context: Option<&str>,
) -> String {
    let Some(endpoint) = ProviderEndpoint::resolve(
        Provider::OpenAi,
        &deps.config.openai,
        deps.config.api_timeout,
    ) else {
        return not_configured(Provider::OpenAi);
    };

    let system = ConversationMessage::system(format!(
        "The current date and time is {}.",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    let user = ConversationMessage::user_with_images(
        persona.prompt(&target.display_name, context),
        std::slice::from_ref(&target.avatar_url),
    );
    let request = ChatRequest {
        model: endpoint.model.clone(),
        messages: vec![system, user],
        tools: None,
        tool_choice: None,
        max_tokens: deps.config.max_tokens,
        stream: false,
    };

    match deps.dispatcher.complete(&endpoint, &request).await {
        Ok(ProviderReply::Completion { content })
        | Ok(ProviderReply::ToolCalls {
            content: Some(content),
            ..
        }) => persona.headline(target.user_id, &content),
        Ok(reply) => {
            tracing::error!(command = persona.command().name(), ?reply, "unusable persona reply");
            persona.apology().to_string()
        }
        Err(error) => {
            tracing::error!(command = persona.command().name(), %error, "persona request failed");
            persona.apology().to_string()
        }
    }
}

/// A follow-up message, optionally with a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Followup {
    pub content: String,
    pub file: Option<FileUpload>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub filename: String,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for FileUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileUpload")
            .field("filename", &self.filename)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Followup {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            file: None,
        }
    }
}

/// `/aitts`: synthesize `text` and return it as an mp3 attachment.
pub async fn text_to_speech(deps: &BotDeps, text: &str, voice: &str) -> Followup {
    let text = text.trim();
    if text.chars().count() > MAX_TTS_TEXT {
        return Followup::text(format!(
            "The text is too long. Please limit it to {MAX_TTS_TEXT} characters."
        ));
    }

    let audio = match deps.audio.speak(text, voice).await {
        Ok(audio) => audio,
        Err(error) => {
            tracing::error!(voice, %error, "speech synthesis failed");
            return Followup::text("Sorry, I couldn't generate the voice message at this time.");
        }
    };

    if audio.len() > MAX_TTS_AUDIO_BYTES {
        tracing::warn!(bytes = audio.len(), "generated voice message too large");
        return Followup::text(
            "The generated voice message is too large to send (over 8MB). Try shorter text.",
        );
    }

    let preview = if text.chars().count() > TTS_PREVIEW_CHARS {
        format!("{}...", text.chars().take(TTS_PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    };

    Followup {
        content: format!(
            "Here is your voice message (voice: {}):\nYour prompt: {preview}",
            voice_label(voice)
        ),
        file: Some(FileUpload {
            filename: format!("voice_message_{voice}.mp3"),
            data: audio,
        }),
    }
}

/// Capitalized voice name for display.
pub fn voice_label(voice: &str) -> String {
    let mut chars = voice.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `/checklog`: the tail of the bot log as fenced chunks.
pub async fn check_log(deps: &BotDeps) -> Vec<String> {
    let path = deps.config.log_file();
    let lines = match logs::tail(&path, LOG_TAIL_LINES).await {
        Ok(lines) => lines,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return vec!["Log file not found.".to_string()];
        }
        Err(error) => {
            tracing::error!(path = %path.display(), %error, "failed to read log file");
            return vec![format!("Error reading log file: {error}")];
        }
    };

    if lines.is_empty() {
        return vec!["Log file is empty.".to_string()];
    }

    let lines: Vec<String> = lines
        .into_iter()
        .map(|line| {
            if line.chars().count() > LOG_CHUNK_CHARS {
                let mut cut: String = line.chars().take(LOG_CHUNK_CHARS - 1).collect();
                cut.push('\n');
                cut
            } else {
                line
            }
        })
        .collect();

    split_log_lines(&lines, LOG_CHUNK_CHARS)
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| {
            let newline = if chunk.ends_with('\n') { "" } else { "\n" };
            if index == 0 {
                format!("Last {LOG_TAIL_LINES} lines of bot.log:\n```\n{chunk}{newline}```")
            } else {
                format!("```\n{chunk}{newline}```")
            }
        })
        .collect()
}

/// `/setreactuser` and `/disablereact`.
pub fn set_react_target(deps: &BotDeps, target: Option<u64>) -> String {
    deps.runtime.set_react_target(target);
    tracing::info!(?target, "reaction target changed");
    match target {
        Some(user_id) => format!("Set to react to messages from <@{user_id}>"),
        None => "Disabled the message reaction feature".to_string(),
    }
}

/// Checks run before a transcription is deferred. `Err` is the ephemeral
/// refusal.
pub fn validate_transcription(attachment: &Attachment) -> Result<(), &'static str> {
    if !attachment.is_audio() {
        return Err("Please upload an audio file.");
    }
    if attachment.size > MAX_TRANSCRIPTION_BYTES {
        return Err("The audio file is too large. Maximum size is 25MB.");
    }
    Ok(())
}

/// `/transcribe_audio`: transcribe downloaded audio into timestamped lines.
pub async fn transcribe(deps: &BotDeps, attachment: &Attachment, audio: Vec<u8>) -> Vec<String> {
    let content_type = attachment.content_type.as_deref().unwrap_or("audio/mpeg");
    let segments = match deps
        .audio
        .transcribe(audio, &attachment.filename, content_type)
        .await
    {
        Ok(segments) => segments,
        Err(error) => {
            tracing::error!(filename = %attachment.filename, %error, "transcription failed");
            return vec!["Sorry, I couldn't transcribe the audio at this time.".to_string()];
        }
    };

    if segments.is_empty() {
        return vec!["No transcription available.".to_string()];
    }

    let mut messages = vec![
        "Transcription of the audio file:\nNote: Speaker differentiation is not currently supported."
            .to_string(),
    ];
    messages.extend(split_message(&format_segments(&segments), MESSAGE_CHAR_LIMIT));
    messages
}
