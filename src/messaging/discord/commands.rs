//! Slash command registration and interaction handling.

use crate::BotDeps;
use crate::MESSAGE_CHAR_LIMIT;
use crate::chunking::split_message;
use crate::commands::{
    Followup, Persona, PersonaTarget, SlashCommand, check_log, gate, persona_reply, select_api,
    set_react_target, text_to_speech, transcribe, validate_transcription, voice_label,
};
use crate::llm::Provider;
use crate::llm::audio::VOICES;

use serenity::all::{
    CommandInteraction, CommandOptionType, Context, CreateAttachment, CreateCommand,
    CreateCommandOption, CreateInteractionResponse, CreateInteractionResponseFollowup,
    CreateInteractionResponseMessage, ResolvedOption, ResolvedValue, User,
};
use std::time::Duration;

/// Pause between consecutive follow-up messages.
const FOLLOWUP_PACING: Duration = Duration::from_millis(500);

const MISSING_OPTION: &str = "Missing or invalid command option.";

/// Builders for every command, registered globally on ready.
pub(super) fn definitions() -> Vec<CreateCommand> {
    SlashCommand::ALL.into_iter().map(definition).collect()
}

fn definition(command: SlashCommand) -> CreateCommand {
    let base = CreateCommand::new(command.name()).description(command.description());
    match command {
        SlashCommand::SelectApi => {
            let api = Provider::ALL.into_iter().fold(
                CreateCommandOption::new(CommandOptionType::String, "api", "API to use (xAI or OpenAI)")
                    .required(true),
                |option, provider| option.add_string_choice(provider.display_name(), provider.as_str()),
            );
            base.add_option(api)
        }
        SlashCommand::AiRoast => base
            .add_option(
                CreateCommandOption::new(CommandOptionType::User, "member", "The user to roast")
                    .required(true),
            )
            .add_option(context_option()),
        SlashCommand::AiMotivate => base
            .add_option(
                CreateCommandOption::new(CommandOptionType::User, "member", "The user to motivate")
                    .required(true),
            )
            .add_option(context_option()),
        SlashCommand::AiTts => {
            let voice = VOICES.into_iter().fold(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "voice",
                    "The voice to use for the speech",
                )
                .required(true),
                |option, voice| option.add_string_choice(voice_label(voice), voice),
            );
            base.add_option(
                CreateCommandOption::new(CommandOptionType::String, "text", "The text for the AI to say")
                    .required(true),
            )
            .add_option(voice)
        }
        SlashCommand::SetReactUser => base.add_option(
            CreateCommandOption::new(
                CommandOptionType::User,
                "user",
                "The user whose messages get a reaction",
            )
            .required(true),
        ),
        SlashCommand::TranscribeAudio => base.add_option(
            CreateCommandOption::new(
                CommandOptionType::Attachment,
                "audio_file",
                "The audio file to transcribe",
            )
            .required(true),
        ),
        SlashCommand::CheckLog | SlashCommand::DisableReact => base,
    }
}

fn context_option() -> CreateCommandOption {
    CreateCommandOption::new(
        CommandOptionType::String,
        "context",
        "Optional additional context about the user",
    )
}

fn string_option<'a>(options: &[ResolvedOption<'a>], name: &str) -> Option<&'a str> {
    options
        .iter()
        .find(|option| option.name == name)
        .and_then(|option| match option.value {
            ResolvedValue::String(value) => Some(value),
            _ => None,
        })
}

fn user_option<'a>(options: &[ResolvedOption<'a>], name: &str) -> Option<&'a User> {
    options
        .iter()
        .find(|option| option.name == name)
        .and_then(|option| match option.value {
            ResolvedValue::User(user, _) => Some(user),
            _ => None,
        })
}

fn attachment_option<'a>(
    options: &[ResolvedOption<'a>],
    name: &str,
) -> Option<&'a serenity::all::Attachment> {
    options
        .iter()
        .find(|option| option.name == name)
        .and_then(|option| match option.value {
            ResolvedValue::Attachment(attachment) => Some(attachment),
            _ => None,
        })
}

/// Route one command interaction. Errors are logged, never surfaced.
pub(super) async fn dispatch(ctx: &Context, deps: &BotDeps, interaction: &CommandInteraction) {
    let Ok(command) = interaction.data.name.parse::<SlashCommand>() else {
        tracing::warn!(name = %interaction.data.name, "ignoring unknown slash command");
        return;
    };
    let user_id = interaction.user.id.get();
    tracing::info!(command = command.name(), user_id, "slash command invoked");

    let result = match gate(deps, command, user_id).await {
        Err(refusal) => respond_ephemeral(ctx, interaction, &refusal).await,
        Ok(()) => run(ctx, deps, interaction, command).await,
    };

    if let Err(error) = result {
        tracing::error!(command = command.name(), user_id, %error, "failed to respond to slash command");
    }
}

async fn run(
    ctx: &Context,
    deps: &BotDeps,
    interaction: &CommandInteraction,
    command: SlashCommand,
) -> serenity::Result<()> {
    let options = interaction.data.options();

    match command {
        SlashCommand::SelectApi => {
            let provider = string_option(&options, "api").and_then(|api| api.parse::<Provider>().ok());
            let Some(provider) = provider else {
                return respond_ephemeral(ctx, interaction, MISSING_OPTION).await;
            };
            let reply = select_api(deps, interaction.user.id.get(), provider).await;
            respond_ephemeral(ctx, interaction, &reply).await
        }
        SlashCommand::AiRoast | SlashCommand::AiMotivate => {
            let Some(member) = user_option(&options, "member") else {
                return respond_ephemeral(ctx, interaction, MISSING_OPTION).await;
            };
            let persona = if command == SlashCommand::AiRoast {
                Persona::Roast
            } else {
                Persona::Motivate
            };
            let target = PersonaTarget {
                user_id: member.id.get(),
                display_name: member
                    .global_name
                    .clone()
                    .unwrap_or_else(|| member.name.clone()),
                avatar_url: member.face(),
            };

            interaction.defer(ctx).await?;
            let reply = persona_reply(deps, persona, &target, string_option(&options, "context")).await;
            let messages = split_message(&reply, MESSAGE_CHAR_LIMIT);
            send_followups(ctx, interaction, messages.into_iter().map(Followup::text)).await
        }
        SlashCommand::AiTts => {
            let (Some(text), Some(voice)) =
                (string_option(&options, "text"), string_option(&options, "voice"))
            else {
                return respond_ephemeral(ctx, interaction, MISSING_OPTION).await;
            };
            interaction.defer(ctx).await?;
            let followup = text_to_speech(deps, text, voice).await;
            send_followups(ctx, interaction, [followup]).await
        }
        SlashCommand::CheckLog => {
            interaction.defer(ctx).await?;
            let messages = check_log(deps).await;
            send_followups(ctx, interaction, messages.into_iter().map(Followup::text)).await
        }
        SlashCommand::SetReactUser => {
            let Some(user) = user_option(&options, "user") else {
                return respond_ephemeral(ctx, interaction, MISSING_OPTION).await;
            };
            let reply = set_react_target(deps, Some(user.id.get()));
            respond_ephemeral(ctx, interaction, &reply).await
        }
        SlashCommand::DisableReact => {
            let reply = set_react_target(deps, None);
            respond_ephemeral(ctx, interaction, &reply).await
        }
        SlashCommand::TranscribeAudio => {
            let Some(audio_file) = attachment_option(&options, "audio_file") else {
                return respond_ephemeral(ctx, interaction, MISSING_OPTION).await;
            };
            let attachment = super::attachment_from(audio_file);
            if let Err(refusal) = validate_transcription(&attachment) {
                return respond_ephemeral(ctx, interaction, refusal).await;
            }

            interaction.defer(ctx).await?;
            let messages = match audio_file.download().await {
                Ok(audio) => transcribe(deps, &attachment, audio).await,
                Err(error) => {
                    tracing::error!(filename = %attachment.filename, %error, "failed to download audio");
                    vec!["Sorry, I couldn't transcribe the audio at this time.".to_string()]
                }
            };
            send_followups(ctx, interaction, messages.into_iter().map(Followup::text)).await
        }
    }
}

async fn respond_ephemeral(
    ctx: &Context,
    interaction: &CommandInteraction,
    content: &str,
) -> serenity::Result<()> {
    let message = CreateInteractionResponseMessage::new()
        .content(content)
        .ephemeral(true);
    interaction
        .create_response(ctx, CreateInteractionResponse::Message(message))
        .await
}

async fn send_followups(
    ctx: &Context,
    interaction: &CommandInteraction,
    followups: impl IntoIterator<Item = Followup>,
) -> serenity::Result<()> {
    for (index, followup) in followups.into_iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(FOLLOWUP_PACING).await;
        }
        let mut builder = CreateInteractionResponseFollowup::new().content(followup.content);
        if let Some(file) = followup.file {
            builder = builder.add_file(CreateAttachment::bytes(file.data, file.filename));
        }
        interaction.create_followup(ctx, builder).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_command_is_registered() {
        let definitions: Vec<serde_json::Value> = definitions()
            .iter()
            .map(|command| serde_json::to_value(command).unwrap())
            .collect();
        let names: Vec<&str> = definitions
            .iter()
            .map(|command| command["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "selectapi",
                "airoast",
                "aimotivate",
                "aitts",
                "checklog",
                "setreactuser",
                "disablereact",
                "transcribe_audio",
            ]
        );

        let api = &definitions[0]["options"][0];
        assert_eq!(api["name"], "api");
        assert_eq!(api["choices"][0]["value"], "xai");
        assert_eq!(api["choices"][1]["name"], "OpenAI");

        let voice = &definitions[3]["options"][1];
        assert_eq!(voice["choices"].as_array().unwrap().len(), VOICES.len());
        assert_eq!(voice["choices"][0]["name"], "Alloy");
    }
}
