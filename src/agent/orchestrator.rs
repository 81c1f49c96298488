//! Conversation orchestration: one question in, one attributed answer out.
//!
//! Text questions run a bounded tool loop. The model may request tool calls
//! up to [`MAX_TOOL_ITERATIONS`] times before a final answer is required.
//! Image questions are a single request without tools.

use crate::config::Config;
use crate::error::DispatchError;
use crate::llm::schema::ProviderReply;
use crate::llm::{ChatRequest, ConversationMessage, Dispatcher, Provider, ProviderEndpoint};
use crate::tools::ToolRegistry;

use chrono::{DateTime, TimeZone};
use std::sync::Arc;

/// Maximum provider round trips for one question.
pub const MAX_TOOL_ITERATIONS: usize = 5;

pub const INVALID_RESPONSE: &str = "Invalid response from API";
pub const MAX_ITERATIONS_REACHED: &str = "Maximum iterations reached without a final answer.";
pub const IMAGES_UNSUPPORTED: &str =
    "Sorry, image input is only supported with OpenAI at the moment.";

/// A question ready for the model.
#[derive(Debug, Clone)]
pub struct Request {
    pub provider: Provider,
    /// Question text, including any conversation history.
    pub context: String,
    pub image_urls: Vec<String>,
}

/// What to tell the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The model's answer with provider attribution.
    Answer(String),
    /// The request was refused before any provider call.
    Rejected(String),
}

impl Outcome {
    pub fn into_text(self) -> String {
        match self {
            Outcome::Answer(text) | Outcome::Rejected(text) => text,
        }
    }
}

/// Drives provider requests and tool calls for a single question.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    dispatcher: Dispatcher,
    tools: Arc<ToolRegistry>,
    config: Arc<Config>,
}

impl Orchestrator {
    pub fn new(dispatcher: Dispatcher, tools: Arc<ToolRegistry>, config: Arc<Config>) -> Self {
        Self {
            dispatcher,
            tools,
            config,
        }
    }

    pub async fn run(&self, request: Request) -> Result<Outcome, DispatchError> {
        let provider = request.provider;
        let Some(endpoint) = ProviderEndpoint::resolve(
            provider,
            self.config.provider(provider),
            self.config.api_timeout,
        ) else {
            return Ok(Outcome::Rejected(not_configured(provider)));
        };

        if !request.image_urls.is_empty() && !provider.supports_images() {
            return Ok(Outcome::Rejected(IMAGES_UNSUPPORTED.to_string()));
        }

        let system = ConversationMessage::system(format!(
            "Today's date and time is {}.",
            format_timestamp(&chrono::Local::now())
        ));

        let answer = if request.image_urls.is_empty() {
            let user = ConversationMessage::user_text(request.context);
            self.run_tool_loop(&endpoint, vec![system, user]).await?
        } else {
            tracing::debug!(
                provider = %provider,
                image_count = request.image_urls.len(),
                "sending image request"
            );
            let user = ConversationMessage::user_with_images(request.context, &request.image_urls);
            self.run_single(&endpoint, vec![system, user]).await?
        };

        Ok(Outcome::Answer(format!(
            "{answer}\n(answered by {})",
            provider.display_name()
        )))
    }

    async fn run_single(
        &self,
        endpoint: &ProviderEndpoint,
        messages: Vec<ConversationMessage>,
    ) -> Result<String, DispatchError> {
        let request = self.chat_request(endpoint, messages, false);
        let reply = self.dispatcher.complete(endpoint, &request).await?;
        Ok(match reply {
            ProviderReply::Completion { content } => content,
            ProviderReply::ToolCalls {
                content: Some(content),
                ..
            } => content,
            other => invalid_response(endpoint, &other),
        })
    }

    async fn run_tool_loop(
        &self,
        endpoint: &ProviderEndpoint,
        mut messages: Vec<ConversationMessage>,
    ) -> Result<String, DispatchError> {
        for iteration in 1..=MAX_TOOL_ITERATIONS {
            let request = self.chat_request(endpoint, messages.clone(), true);
            let reply = self.dispatcher.complete(endpoint, &request).await?;

            let (content, calls) = match reply {
                ProviderReply::Completion { content } => return Ok(content),
                ProviderReply::ToolCalls { content, calls } => (content, calls),
                other => return Ok(invalid_response(endpoint, &other)),
            };

            tracing::debug!(
                provider = %endpoint.provider,
                iteration,
                call_count = calls.len(),
                "model requested tool calls"
            );

            messages.push(ConversationMessage::Assistant {
                content,
                tool_calls: calls.clone(),
            });
            for call in calls {
                let outcome = self
                    .tools
                    .invoke(&call.function.name, &call.function.arguments)
                    .await;
                messages.push(ConversationMessage::tool_result(
                    call.id,
                    outcome.into_content(),
                ));
            }
        }

        tracing::warn!(
            provider = %endpoint.provider,
            iterations = MAX_TOOL_ITERATIONS,
            "tool loop ended without a final answer"
        );
        Ok(MAX_ITERATIONS_REACHED.to_string())
    }

    fn chat_request(
        &self,
        endpoint: &ProviderEndpoint,
        messages: Vec<ConversationMessage>,
        offer_tools: bool,
    ) -> ChatRequest {
        let offer_tools = offer_tools && !self.tools.is_empty();
        ChatRequest {
            model: endpoint.model.clone(),
            messages,
            tools: offer_tools.then(|| self.tools.definitions()),
            tool_choice: offer_tools.then(|| "auto".to_string()),
            max_tokens: self.config.max_tokens,
            stream: false,
        }
    }
}

fn invalid_response(endpoint: &ProviderEndpoint, reply: &ProviderReply) -> String {
    match reply {
        ProviderReply::ProviderError { message } => {
            tracing::warn!(provider = %endpoint.provider, %message, "provider returned an error body");
        }
        _ => {
            tracing::warn!(provider = %endpoint.provider, "provider response had no usable choice");
        }
    }
    INVALID_RESPONSE.to_string()
}

/// Rejection text for a provider without an API key.
pub fn not_configured(provider: Provider) -> String {
    format!("Sorry, the {} API is not configured.", provider.display_name())
}

/// `03:07 PM +02 on Monday, October 19, 2026`.
pub fn format_timestamp<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let offset = time.format("%z").to_string();
    let offset_hours = offset.get(..3).unwrap_or("+00");
    format!(
        "{} {offset_hours} on {}",
        time.format("%I:%M %p"),
        time.format("%A, %B %d, %Y")
    )
}
