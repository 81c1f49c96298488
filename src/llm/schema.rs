//! Chat completion wire types.
//!
//! Requests serialize straight into the OpenAI-compatible body both providers
//! accept. Responses are parsed once into [`ProviderReply`] so callers never
//! probe raw JSON.

use serde::{Deserialize, Deserializer, Serialize};

/// One role-tagged message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ConversationMessage {
    System {
        content: String,
    },
    User {
        content: UserContent,
    },
    /// An assistant turn that requested tool calls.
    Assistant {
        #[serde(default)]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        content: String,
        tool_call_id: String,
    },
}

impl ConversationMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user_text(content: impl Into<String>) -> Self {
        Self::User {
            content: UserContent::Text(content.into()),
        }
    }

    /// A user message carrying text followed by one part per image URL.
    pub fn user_with_images(text: impl Into<String>, image_urls: &[String]) -> Self {
        let mut parts = vec![ContentPart::Text { text: text.into() }];
        parts.extend(image_urls.iter().map(|url| ContentPart::ImageUrl {
            image_url: ImageUrl { url: url.clone() },
        }));
        Self::User {
            content: UserContent::Parts(parts),
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
        }
    }
}

/// User content: plain text, or a list of text and image parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments. Some providers send an object instead of a
    /// string; both are normalized to a string.
    #[serde(deserialize_with = "arguments_as_string", default)]
    pub arguments: String,
}

fn function_kind() -> String {
    "function".into()
}

fn arguments_as_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(raw) => raw,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Tool metadata advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// `{"type": "function", "function": {...}}` wrapper used in requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: ToolDefinition,
}

impl From<ToolDefinition> for FunctionTool {
    fn from(function: ToolDefinition) -> Self {
        Self {
            kind: "function",
            function,
        }
    }
}

/// Chat completion request body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ConversationMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<FunctionTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    pub max_tokens: u32,
    pub stream: bool,
}

/// Parsed provider response.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderReply {
    /// A final answer.
    Completion { content: String },
    /// The model wants tools run before answering.
    ToolCalls {
        content: Option<String>,
        calls: Vec<ToolCall>,
    },
    /// A 2xx body carrying an `error` object instead of choices.
    ProviderError { message: String },
    /// Anything without a usable first choice.
    Malformed,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

impl ProviderReply {
    pub fn from_json(body: &serde_json::Value) -> Self {
        let first_choice = body
            .get("choices")
            .and_then(|choices| choices.as_array())
            .and_then(|choices| choices.first());

        let Some(choice) = first_choice else {
            if let Some(error) = body.get("error") {
                let message = error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                return Self::ProviderError { message };
            }
            return Self::Malformed;
        };

        let Some(message) = choice.get("message") else {
            return Self::Malformed;
        };

        let message: ResponseMessage = match serde_json::from_value(message.clone()) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(%error, "provider message did not match the expected schema");
                return Self::Malformed;
            }
        };

        match (message.tool_calls, message.content) {
            (Some(calls), content) if !calls.is_empty() => Self::ToolCalls { content, calls },
            (_, Some(content)) => Self::Completion { content },
            (_, None) => Self::Malformed,
        }
    }
}
