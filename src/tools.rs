//! Tools the model may call during a conversation.
//!
//! Each tool implements the typed [`Tool`] trait. The [`ToolRegistry`] holds
//! them behind the object-safe [`ToolDyn`] companion, renders their
//! definitions for the request body, and turns every call into a string the
//! orchestrator can feed back as a `tool` message. A tool call never fails
//! the conversation: unknown names, bad arguments and tool errors all become
//! content.

pub mod web_search;

pub use web_search::{SearchResult, WebSearchArgs, WebSearchError, WebSearchTool};

use crate::llm::schema::{FunctionTool, ToolDefinition};

use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Content returned to the model when it names a tool that does not exist.
pub const TOOL_NOT_FOUND: &str = "Tool not found";

/// Static trait for tools. Use this for type-safe implementations.
pub trait Tool: Send + Sync + 'static {
    /// Name the model uses to call the tool.
    const NAME: &'static str;

    type Args: DeserializeOwned + Send;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Metadata advertised to the model.
    fn definition(&self) -> ToolDefinition;

    /// Run the tool. The returned string is sent back to the model verbatim.
    fn call(&self, args: Self::Args) -> impl Future<Output = Result<String, Self::Error>> + Send;
}

/// Dynamic trait for storing heterogeneous tools in the registry.
pub trait ToolDyn: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn definition(&self) -> ToolDefinition;

    /// Parse JSON-encoded `arguments` and run the tool.
    fn call_json<'a>(
        &'a self,
        arguments: &'a str,
    ) -> Pin<Box<dyn Future<Output = ToolOutcome> + Send + 'a>>;
}

/// Blanket implementation: any type implementing Tool automatically implements ToolDyn.
impl<T: Tool> ToolDyn for T {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn definition(&self) -> ToolDefinition {
        Tool::definition(self)
    }

    fn call_json<'a>(
        &'a self,
        arguments: &'a str,
    ) -> Pin<Box<dyn Future<Output = ToolOutcome> + Send + 'a>> {
        Box::pin(async move {
            let arguments = if arguments.trim().is_empty() {
                "{}"
            } else {
                arguments
            };

            let args: T::Args = match serde_json::from_str(arguments) {
                Ok(args) => args,
                Err(error) => return ToolOutcome::InvalidArguments(error.to_string()),
            };

            match Tool::call(self, args).await {
                Ok(content) => ToolOutcome::Completed(content),
                Err(error) => ToolOutcome::Failed(error.to_string()),
            }
        })
    }
}

/// Result of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Completed(String),
    NotFound,
    InvalidArguments(String),
    Failed(String),
}

impl ToolOutcome {
    /// Content of the `tool` message sent back to the model.
    pub fn into_content(self) -> String {
        match self {
            ToolOutcome::Completed(content) | ToolOutcome::Failed(content) => content,
            ToolOutcome::NotFound => TOOL_NOT_FOUND.to_string(),
            ToolOutcome::InvalidArguments(error) => format!("Invalid tool arguments: {error}"),
        }
    }
}

/// Name-indexed set of tools offered to the model.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Arc<dyn ToolDyn>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in tools.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(WebSearchTool::new());
        registry
    }

    pub fn register(&mut self, tool: impl ToolDyn) {
        self.tools.insert(tool.name(), Arc::new(tool));
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions in name order, wrapped for the request `tools` array.
    /// The order is stable so identical requests fingerprint identically.
    pub fn definitions(&self) -> Vec<FunctionTool> {
        self.tools
            .values()
            .map(|tool| FunctionTool::from(tool.definition()))
            .collect()
    }

    /// Run the tool called `name` with JSON-encoded `arguments`.
    pub async fn invoke(&self, name: &str, arguments: &str) -> ToolOutcome {
        let Some(tool) = self.tools.get(name) else {
            tracing::warn!(tool = %name, "model requested an unknown tool");
            return ToolOutcome::NotFound;
        };

        tracing::debug!(tool = %name, %arguments, "invoking tool");
        let outcome = tool.call_json(arguments).await;

        match &outcome {
            ToolOutcome::Completed(content) => {
                tracing::debug!(tool = %name, content_len = content.len(), "tool completed");
            }
            ToolOutcome::InvalidArguments(error) => {
                tracing::warn!(tool = %name, %error, "tool arguments did not parse");
            }
            ToolOutcome::Failed(error) => {
                tracing::warn!(tool = %name, %error, "tool failed");
            }
            ToolOutcome::NotFound => {}
        }

        outcome
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    struct Echo;

    #[derive(Deserialize)]
    struct EchoArgs {
        text: String,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("echo refused: {0}")]
    struct EchoError(String);

    impl Tool for Echo {
        const NAME: &'static str = "echo";

        type Args = EchoArgs;
        type Error = EchoError;

        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: Self::NAME.to_string(),
                description: "Repeat the input".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
            }
        }

        async fn call(&self, args: Self::Args) -> Result<String, Self::Error> {
            if args.text == "no" {
                return Err(EchoError(args.text));
            }
            Ok(args.text)
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Echo);
        registry
    }

    #[tokio::test]
    async fn invokes_registered_tool() {
        let outcome = registry().invoke("echo", r#"{"text": "hi"}"#).await;
        assert_eq!(outcome, ToolOutcome::Completed("hi".into()));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let outcome = registry().invoke("nope", "{}").await;
        assert_eq!(outcome, ToolOutcome::NotFound);
        assert_eq!(outcome.into_content(), "Tool not found");
    }

    #[tokio::test]
    async fn bad_arguments_and_failures_become_content() {
        let registry = registry();

        let outcome = registry.invoke("echo", "not json").await;
        assert!(matches!(outcome, ToolOutcome::InvalidArguments(_)));
        assert!(outcome.into_content().starts_with("Invalid tool arguments"));

        let outcome = registry.invoke("echo", "").await;
        assert!(matches!(outcome, ToolOutcome::InvalidArguments(_)));

        let outcome = registry.invoke("echo", r#"{"text": "no"}"#).await;
        assert_eq!(outcome.into_content(), "echo refused: no");
    }

    #[test]
    fn definitions_render_function_wrappers() {
        let definitions = ToolRegistry::with_defaults().definitions();
        assert_eq!(definitions.len(), 1);
        let rendered = serde_json::to_value(&definitions).unwrap();
        assert_eq!(rendered[0]["type"], "function");
        assert_eq!(rendered[0]["function"]["name"], "web_search");
        assert_eq!(
            rendered[0]["function"]["parameters"]["required"][0],
            "query"
        );
    }
}
