//! LLM provider access: wire schemas, transport, dispatch and audio.

pub mod audio;
pub mod cache;
pub mod dispatcher;
pub mod provider;
pub mod schema;
pub mod transport;

pub use audio::AudioClient;
pub use cache::ResponseCache;
pub use dispatcher::{Dispatcher, RetryPolicy};
pub use provider::{Provider, ProviderEndpoint};
pub use schema::{ChatRequest, ConversationMessage, ProviderReply, ToolCall};
pub use transport::{HttpSession, ReqwestTransport, Transport, TransportError};
