//! Chat platform adapters.

pub mod discord;
pub mod traits;

pub use discord::DiscordAdapter;
pub use traits::{ChatPlatform, ChatPlatformDyn, PlatformResult};
