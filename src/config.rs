//! Configuration loading and validation.

use crate::error::{ConfigError, Result};
use crate::llm::Provider;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const XAI_CHAT_URL: &str = "https://api.x.ai/v1/chat/completions";
const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const OPENAI_VOICE_URL: &str = "https://api.openai.com/v1/audio/speech";
const OPENAI_TRANSCRIPTION_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// grokbot configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Discord bot token.
    pub discord_token: String,

    /// Response token cap sent with every completion request.
    pub max_tokens: u32,

    /// Number of pipeline workers pulling from the message queue.
    pub worker_count: usize,

    /// User allowed to run owner-only commands. `None` locks them entirely.
    pub owner_id: Option<u64>,

    /// Per-request HTTP timeout for provider calls.
    pub api_timeout: Duration,

    /// xAI chat completion settings.
    pub xai: ProviderConfig,

    /// OpenAI chat completion settings.
    pub openai: ProviderConfig,

    /// OpenAI speech and transcription settings.
    pub audio: AudioConfig,

    /// Provider used for users without a stored preference.
    pub default_provider: Provider,

    /// Where user provider selections are persisted.
    pub prefs_file: PathBuf,

    /// How often dirty preferences are flushed.
    pub pref_flush_interval: Duration,

    /// Directory holding `bot.log`.
    pub log_dir: PathBuf,

    /// Maximum number of cached provider responses.
    pub cache_capacity: u64,

    /// Queue depth above which enqueueing logs a warning.
    pub queue_warn_depth: usize,

    /// Upper bound on each shutdown step.
    pub shutdown_timeout: Duration,
}

/// Per-provider chat completion settings.
#[derive(Clone)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub chat_url: String,
}

impl ProviderConfig {
    /// A provider counts as configured once it has an API key.
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("chat_url", &self.chat_url)
            .finish()
    }
}

/// OpenAI audio endpoints used by the voice commands.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub speech_url: String,
    pub transcription_url: String,
    pub tts_model: String,
    pub transcription_model: String,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup. Empty values count
    /// as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let discord_token =
            get("DISCORD_TOKEN").ok_or_else(|| ConfigError::MissingKey("DISCORD_TOKEN".into()))?;

        let data_dir = default_data_dir();

        let xai = ProviderConfig {
            api_key: get("XAI_API_KEY"),
            model: get("XAI_MODEL").unwrap_or_else(|| "grok-3-mini".into()),
            chat_url: get("XAI_CHAT_URL").unwrap_or_else(|| XAI_CHAT_URL.into()),
        };

        let openai = ProviderConfig {
            api_key: get("OPENAI_API_KEY"),
            model: get("OPENAI_MODEL").unwrap_or_else(|| "gpt-4.1-mini".into()),
            chat_url: get("OPENAI_CHAT_URL").unwrap_or_else(|| OPENAI_CHAT_URL.into()),
        };

        let audio = AudioConfig {
            speech_url: get("OPENAI_VOICE_URL").unwrap_or_else(|| OPENAI_VOICE_URL.into()),
            transcription_url: get("OPENAI_TRANSCRIPTION_URL")
                .unwrap_or_else(|| OPENAI_TRANSCRIPTION_URL.into()),
            tts_model: get("OPENAI_TTS_MODEL").unwrap_or_else(|| "gpt-4o-mini-tts".into()),
            transcription_model: get("OPENAI_TRANSCRIPTION_MODEL")
                .unwrap_or_else(|| "gpt-4o-transcribe".into()),
        };

        let owner_id = get("BOT_OWNER_ID")
            .map(|value| parse_value::<u64>("BOT_OWNER_ID", &value))
            .transpose()?;

        let default_provider = get("DEFAULT_PROVIDER")
            .map(|value| parse_value::<Provider>("DEFAULT_PROVIDER", &value))
            .transpose()?
            .unwrap_or(Provider::OpenAi);

        Ok(Self {
            discord_token,
            max_tokens: parse_or(&get, "MAX_TOKENS", 5000)?,
            worker_count: parse_or::<usize>(&get, "WORKER_COUNT", 5)?.max(1),
            owner_id,
            api_timeout: Duration::from_secs(parse_or(&get, "API_TIMEOUT", 60)?),
            xai,
            openai,
            audio,
            default_provider,
            prefs_file: get("USER_PREF_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("user_preferences.json")),
            pref_flush_interval: Duration::from_secs(
                parse_or::<u64>(&get, "USER_PREF_WRITE_INTERVAL", 10)?.max(1),
            ),
            log_dir: get("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("logs")),
            cache_capacity: parse_or(&get, "RESPONSE_CACHE_CAPACITY", 100)?,
            queue_warn_depth: parse_or(&get, "QUEUE_WARN_DEPTH", 100)?,
            shutdown_timeout: Duration::from_secs(parse_or(&get, "SHUTDOWN_TIMEOUT", 5)?),
        })
    }

    /// Settings for a specific provider.
    pub fn provider(&self, provider: Provider) -> &ProviderConfig {
        match provider {
            Provider::Xai => &self.xai,
            Provider::OpenAi => &self.openai,
        }
    }

    /// Whether at least one chat provider has an API key.
    pub fn has_llm_provider(&self) -> bool {
        self.xai.is_configured() || self.openai.is_configured()
    }

    /// Path of the log file written by the tracing appender.
    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join("bot.log")
    }

    /// Whether `user_id` may run owner-only commands.
    pub fn is_owner(&self, user_id: u64) -> bool {
        self.owner_id == Some(user_id)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("grokbot"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> std::result::Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        key: key.into(),
        value: value.into(),
    })
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> std::result::Result<T, ConfigError> {
    match get(key) {
        Some(value) => parse_value(key, &value),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_subscriber::layer::SubscriberExt as _;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn missing_token_is_an_error() {
        let error = load(&[("OPENAI_API_KEY", "sk-test")]).unwrap_err();
        assert!(matches!(
            error,
            crate::Error::Config(ConfigError::MissingKey(ref key)) if key == "DISCORD_TOKEN"
        ));
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("DISCORD_TOKEN", "token")]).unwrap();
        assert_eq!(config.max_tokens, 5000);
        assert_eq!(config.worker_count, 5);
        assert_eq!(config.api_timeout, Duration::from_secs(60));
        assert_eq!(config.default_provider, Provider::OpenAi);
        assert_eq!(config.xai.model, "grok-3-mini");
        assert_eq!(config.openai.chat_url, OPENAI_CHAT_URL);
        assert_eq!(config.owner_id, None);
        assert!(!config.is_owner(0));
        assert!(config.log_file().ends_with("bot.log"));
    }

    #[test]
    fn overrides_and_blank_values() {
        let config = load(&[
            ("DISCORD_TOKEN", "token"),
            ("WORKER_COUNT", "0"),
            ("BOT_OWNER_ID", "42"),
            ("DEFAULT_PROVIDER", "XAI"),
            ("XAI_API_KEY", "  "),
            ("USER_PREF_FILE", "/tmp/prefs.json"),
        ])
        .unwrap();
        assert_eq!(config.worker_count, 1);
        assert!(config.is_owner(42));
        assert_eq!(config.default_provider, Provider::Xai);
        assert!(!config.xai.is_configured());
        assert!(!config.has_llm_provider());
        assert_eq!(config.prefs_file, PathBuf::from("/tmp/prefs.json"));
    }

    struct CountEvents(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for CountEvents {
        fn on_event(&self, _event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn loading_without_provider_keys_logs_nothing() {
        let events = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(CountEvents(events.clone()));

        let config = tracing::subscriber::with_default(subscriber, || {
            load(&[("DISCORD_TOKEN", "token")]).unwrap()
        });

        assert!(!config.has_llm_provider());
        assert_eq!(events.load(Ordering::SeqCst), 0);

        let config = load(&[("DISCORD_TOKEN", "token"), ("XAI_API_KEY", "xai-key")]).unwrap();
        assert!(config.has_llm_provider());
    }

    #[test]
    fn unparseable_number_is_rejected() {
        let error = load(&[("DISCORD_TOKEN", "token"), ("MAX_TOKENS", "lots")]).unwrap_err();
        assert!(matches!(
            error,
            crate::Error::Config(ConfigError::Invalid { ref key, .. }) if key == "MAX_TOKENS"
        ));
    }

    #[test]
    fn api_key_is_redacted_in_debug_output() {
        let config = load(&[("DISCORD_TOKEN", "token"), ("OPENAI_API_KEY", "sk-secret")]).unwrap();
        let rendered = format!("{:?}", config.openai);
        assert!(!rendered.contains("sk-secret"));
    }
}
