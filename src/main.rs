//! grokbot CLI entry point.

use anyhow::Context as _;
use clap::Parser;
use std::path::Path;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[derive(Parser)]
#[command(name = "grokbot")]
#[command(about = "A Discord bot that answers mentions with xAI and OpenAI models")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = grokbot::config::Config::load()
        .with_context(|| "failed to load configuration from environment")?;

    let _guard = init_tracing(&config.log_dir, cli.debug)?;

    if !config.has_llm_provider() {
        tracing::warn!("no LLM provider API key found, set XAI_API_KEY or OPENAI_API_KEY");
    }

    tracing::info!(
        log_file = %config.log_file().display(),
        prefs_file = %config.prefs_file.display(),
        workers = config.worker_count,
        default_provider = config.default_provider.as_str(),
        xai = config.xai.is_configured(),
        openai = config.openai.is_configured(),
        "starting grokbot"
    );

    grokbot::bot::run(config).await
}

/// Log to stdout and to `<log_dir>/bot.log`. The returned guard flushes the
/// file writer on drop.
fn init_tracing(
    log_dir: &Path,
    debug: bool,
) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::never(log_dir, "bot.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(build_env_filter(debug))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    Ok(guard)
}

fn build_env_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if debug { "debug" } else { "info" };
        EnvFilter::new(format!("{level},serenity=warn,tracing::span=warn"))
    })
}
