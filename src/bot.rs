//! Process lifecycle: startup wiring, the gateway client and ordered shutdown.

use crate::BotDeps;
use crate::agent::{Pipeline, WorkerPool};
use crate::config::Config;
use crate::llm::{HttpSession, ReqwestTransport};
use crate::messaging::DiscordAdapter;
use crate::messaging::discord::Handler;
use crate::settings::PreferenceStore;

use anyhow::Context as _;
use serenity::all::{Client, GatewayIntents, ShardManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Run the bot until SIGINT/SIGTERM or until the gateway client stops.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);

    let preferences = match PreferenceStore::load(&config.prefs_file).await {
        Ok(store) => store,
        Err(error) => {
            tracing::error!(%error, "failed to load user preferences, starting empty");
            PreferenceStore::empty(&config.prefs_file)
        }
    };
    let preferences = Arc::new(preferences);

    let http = Arc::new(HttpSession::new().context("failed to create HTTP session")?);
    let transport = Arc::new(ReqwestTransport::new(http.clone()));
    let (deps, receiver) = BotDeps::new(config.clone(), preferences.clone(), http.clone(), transport);

    let intents = GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT;
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(Handler::new(deps.clone()))
        .await
        .context("failed to build Discord client")?;

    let platform = Arc::new(DiscordAdapter::new(client.http.clone(), client.cache.clone()));
    let workers = WorkerPool::spawn(
        config.worker_count,
        Arc::new(Pipeline::new(deps, platform)),
        receiver,
    );

    let cancel = CancellationToken::new();
    let flush_task = preferences
        .clone()
        .spawn_flush_task(config.pref_flush_interval, cancel.clone());

    let shard_manager = client.shard_manager.clone();
    let mut gateway = tokio::spawn(async move { client.start_autosharded().await });
    tracing::info!(workers = workers.len(), "grokbot started");

    let gateway_error = tokio::select! {
        signal = shutdown_signal() => {
            tracing::info!(signal, "shutdown signal received");
            None
        }
        result = &mut gateway => match result {
            Ok(Ok(())) => {
                tracing::warn!("gateway client stopped");
                None
            }
            Ok(Err(error)) => Some(anyhow::Error::new(error).context("Discord gateway client failed")),
            Err(error) => Some(anyhow::Error::new(error).context("Discord gateway task panicked")),
        },
    };

    shutdown(Shutdown {
        timeout: config.shutdown_timeout,
        workers,
        cancel,
        flush_task,
        preferences,
        http,
        shard_manager,
        gateway,
    })
    .await;

    match gateway_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

struct Shutdown {
    timeout: Duration,
    workers: WorkerPool,
    cancel: CancellationToken,
    flush_task: JoinHandle<()>,
    preferences: Arc<PreferenceStore>,
    http: Arc<HttpSession>,
    shard_manager: Arc<ShardManager>,
    gateway: JoinHandle<serenity::Result<()>>,
}

/// Workers, then preferences, then the HTTP session, then the shards. Each
/// step is bounded by the configured timeout.
async fn shutdown(state: Shutdown) {
    let timeout = state.timeout;
    tracing::info!(?timeout, "shutting down");

    state.workers.shutdown(timeout).await;

    state.cancel.cancel();
    if tokio::time::timeout(timeout, state.flush_task).await.is_err() {
        tracing::warn!("timed out waiting for the preference flush task");
    }
    match tokio::time::timeout(timeout, state.preferences.flush()).await {
        Ok(Ok(true)) => tracing::info!("user preferences saved"),
        Ok(Ok(false)) => tracing::debug!("user preferences unchanged"),
        Ok(Err(error)) => tracing::error!(%error, "failed to save user preferences"),
        Err(_) => tracing::warn!("timed out saving user preferences"),
    }

    if state.http.close() {
        tracing::info!("HTTP session closed");
    }

    if tokio::time::timeout(timeout, state.shard_manager.shutdown_all())
        .await
        .is_err()
    {
        tracing::warn!("timed out stopping gateway shards");
    }
    state.gateway.abort();

    tracing::info!("grokbot stopped");
}

#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(error) => {
            tracing::warn!(%error, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
}
