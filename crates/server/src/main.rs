//! Read-and-earn ledger service entry point.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use readearn_common::{Config, DayClock, TokenSigner};
use readearn_ledger::{AccountStore, Ledger, MemoryAccountStore, TimedStore};
use readearn_server::scheduler::{spawn_spin_sweep, spawn_weekly_reset};
use readearn_server::telegram::{ChannelMembership, TelegramClient};
use readearn_server::{router, AppState};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// `READEARN_ENV_FILE` if set, otherwise `.env` when present.
fn load_env_file() -> Option<String> {
    let env_file = std::env::var("READEARN_ENV_FILE").unwrap_or_else(|_| ".env".to_string());
    match dotenvy::from_filename(&env_file) {
        Ok(path) => Some(path.display().to_string()),
        Err(e) => {
            if !matches!(e, dotenvy::Error::Io(_)) {
                eprintln!("warning: failed to load {env_file}: {e}");
            }
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loaded = load_env_file();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    if let Some(path) = loaded {
        info!(path = %path, "loaded environment file");
    }

    let config = Config::load().context("loading configuration")?;

    let signer = match config.signing_key.as_deref() {
        Some(hex) => TokenSigner::from_hex(hex).context("parsing READEARN_SIGNING_KEY")?,
        None => {
            warn!("no signing key configured, tokens will not survive a restart");
            TokenSigner::generate()
        }
    };
    info!(public_key = %signer.public_key_hex(), "token signer ready");

    let store: Arc<dyn AccountStore> = Arc::new(TimedStore::new(
        MemoryAccountStore::new(),
        Duration::from_millis(config.store_timeout_ms),
    ));
    let ledger = Arc::new(
        Ledger::new(
            store,
            config.rewards.clone(),
            signer,
            DayClock::from_offset_minutes(config.day_offset_minutes),
        )
        .with_password_cost(config.password_hash_cost),
    );

    let telegram = TelegramClient::from_config(&config.telegram)
        .context("building telegram client")?
        .map(Arc::new);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = vec![spawn_weekly_reset(ledger.weekly.clone(), shutdown_rx.clone())];

    match &telegram {
        Some(client) => {
            let sweep = ledger.spin_sweep(client.clone(), config.scheduler.spin_sweep_limit);
            tasks.push(spawn_spin_sweep(
                sweep,
                Duration::from_secs(config.scheduler.spin_sweep_interval_secs.max(1)),
                shutdown_rx.clone(),
            ));
        }
        None => info!(
            "TELEGRAM_BOT_TOKEN not set, telegram login, spin reminders and follow checks disabled"
        ),
    }
    if config.bot_api_key.is_none() {
        warn!("BOT_API_KEY not set, bot routes will refuse every request");
    }

    let membership = telegram.map(|c| c as Arc<dyn ChannelMembership>);
    let app = router(AppState::new(ledger, &config, membership));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(listen_addr = %config.bind_addr, "readearn server listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "background task ended abnormally");
        }
    }
    info!("shutdown complete");
    Ok(())
}
