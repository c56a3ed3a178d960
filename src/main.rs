use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use blogdesk::cache::SettingsCache;
use blogdesk::collection::{CollectionClient, DocumentCollection};
use blogdesk::config;
use blogdesk::db;
use blogdesk::http::{self, AppState};
use blogdesk::outbox::{self, OutboxPolicy, WriteOutcome};
use blogdesk::theme::ThemeState;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let remote: Arc<dyn DocumentCollection> = Arc::new(CollectionClient::new(
        cfg.backend.api_key.clone(),
        &cfg.backend.base_url,
    )?);
    let theme = ThemeState::new();
    let cache = SettingsCache::init(
        pool.clone(),
        Arc::clone(&remote),
        cfg.backend.collections.settings.clone(),
        Arc::new(theme.clone()),
    )
    .await;

    // Drain queued settings writes (single worker keeps them ordered).
    let worker_pool = pool.clone();
    let worker_remote = Arc::clone(&remote);
    let worker_cache = Arc::clone(&cache);
    let poll_sleep = Duration::from_millis(cfg.app.poll_interval_ms);
    let policy = OutboxPolicy {
        max_backoff_secs: cfg.app.max_backoff_seconds as i64,
        alert_after_attempts: cfg.app.failure_alert_attempts,
    };
    tokio::spawn(async move {
        loop {
            match outbox::process_next_write(&worker_pool, worker_remote.as_ref(), policy).await {
                Ok(WriteOutcome::Pushed { version }) => worker_cache.acknowledge(version),
                Ok(WriteOutcome::Idle) | Ok(WriteOutcome::Deferred { .. }) => {
                    tokio::time::sleep(poll_sleep).await;
                }
                Err(err) => {
                    error!(?err, "outbox worker error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    let _ = cache.start_sync();

    let state = AppState {
        remote,
        collections: cfg.backend.collections.clone(),
        cache: Arc::clone(&cache),
        theme,
        environment: cfg.app.environment,
        cron_secret: cfg.cron_secret().map(str::to_string),
    };
    let listener = tokio::net::TcpListener::bind(&cfg.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.server.bind))?;
    info!(bind = %cfg.server.bind, environment = ?cfg.app.environment, "starting blogdesk");
    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    cache.teardown().await;
    info!("blogdesk stopped");
    Ok(())
}
