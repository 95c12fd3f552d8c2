mod api;
mod middleware;
mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use trendscope_core::AppConfig;
use trendscope_engine::TrendEngine;
use trendscope_store::{ArchiveStore, Archiver, MemoryArchive, PgArchive, PoolConfig, RetryPolicy};

use crate::{
    api::{build_app, AppState},
    middleware::AuthState,
    scheduler::CycleContext,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = trendscope_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let store = connect_store(&config).await?;
    let engine = TrendEngine::new(config.engine.clone())?;
    let archiver = Archiver::new(
        Arc::clone(&store),
        RetryPolicy {
            max_retries: config.store_max_retries,
            backoff_base_ms: config.store_retry_backoff_base_ms,
        },
    );

    let (fatal_tx, fatal_rx) = watch::channel(None);
    let cycle = Arc::new(CycleContext::new(engine.clone(), archiver, fatal_tx));
    let mut scheduler = scheduler::build_scheduler(
        Arc::clone(&cycle),
        Duration::from_secs(config.engine.cycle_interval_secs),
    )
    .await?;

    let auth = AuthState::from_config(&config)?;
    let app = build_app(AppState { engine, store }, auth);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, env = %config.env, "trendscope server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(fatal_rx.clone()))
        .await?;

    scheduler.shutdown().await?;
    let report = cycle.drain(Utc::now()).await?;
    tracing::info!(
        stored = report.stored,
        archived = report.archived,
        pending = report.pending,
        "final archive flush complete"
    );

    if let Some(reason) = fatal_rx.borrow().clone() {
        anyhow::bail!("stopped after archive store contract violation: {reason}");
    }
    Ok(())
}

async fn connect_store(config: &AppConfig) -> anyhow::Result<Arc<dyn ArchiveStore>> {
    let Some(database_url) = &config.database_url else {
        tracing::warn!("DATABASE_URL not set; trend history is kept in process memory only");
        return Ok(Arc::new(MemoryArchive::new()));
    };
    let archive = PgArchive::connect(database_url, PoolConfig::from_app_config(config)).await?;
    let applied = archive.run_migrations().await?;
    tracing::info!(applied, "archive migrations complete");
    Ok(Arc::new(archive))
}

async fn shutdown_signal(mut fatal: watch::Receiver<Option<String>>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let storage_failure = async {
        if fatal.wait_for(Option::is_some).await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
        () = storage_failure => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
