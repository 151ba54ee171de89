use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use scriptd_db::PgScriptStore;
use scriptd_engine::{EngineConfig, ScriptEngine};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scriptd_worker=debug,scriptd_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::from_env().context("invalid engine configuration")?;
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let pool = scriptd_db::create_pool(&database_url)
        .await
        .context("failed to connect to database")?;
    scriptd_db::health_check(&pool)
        .await
        .context("database health check failed")?;
    scriptd_db::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;
    tracing::info!("Database ready");

    let engine = ScriptEngine::new(Arc::new(PgScriptStore::new(pool.clone())), config);
    engine.recover().await.context("failed to recover interrupted runs")?;

    let scheduler_cancel = CancellationToken::new();
    let scheduler = engine.schedule_manager();
    let scheduler_handle = {
        let cancel = scheduler_cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };
    tracing::info!(
        tick_secs = engine.config().tick_interval.as_secs(),
        work_dir = %engine.config().work_dir.display(),
        "Worker started",
    );

    shutdown_signal().await;

    // Stop triggering new runs before draining the running ones.
    scheduler_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), scheduler_handle).await;
    tracing::info!("Schedule manager stopped");

    let drained = engine.shutdown(engine.config().shutdown_timeout).await;
    tracing::info!(drained, "Executions drained");

    pool.close().await;
    tracing::info!("Worker stopped");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
