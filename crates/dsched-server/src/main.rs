mod api;
mod middleware;
mod scheduler;

use std::sync::Arc;

use dsched_db::{DocumentStore, MemoryStore, PoolConfig};
use tracing_subscriber::EnvFilter;

use crate::api::{build_app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(dsched_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(env = %config.env, timezone = %config.timezone, "starting dsched-server");

    let (store, pool) = match &config.database_url {
        Some(url) => {
            let store =
                dsched_db::connect_store(url, PoolConfig::from_app_config(&config)).await?;
            let pool = store.pool().clone();
            let store: Arc<dyn DocumentStore> = Arc::new(store);
            (store, Some(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; job history is kept in memory only");
            let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
            (store, None)
        }
    };

    let jobs = dsched_core::load_jobs_file(&config.jobs_path)?;
    let registry = scheduler::build_registry(&config, store, &jobs).await?;
    registry.start().await?;

    let app = build_app(AppState {
        registry: Arc::clone(&registry),
        pool,
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "status api listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.shutdown(true).await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
