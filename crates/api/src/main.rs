//! Collabsphere API server

use std::sync::Arc;

use anyhow::Context;
use collabsphere_api::{
    logging, routes::create_router, AppState, ChatStore, Config, Hub, HubConfig, MemoryStore, PgStore,
};
use collabsphere_shared::{create_pool, run_migrations};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;
    logging::init(&config.log_level, &config.log_format).context("Failed to install tracing subscriber")?;

    tracing::info!(bind_address = %config.bind_address, "Starting collabsphere");

    let store: Arc<dyn ChatStore> = match &config.database_url {
        Some(url) => {
            let pool = create_pool(url, config.database_max_connections)
                .await
                .context("Failed to connect to database")?;
            run_migrations(&pool).await.context("Failed to run migrations")?;
            tracing::info!("Using Postgres store");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store; nothing will be persisted");
            Arc::new(MemoryStore::new())
        }
    };

    let (hub, hub_task) = Hub::spawn(Arc::clone(&store), HubConfig::from(&config));
    let grace = config.shutdown_grace();
    let bind_address = config.bind_address.clone();

    let state = AppState::new(config, store, hub.clone());
    let app = create_router(state);

    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;
    tracing::info!(address = %bind_address, "Listening");

    let shutdown_hub = hub.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received");
            if let Err(e) = shutdown_hub.shutdown(grace).await {
                tracing::warn!(error = %e, "Hub already stopped");
            }
        })
        .await
        .context("Server error")?;

    drop(hub);
    if tokio::time::timeout(grace, hub_task).await.is_err() {
        tracing::warn!("Hub did not stop within the grace period");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Error setting up Ctrl+C handler");
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
                tracing::error!(error = %e, "Error setting up SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
