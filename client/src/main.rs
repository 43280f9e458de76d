//! tasksync - keeps a local task store in sync with a remote task API.
//!
//! Opens the local store, then runs the sync driver until interrupted.

use std::sync::Arc;
use tasksync_client::{
    Config, Connectivity, HttpTaskApi, LocalStore, ReplayGate, SyncDriver, SyncEngine,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tasksync=info,tasksync_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        api_url = %config.api_url,
        database_url = %config.database_url,
        "Starting tasksync"
    );

    let store = LocalStore::open(&config.database_url).await?;
    let remote = Arc::new(HttpTaskApi::from_config(&config)?);

    // Detection is left to the embedder; assume the network is up.
    let connectivity = Connectivity::new(true);
    let gate = ReplayGate::new();

    let engine = SyncEngine::new(store.clone(), remote, gate, config.retry);
    let handle = SyncDriver::new(engine, connectivity, config.sync_interval).spawn();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    handle.shutdown().await;
    store.close().await;

    Ok(())
}
