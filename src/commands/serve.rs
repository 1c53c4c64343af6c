use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;

use darkmap_api::AppState;
use darkmap_core::AppConfig;
use darkmap_search::SearchEngine;
use darkmap_storage::Storage;

pub async fn run(config: AppConfig, bind: Option<String>) -> Result<()> {
    let storage = Storage::with_pool_size(&config.database.url, config.database.max_connections).await?;
    storage.run_migrations().await?;

    let state = Arc::new(AppState {
        engine: SearchEngine::new(storage.pool().clone()),
        page_size: config.api.page_size,
    });

    let bind = bind.unwrap_or(config.api.bind);
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    let server = tokio::spawn(darkmap_api::serve(bind.clone(), state, shutdown_rx));

    signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());
    server.await??;

    info!("shutdown complete");
    Ok(())
}
