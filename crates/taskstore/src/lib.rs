//! Task store service: persistent task lifecycle with deduplication, a
//! queue flag for the Brain-side scheduler, and the completion side effects
//! (device XP, bounty payment, bus report) that tie tasks to the wallet.

pub mod effects;
pub mod model;
pub mod routes;
pub mod store;

use std::sync::Arc;

use anyhow::Result;
use tower_http::trace::TraceLayer;
use tracing::info;

use soms_bus::Bus;
use soms_config::TaskStoreConfig;

use crate::effects::TaskEffects;
use crate::routes::AppState;
use crate::store::TaskStore;

/// Run the task store HTTP service until the process exits.
pub async fn serve(config: TaskStoreConfig, http: reqwest::Client, bus: Option<Bus>) -> Result<()> {
    let store = TaskStore::connect(&config.database_url).await?;
    let effects = Arc::new(TaskEffects::new(http, config.ledger_url.clone(), bus));
    let app = routes::router(AppState { store, effects }).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "task store listening");
    axum::serve(listener, app).await?;
    Ok(())
}
