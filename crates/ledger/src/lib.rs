//! Wallet/ledger service: double-entry bookkeeping over integer
//! milli-units, deflationary monetary policy (transfer fees, demurrage),
//! and the device registry that links infrastructure uptime and zone XP to
//! task rewards.

pub mod model;
pub mod policy;
pub mod routes;
pub mod store;

use std::time::Duration;

use anyhow::Result;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use soms_config::LedgerConfig;

use crate::routes::AppState;
use crate::store::LedgerStore;

/// Run the ledger HTTP service and its demurrage ticker until the process
/// exits.
pub async fn serve(config: LedgerConfig) -> Result<()> {
    let store = LedgerStore::connect(&config.database_url).await?;

    let ticker_store = store.clone();
    let interval = Duration::from_secs(config.demurrage_interval_secs);
    tokio::spawn(async move {
        demurrage_loop(ticker_store, interval).await;
    });

    let app = routes::router(AppState::new(store)).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "ledger listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Periodic demurrage. Each cycle runs in its own database transaction;
/// failures are logged and the loop keeps ticking.
async fn demurrage_loop(store: LedgerStore, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        match store.apply_demurrage().await {
            Ok((wallets, burned)) => {
                info!(wallets, burned, "scheduled demurrage cycle complete");
            }
            Err(err) => error!(%err, "demurrage cycle failed"),
        }
    }
}
