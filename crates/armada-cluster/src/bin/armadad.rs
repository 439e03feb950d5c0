//! armadad — the armada daemon.
//!
//! Runs the full per-machine assembly: heart, monitor, agent reconciler,
//! unit-state publisher, and (unless disabled) the engine. This binary wires
//! the in-memory store and unit manager for single-process standalone
//! deployments; production setups substitute real `KeyValueStore` and
//! `UnitManager` implementations at the same seams.
//!
//! Configuration comes from `ARMADA_*` environment variables; see
//! `armada_cluster::config`.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use armada_cluster::config::Config;
use armada_cluster::manager::memory::InMemoryUnitManager;
use armada_cluster::server::Server;
use armada_cluster::store::memory::InMemoryStore;
use armada_core::{init_logging, LogFormat, Result};

fn log_format_from_env() -> LogFormat {
    match std::env::var("ARMADA_LOG_FORMAT") {
        Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
        _ => LogFormat::Pretty,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(log_format_from_env());

    let config = Config::from_env()?;
    let store = Arc::new(InMemoryStore::new());
    let manager = Arc::new(InMemoryUnitManager::new());
    let server = Server::new(config, store, manager)?;

    let (kill_tx, kill_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; shutting down");
            let _ = kill_tx.send(true);
        }
    });

    server.run(kill_rx).await?;
    server.purge().await;
    Ok(())
}
