//! # armada-cluster
//!
//! Control-plane core for the armada cluster unit manager.
//!
//! A fleet of machines collectively runs named service units. This crate
//! implements the two coupled control loops that keep the cluster converged,
//! and the shared-truth store contract they coordinate through:
//!
//! - **Engine**: one elected leader reconciles desired unit state against
//!   observed cluster state and writes scheduling decisions
//! - **Agent**: one per machine, drives the local unit manager to match the
//!   bindings for its machine and publishes observed state back
//! - **Heart/Monitor**: machine liveness registration and health-check
//!   supervision with cooperative restart
//! - **Registry**: typed, instrumented operations over the shared
//!   strongly-consistent key/value store
//!
//! ## Guarantees
//!
//! - **Convergence, not lockstep**: a unit may briefly run on zero or two
//!   machines across a failover window; every reconcile round moves the
//!   cluster toward the desired state
//! - **CAS-serialized decisions**: competing engine leaders are tolerated;
//!   the store's compare-and-swap arbitrates, and the loser abandons its round
//! - **Poll-only correctness**: the store event stream is an optimization;
//!   every invariant is restored by periodic reconciliation alone
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use armada_cluster::config::Config;
//! use armada_cluster::manager::memory::InMemoryUnitManager;
//! use armada_cluster::server::Server;
//! use armada_cluster::store::memory::InMemoryStore;
//! use tokio::sync::watch;
//!
//! # async fn run() -> armada_core::Result<()> {
//! let config = Config::from_env()?;
//! let store = Arc::new(InMemoryStore::new());
//! let manager = Arc::new(InMemoryUnitManager::new());
//! let server = Server::new(config, store, manager)?;
//!
//! let (_kill_tx, kill_rx) = watch::channel(false);
//! server.run(kill_rx).await
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod agent;
pub mod config;
pub mod engine;
pub mod heart;
pub mod lease;
pub mod machine;
pub mod manager;
pub mod metrics;
pub mod monitor;
pub mod registry;
pub mod server;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::agent::{Agent, AgentReconciler};
    pub use crate::config::Config;
    pub use crate::engine::{ClusterState, Engine};
    pub use crate::heart::Heart;
    pub use crate::lease::{Lease, LeaseManager};
    pub use crate::machine::LocalMachine;
    pub use crate::manager::{ManagedUnitState, UnitManager};
    pub use crate::metrics::ClusterMetrics;
    pub use crate::monitor::{Monitor, MonitorOutcome};
    pub use crate::registry::{ClusterEvent, Registry};
    pub use crate::server::Server;
    pub use crate::store::{KeyValueStore, PutOptions, StoreEvent, WritePrecondition};
}
