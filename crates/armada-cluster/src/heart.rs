//! Machine liveness registration.
//!
//! The heart owns the local machine's record in the registry. Registration
//! and beats both publish the record under the agent TTL; if beats stop, the
//! record expires and the rest of the cluster treats the machine as absent.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use armada_core::Result;

use crate::machine::LocalMachine;
use crate::registry::Registry;

/// Publishes the local machine's liveness record.
#[derive(Clone)]
pub struct Heart {
    registry: Registry,
    machine: Arc<LocalMachine>,
}

impl Heart {
    /// Creates a heart for the local machine.
    #[must_use]
    pub fn new(registry: Registry, machine: Arc<LocalMachine>) -> Self {
        Self { registry, machine }
    }

    /// Registers the machine for the first time.
    pub async fn register(&self, ttl: Duration) -> Result<()> {
        let state = self.machine.state()?;
        self.registry.set_machine_state(&state, ttl).await?;
        debug!(machine = %state.id, "machine registered");
        Ok(())
    }

    /// Refreshes the machine record, retaining the same identity and TTL
    /// discipline as registration.
    pub async fn beat(&self, ttl: Duration) -> Result<()> {
        let state = self.machine.state()?;
        self.registry.set_machine_state(&state, ttl).await
    }

    /// Deletes the machine record.
    pub async fn clear(&self) -> Result<()> {
        self.registry.remove_machine_state(&self.machine.id()).await
    }
}
