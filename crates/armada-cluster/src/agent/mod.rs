//! Per-machine agent: drives the local unit manager to match desired state.

mod publisher;
mod reconciler;

pub use publisher::{UnitStateGenerator, UnitStateHeartbeat, UnitStatePublisher};
pub use reconciler::{calculate_tasks, AgentReconciler, AgentTask, TaskOp};

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tracing::warn;

use armada_core::{Error, MachineId, MachineState, Result, TargetState, Unit, UnitName};

use crate::machine::LocalMachine;
use crate::manager::UnitManager;
use crate::registry::Registry;

/// Tracks the target states this agent has successfully driven, keyed by
/// unit name. Consulted on purge so teardown covers exactly the units this
/// process touched.
#[derive(Debug, Default)]
struct AgentCache {
    units: RwLock<HashMap<UnitName, TargetState>>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::fatal("agent cache lock poisoned")
}

impl AgentCache {
    fn set_target_state(&self, name: &UnitName, state: TargetState) -> Result<()> {
        let mut units = self.units.write().map_err(poison_err)?;
        units.insert(name.clone(), state);
        Ok(())
    }

    fn drop_target_state(&self, name: &UnitName) -> Result<()> {
        let mut units = self.units.write().map_err(poison_err)?;
        units.remove(name);
        Ok(())
    }

    fn driven_units(&self) -> Result<Vec<(UnitName, TargetState)>> {
        let units = self.units.read().map_err(poison_err)?;
        let mut driven: Vec<_> = units.iter().map(|(n, s)| (n.clone(), *s)).collect();
        driven.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(driven)
    }
}

/// The per-machine agent.
///
/// Owns the unit manager handle and a cache of what it has driven; the
/// reconciler decides what to do, the agent does it.
pub struct Agent {
    manager: Arc<dyn UnitManager>,
    registry: Registry,
    machine: Arc<LocalMachine>,
    ttl: Duration,
    cache: AgentCache,
}

impl Agent {
    /// Creates an agent for the local machine.
    #[must_use]
    pub fn new(
        manager: Arc<dyn UnitManager>,
        registry: Registry,
        machine: Arc<LocalMachine>,
        ttl: Duration,
    ) -> Self {
        Self {
            manager,
            registry,
            machine,
            ttl,
            cache: AgentCache::default(),
        }
    }

    /// Returns this agent's machine ID.
    #[must_use]
    pub fn machine_id(&self) -> MachineId {
        self.machine.id()
    }

    /// Returns a snapshot of the local machine state.
    pub fn machine_state(&self) -> Result<MachineState> {
        self.machine.state()
    }

    /// Returns the unit manager handle.
    #[must_use]
    pub fn manager(&self) -> &Arc<dyn UnitManager> {
        &self.manager
    }

    /// Loads a unit into the local manager.
    pub async fn load_unit(&self, unit: &Unit) -> Result<()> {
        self.manager.load(&unit.name, &unit.contents).await?;
        self.cache.set_target_state(&unit.name, TargetState::Loaded)
    }

    /// Starts a loaded unit.
    pub async fn start_unit(&self, name: &UnitName) -> Result<()> {
        self.manager.start(name).await?;
        self.cache.set_target_state(name, TargetState::Launched)
    }

    /// Stops a running unit, leaving it loaded.
    pub async fn stop_unit(&self, name: &UnitName) -> Result<()> {
        self.manager.stop(name).await?;
        self.cache.set_target_state(name, TargetState::Loaded)
    }

    /// Unloads a unit from the local manager.
    pub async fn unload_unit(&self, name: &UnitName) -> Result<()> {
        self.manager.unload(name).await?;
        self.cache.drop_target_state(name)
    }

    /// Returns the units this agent has driven, sorted by name.
    pub fn driven_units(&self) -> Result<Vec<(UnitName, TargetState)>> {
        self.cache.driven_units()
    }

    /// Publishes the machine record at half the liveness TTL until shutdown.
    ///
    /// This keeps attribute changes (metadata edits) visible to the engine;
    /// the monitor independently beats the same record for health checking.
    pub async fn heartbeat(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.ttl / 2);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let state = match self.machine.state() {
                        Ok(state) => state,
                        Err(err) => {
                            warn!(error = %err, "failed to snapshot machine state");
                            continue;
                        }
                    };
                    if let Err(err) = self.registry.set_machine_state(&state, self.ttl).await {
                        warn!(error = %err, "failed to publish machine state");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}
