//! Unit-state generation and publication.
//!
//! The generator samples the local unit manager and emits heartbeat messages;
//! the publisher turns them into TTL-guarded registry writes. The publisher
//! is the only writer of observation records for its machine, and a unit
//! that stops being reported expires from the store on its own.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use armada_core::{Error, Result, UnitName, UnitStateObservation};

use crate::machine::LocalMachine;
use crate::manager::{ManagedUnitState, UnitManager};
use crate::registry::Registry;

/// One sampled unit state, or `None` when the unit disappeared locally.
#[derive(Debug, Clone)]
pub struct UnitStateHeartbeat {
    /// The unit being reported.
    pub name: UnitName,
    /// The sampled state; `None` retracts the unit's observation.
    pub state: Option<ManagedUnitState>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::fatal("generator lock poisoned")
}

/// Samples the local unit manager and produces heartbeats.
pub struct UnitStateGenerator {
    manager: Arc<dyn UnitManager>,
    interval: Duration,
    seen: Mutex<HashSet<UnitName>>,
}

impl UnitStateGenerator {
    /// Creates a generator sampling at the given interval.
    #[must_use]
    pub fn new(manager: Arc<dyn UnitManager>, interval: Duration) -> Self {
        Self {
            manager,
            interval,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Runs until shutdown, emitting heartbeats on ticks and manager events.
    pub async fn run(
        &self,
        tx: mpsc::Sender<UnitStateHeartbeat>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut manager_events = self.manager.subscribe();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = manager_events.recv() => {}
                _ = shutdown.changed() => break,
            }

            match self.generate().await {
                Ok(heartbeats) => {
                    for heartbeat in heartbeats {
                        if tx.send(heartbeat).await.is_err() {
                            // Publisher is gone; nothing left to report to.
                            return;
                        }
                    }
                }
                Err(err) => warn!(error = %err, "failed to sample unit manager"),
            }
        }
    }

    /// Samples the manager once.
    ///
    /// Emits one `Some` heartbeat per present unit and one final `None` for
    /// every unit that was reported before but has since disappeared.
    pub async fn generate(&self) -> Result<Vec<UnitStateHeartbeat>> {
        let states = self.manager.units().await?;

        let mut seen = self.seen.lock().map_err(poison_err)?;
        let current: HashSet<UnitName> = states.iter().map(|s| s.name.clone()).collect();

        let mut heartbeats: Vec<UnitStateHeartbeat> = states
            .into_iter()
            .map(|state| UnitStateHeartbeat {
                name: state.name.clone(),
                state: Some(state),
            })
            .collect();

        for gone in seen.difference(&current) {
            heartbeats.push(UnitStateHeartbeat {
                name: gone.clone(),
                state: None,
            });
        }

        *seen = current;
        Ok(heartbeats)
    }
}

/// Publishes heartbeats as TTL-guarded observation records.
pub struct UnitStatePublisher {
    registry: Registry,
    machine: Arc<LocalMachine>,
    ttl: Duration,
}

impl UnitStatePublisher {
    /// Creates a publisher writing under the given TTL.
    #[must_use]
    pub fn new(registry: Registry, machine: Arc<LocalMachine>, ttl: Duration) -> Self {
        Self {
            registry,
            machine,
            ttl,
        }
    }

    /// Consumes heartbeats until shutdown.
    pub async fn run(
        &self,
        mut rx: mpsc::Receiver<UnitStateHeartbeat>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                heartbeat = rx.recv() => {
                    let Some(heartbeat) = heartbeat else { break };
                    if let Err(err) = self.publish(&heartbeat).await {
                        warn!(unit = %heartbeat.name, error = %err,
                              "failed to publish unit state");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    /// Publishes one heartbeat.
    pub async fn publish(&self, heartbeat: &UnitStateHeartbeat) -> Result<()> {
        let machine_id = self.machine.id();
        match &heartbeat.state {
            Some(state) => {
                let observation = UnitStateObservation {
                    name: state.name.clone(),
                    load_state: state.load_state.clone(),
                    active_state: state.active_state.clone(),
                    sub_state: state.sub_state.clone(),
                    machine_id,
                    content_hash: state.content_hash.clone(),
                };
                self.registry.save_unit_state(&observation, self.ttl).await
            }
            None => {
                self.registry
                    .remove_unit_state(&heartbeat.name, &machine_id)
                    .await
            }
        }
    }

    /// Deletes every observation record for the local machine.
    pub async fn purge(&self) {
        let machine_id = self.machine.id();
        let states = match self.registry.unit_states().await {
            Ok(states) => states,
            Err(err) => {
                warn!(error = %err, "cannot list observations for purge");
                return;
            }
        };

        for observation in states {
            if observation.machine_id != machine_id {
                continue;
            }
            debug!(unit = %observation.name, "purging observation");
            if let Err(err) = self
                .registry
                .remove_unit_state(&observation.name, &machine_id)
                .await
            {
                warn!(unit = %observation.name, error = %err,
                      "failed to purge observation");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::memory::InMemoryUnitManager;
    use crate::store::memory::InMemoryStore;
    use armada_core::{MachineId, MachineState};

    struct Fixture {
        manager: Arc<InMemoryUnitManager>,
        generator: UnitStateGenerator,
        publisher: UnitStatePublisher,
        registry: Registry,
        machine_id: MachineId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let registry = Registry::new(store, "/armada/", Duration::from_secs(1));
        let manager = Arc::new(InMemoryUnitManager::new());
        let machine = Arc::new(LocalMachine::new(MachineState::new(MachineId::generate())));
        let machine_id = machine.id();
        Fixture {
            manager: manager.clone(),
            generator: UnitStateGenerator::new(manager, Duration::from_secs(5)),
            publisher: UnitStatePublisher::new(registry.clone(), machine, Duration::from_secs(30)),
            registry,
            machine_id,
        }
    }

    fn name(s: &str) -> UnitName {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn generator_reports_present_units() -> Result<()> {
        let fx = fixture();
        fx.manager.load(&name("web.service"), "contents").await?;
        fx.manager.start(&name("web.service")).await?;

        let heartbeats = fx.generator.generate().await?;
        assert_eq!(heartbeats.len(), 1);
        let state = heartbeats[0].state.as_ref().expect("state");
        assert!(state.is_launched());
        Ok(())
    }

    #[tokio::test]
    async fn generator_retracts_disappeared_units() -> Result<()> {
        let fx = fixture();
        fx.manager.load(&name("web.service"), "contents").await?;
        fx.generator.generate().await?;

        fx.manager.unload(&name("web.service")).await?;
        let heartbeats = fx.generator.generate().await?;
        assert_eq!(heartbeats.len(), 1);
        assert!(heartbeats[0].state.is_none());

        // Retractions are one-shot.
        assert!(fx.generator.generate().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn publisher_writes_and_retracts_observations() -> Result<()> {
        let fx = fixture();
        fx.manager.load(&name("web.service"), "contents").await?;

        for heartbeat in fx.generator.generate().await? {
            fx.publisher.publish(&heartbeat).await?;
        }
        let states = fx.registry.unit_states().await?;
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].machine_id, fx.machine_id);

        fx.manager.unload(&name("web.service")).await?;
        for heartbeat in fx.generator.generate().await? {
            fx.publisher.publish(&heartbeat).await?;
        }
        assert!(fx.registry.unit_states().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn purge_removes_only_this_machines_records() -> Result<()> {
        let fx = fixture();
        fx.manager.load(&name("web.service"), "contents").await?;
        for heartbeat in fx.generator.generate().await? {
            fx.publisher.publish(&heartbeat).await?;
        }

        // A record from another machine must survive the purge.
        let other = UnitStateObservation {
            name: name("db.service"),
            load_state: "loaded".into(),
            active_state: "active".into(),
            sub_state: "running".into(),
            machine_id: MachineId::generate(),
            content_hash: None,
        };
        fx.registry
            .save_unit_state(&other, Duration::from_secs(30))
            .await?;

        fx.publisher.purge().await;

        let states = fx.registry.unit_states().await?;
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].name, name("db.service"));
        Ok(())
    }
}
