//! Typed registry façade over the shared store.
//!
//! The registry is the only component that knows the store's key layout and
//! value encodings. Every operation is:
//!
//! - **Typed**: callers see [`Unit`], [`MachineState`], [`ScheduledUnit`],
//!   and [`UnitStateObservation`], never raw keys or JSON
//! - **Instrumented**: counted and timed under
//!   `armada_registry_operation_*{op ∈ get, set, get_all}`
//! - **Bounded**: wrapped in the configured per-request timeout; an elapsed
//!   timeout surfaces as a `Transient` error for the caller's backoff loop

mod events;

pub use events::{ClusterEvent, ClusterEventStream};

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use armada_core::keys::ParsedKey;
use armada_core::{
    ContentHash, Error, MachineId, MachineKey, MachineState, Placement, Result, ScheduledUnit,
    TargetState, Unit, UnitKey, UnitName, UnitStateObservation,
};

use crate::metrics::{ClusterMetrics, RegistryOp, TimingGuard};
use crate::store::{KeyValueStore, PutOptions, WritePrecondition};

/// The unit descriptor as stored under `units/<name>/object`.
///
/// The desired state lives in its own key so operators can flip it without
/// rewriting the descriptor.
#[derive(Debug, Serialize, Deserialize)]
struct UnitRecord {
    name: UnitName,
    contents: String,
    content_hash: ContentHash,
    #[serde(default)]
    placement: Placement,
}

/// Typed operations over the shared strongly-consistent store.
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
    request_timeout: Duration,
    metrics: ClusterMetrics,
}

impl Registry {
    /// Creates a registry over the given store.
    ///
    /// `prefix` is prepended to every key; `request_timeout` bounds each
    /// store call.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: &str, request_timeout: Duration) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
            request_timeout,
            metrics: ClusterMetrics::new(),
        }
    }

    fn key(&self, relative: impl AsRef<str>) -> String {
        format!("{}{}", self.prefix, relative.as_ref())
    }

    /// Runs a store operation under the request timeout, recording metrics.
    ///
    /// Successful operations report their latency via the timing guard;
    /// failures disarm it and count against the failure counter instead.
    async fn timed<T, Fut>(&self, op: RegistryOp, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>> + Send,
    {
        let metrics = self.metrics.clone();
        let mut timer = TimingGuard::new(move |duration| {
            metrics.record_registry_op(op, duration);
        });

        let result = match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::transient("registry request timed out")),
        };
        if result.is_err() {
            timer.cancel();
            self.metrics.record_registry_op_failure(op);
        }
        result
    }

    // --- Unit Operations ---

    /// Lists all units with their desired states, sorted by name.
    pub async fn units(&self) -> Result<Vec<Unit>> {
        let entries = self
            .timed(RegistryOp::GetAll, self.store.list(&self.key(UnitKey::dir())))
            .await?;

        let mut records: BTreeMap<UnitName, UnitRecord> = BTreeMap::new();
        let mut targets: BTreeMap<UnitName, TargetState> = BTreeMap::new();
        for entry in entries {
            let Some(relative) = entry.key.strip_prefix(&self.prefix) else {
                continue;
            };
            match ParsedKey::parse(relative) {
                Some(ParsedKey::UnitObject(name)) => {
                    let record: UnitRecord = serde_json::from_str(&entry.value)?;
                    records.insert(name, record);
                }
                Some(ParsedKey::UnitTargetState(name)) => {
                    let state: TargetState = serde_json::from_str(&entry.value)?;
                    targets.insert(name, state);
                }
                _ => {}
            }
        }

        Ok(records
            .into_iter()
            .map(|(name, record)| {
                let target_state = targets.get(&name).copied().unwrap_or_default();
                Unit {
                    name,
                    contents: record.contents,
                    content_hash: record.content_hash,
                    target_state,
                    placement: record.placement,
                }
            })
            .collect())
    }

    /// Gets a single unit with its desired state.
    pub async fn unit(&self, name: &UnitName) -> Result<Option<Unit>> {
        let object = self
            .timed(
                RegistryOp::Get,
                self.store.get(&self.key(UnitKey::object(name))),
            )
            .await?;
        let Some(object) = object else {
            return Ok(None);
        };
        let record: UnitRecord = serde_json::from_str(&object.value)?;

        let target = self
            .timed(
                RegistryOp::Get,
                self.store.get(&self.key(UnitKey::target_state(name))),
            )
            .await?;
        let target_state = match target {
            Some(entry) => serde_json::from_str(&entry.value)?,
            None => TargetState::default(),
        };

        Ok(Some(Unit {
            name: record.name,
            contents: record.contents,
            content_hash: record.content_hash,
            target_state,
            placement: record.placement,
        }))
    }

    /// Creates a unit. Fails with `PreconditionFailed` if the name is taken.
    pub async fn create_unit(&self, unit: &Unit) -> Result<()> {
        let record = UnitRecord {
            name: unit.name.clone(),
            contents: unit.contents.clone(),
            content_hash: unit.content_hash.clone(),
            placement: unit.placement.clone(),
        };
        let value = serde_json::to_string(&record)?;
        self.timed(
            RegistryOp::Set,
            self.store.put(
                &self.key(UnitKey::object(&unit.name)),
                &value,
                PutOptions::new().must_not_exist(),
            ),
        )
        .await?;

        self.set_unit_target_state(&unit.name, unit.target_state)
            .await
    }

    /// Destroys a unit: descriptor, desired state, binding, and observations.
    pub async fn destroy_unit(&self, name: &UnitName) -> Result<()> {
        let entries = self
            .timed(
                RegistryOp::GetAll,
                self.store.list(&self.key(UnitKey::unit_dir(name))),
            )
            .await?;
        for entry in entries {
            self.timed(
                RegistryOp::Set,
                self.store.delete(&entry.key, WritePrecondition::None),
            )
            .await?;
        }
        Ok(())
    }

    /// Sets a unit's desired state.
    pub async fn set_unit_target_state(
        &self,
        name: &UnitName,
        state: TargetState,
    ) -> Result<()> {
        let value = serde_json::to_string(&state)?;
        self.timed(
            RegistryOp::Set,
            self.store
                .put(&self.key(UnitKey::target_state(name)), &value, PutOptions::new()),
        )
        .await?;
        Ok(())
    }

    // --- Binding Operations ---

    /// Lists bindings for all non-global units, sorted by name.
    ///
    /// The observed runtime state is derived from the bound machine's
    /// observation, when one exists.
    pub async fn scheduled_units(&self) -> Result<Vec<ScheduledUnit>> {
        let entries = self
            .timed(RegistryOp::GetAll, self.store.list(&self.key(UnitKey::dir())))
            .await?;

        let mut globals: BTreeMap<UnitName, bool> = BTreeMap::new();
        let mut bindings: BTreeMap<UnitName, MachineId> = BTreeMap::new();
        let mut observations: BTreeMap<(UnitName, MachineId), UnitStateObservation> =
            BTreeMap::new();
        for entry in &entries {
            let Some(relative) = entry.key.strip_prefix(&self.prefix) else {
                continue;
            };
            match ParsedKey::parse(relative) {
                Some(ParsedKey::UnitObject(name)) => {
                    let record: UnitRecord = serde_json::from_str(&entry.value)?;
                    globals.insert(name, record.placement.global);
                }
                Some(ParsedKey::UnitTargetMachine(name)) => {
                    let machine: MachineId = serde_json::from_str(&entry.value)?;
                    bindings.insert(name, machine);
                }
                Some(ParsedKey::UnitState(name, machine)) => {
                    let obs: UnitStateObservation = serde_json::from_str(&entry.value)?;
                    observations.insert((name, machine), obs);
                }
                _ => {}
            }
        }

        Ok(globals
            .into_iter()
            .filter(|(_, global)| !global)
            .map(|(name, _)| {
                let mut record = ScheduledUnit::unbound(name);
                record.target_machine = bindings.get(&record.name).copied();
                if let Some(machine) = record.target_machine {
                    record.state = observations
                        .get(&(record.name.clone(), machine))
                        .map(observed_state);
                }
                record
            })
            .collect())
    }

    /// Binds a unit to a machine.
    ///
    /// Guarded by a create precondition: when two engines race, exactly one
    /// write wins and the loser sees `PreconditionFailed`.
    pub async fn schedule_unit(&self, name: &UnitName, machine: &MachineId) -> Result<()> {
        let value = serde_json::to_string(machine)?;
        self.timed(
            RegistryOp::Set,
            self.store.put(
                &self.key(UnitKey::target_machine(name)),
                &value,
                PutOptions::new().must_not_exist(),
            ),
        )
        .await?;
        Ok(())
    }

    /// Clears a unit's binding. A no-op if the unit is already unbound.
    pub async fn unschedule_unit(&self, name: &UnitName) -> Result<()> {
        self.timed(
            RegistryOp::Set,
            self.store
                .delete(&self.key(UnitKey::target_machine(name)), WritePrecondition::None),
        )
        .await?;
        Ok(())
    }

    // --- Machine Operations ---

    /// Lists present machines, sorted by ID.
    pub async fn machines(&self) -> Result<Vec<MachineState>> {
        let entries = self
            .timed(
                RegistryOp::GetAll,
                self.store.list(&self.key(MachineKey::dir())),
            )
            .await?;
        entries
            .iter()
            .map(|entry| serde_json::from_str(&entry.value).map_err(Error::from))
            .collect()
    }

    /// Publishes a machine record under the liveness TTL.
    pub async fn set_machine_state(&self, state: &MachineState, ttl: Duration) -> Result<()> {
        let value = serde_json::to_string(state)?;
        self.timed(
            RegistryOp::Set,
            self.store.put(
                &self.key(MachineKey::record(&state.id)),
                &value,
                PutOptions::new().with_ttl(ttl),
            ),
        )
        .await?;
        Ok(())
    }

    /// Removes a machine record.
    pub async fn remove_machine_state(&self, id: &MachineId) -> Result<()> {
        self.timed(
            RegistryOp::Set,
            self.store
                .delete(&self.key(MachineKey::record(id)), WritePrecondition::None),
        )
        .await?;
        Ok(())
    }

    // --- Observation Operations ---

    /// Lists all unit state observations.
    pub async fn unit_states(&self) -> Result<Vec<UnitStateObservation>> {
        let entries = self
            .timed(RegistryOp::GetAll, self.store.list(&self.key(UnitKey::dir())))
            .await?;

        let mut states = Vec::new();
        for entry in entries {
            let Some(relative) = entry.key.strip_prefix(&self.prefix) else {
                continue;
            };
            if let Some(ParsedKey::UnitState(..)) = ParsedKey::parse(relative) {
                states.push(serde_json::from_str(&entry.value)?);
            }
        }
        Ok(states)
    }

    /// Saves one machine's observation of a unit under the given TTL.
    pub async fn save_unit_state(
        &self,
        observation: &UnitStateObservation,
        ttl: Duration,
    ) -> Result<()> {
        let value = serde_json::to_string(observation)?;
        self.timed(
            RegistryOp::Set,
            self.store.put(
                &self.key(UnitKey::state(&observation.name, &observation.machine_id)),
                &value,
                PutOptions::new().with_ttl(ttl),
            ),
        )
        .await?;
        Ok(())
    }

    /// Removes one machine's observation of a unit.
    pub async fn remove_unit_state(&self, name: &UnitName, machine: &MachineId) -> Result<()> {
        self.timed(
            RegistryOp::Set,
            self.store
                .delete(&self.key(UnitKey::state(name, machine)), WritePrecondition::None),
        )
        .await?;
        Ok(())
    }

    // --- Events ---

    /// Subscribes to typed cluster change notifications.
    #[must_use]
    pub fn subscribe(&self) -> ClusterEventStream {
        ClusterEventStream::new(self.store.subscribe(), self.prefix.clone())
    }
}

/// Maps a manager observation onto the coarse unit lifecycle.
fn observed_state(observation: &UnitStateObservation) -> TargetState {
    if observation.active_state == "active" {
        TargetState::Launched
    } else {
        TargetState::Loaded
    }
}
