//! Typed cluster change notifications.
//!
//! Adapts the store's raw change stream into events the control loops care
//! about. Keys that do not parse as part of the registry layout (including
//! lease churn) are dropped here so downstream loops never see them.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use armada_core::keys::ParsedKey;
use armada_core::{MachineId, UnitName};

use crate::store::{StoreEvent, StoreEventKind};

/// A cluster-level change notification.
///
/// Delivery is at-least-once; consecutive changes to the same key may be
/// coalesced. Consumers treat every event as "something changed, reconcile",
/// never as a precise delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    /// A unit descriptor was created.
    UnitCreated(UnitName),
    /// A unit descriptor was removed.
    UnitDestroyed(UnitName),
    /// A unit's desired state changed.
    TargetStateChanged(UnitName),
    /// A unit's binding was written or cleared.
    BindingChanged(UnitName),
    /// A machine's observation of a unit changed or expired.
    UnitStateChanged(UnitName, MachineId),
    /// A machine record was created or refreshed.
    MachineChanged(MachineId),
    /// A machine record was deleted or expired.
    MachineGone(MachineId),
    /// The receiver lagged and events were dropped; consumers must run a
    /// full reconcile pass rather than trust incremental state.
    Resync,
}

/// A stream of [`ClusterEvent`]s derived from the store's change feed.
pub struct ClusterEventStream {
    rx: broadcast::Receiver<StoreEvent>,
    prefix: String,
}

impl ClusterEventStream {
    pub(crate) fn new(rx: broadcast::Receiver<StoreEvent>, prefix: String) -> Self {
        Self { rx, prefix }
    }

    /// Receives the next cluster event, or `None` once the store shuts down.
    pub async fn next(&mut self) -> Option<ClusterEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if let Some(mapped) = self.map(&event) {
                        return Some(mapped);
                    }
                }
                Err(RecvError::Lagged(_)) => return Some(ClusterEvent::Resync),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    fn map(&self, event: &StoreEvent) -> Option<ClusterEvent> {
        let relative = event.key.strip_prefix(&self.prefix)?;
        let removed = matches!(event.kind, StoreEventKind::Delete | StoreEventKind::Expire);

        match ParsedKey::parse(relative)? {
            ParsedKey::Machine(id) => Some(if removed {
                ClusterEvent::MachineGone(id)
            } else {
                ClusterEvent::MachineChanged(id)
            }),
            ParsedKey::UnitObject(name) => Some(if removed {
                ClusterEvent::UnitDestroyed(name)
            } else {
                ClusterEvent::UnitCreated(name)
            }),
            ParsedKey::UnitTargetState(name) => Some(ClusterEvent::TargetStateChanged(name)),
            ParsedKey::UnitTargetMachine(name) => Some(ClusterEvent::BindingChanged(name)),
            ParsedKey::UnitState(name, machine) => {
                Some(ClusterEvent::UnitStateChanged(name, machine))
            }
            ParsedKey::Lease(_) => None,
        }
    }
}
