//! The local unit manager contract.
//!
//! The unit manager is the per-node service supervisor armada drives but does
//! not implement: a systemd-style collaborator that loads, starts, stops, and
//! unloads units. The only guarantee armada requires is that [`units`]
//! reflects completed calls.
//!
//! [`units`]: UnitManager::units

pub mod memory;

use async_trait::async_trait;
use tokio::sync::broadcast;

use armada_core::{ContentHash, Result, UnitName};

/// One unit's state as reported by the local manager.
///
/// The load/active/sub states are the manager's own vocabulary; armada only
/// interprets `active_state == "active"` as running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedUnitState {
    /// The unit being reported.
    pub name: UnitName,
    /// Manager load state (e.g. "loaded").
    pub load_state: String,
    /// Manager active state (e.g. "active", "inactive").
    pub active_state: String,
    /// Manager sub state (e.g. "running", "dead").
    pub sub_state: String,
    /// Hash of the contents the manager is holding, when known.
    pub content_hash: Option<ContentHash>,
}

impl ManagedUnitState {
    /// Returns true if the manager reports the unit as running.
    #[must_use]
    pub fn is_launched(&self) -> bool {
        self.active_state == "active"
    }
}

/// Capability interface over the per-node service supervisor.
///
/// All operations are per-unit and independent: a failure on one unit never
/// implies anything about another.
#[async_trait]
pub trait UnitManager: Send + Sync {
    /// Makes the unit known to the manager without starting it.
    async fn load(&self, name: &UnitName, contents: &str) -> Result<()>;

    /// Removes the unit from the manager entirely.
    async fn unload(&self, name: &UnitName) -> Result<()>;

    /// Starts a loaded unit.
    async fn start(&self, name: &UnitName) -> Result<()>;

    /// Stops a running unit, leaving it loaded.
    async fn stop(&self, name: &UnitName) -> Result<()>;

    /// Lists the current state of every loaded unit.
    ///
    /// Reflects all completed `load`/`start`/`stop`/`unload` calls.
    async fn units(&self) -> Result<Vec<ManagedUnitState>>;

    /// Subscribes to unit-changed notifications.
    fn subscribe(&self) -> broadcast::Receiver<UnitName>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_state_drives_is_launched() {
        let mut state = ManagedUnitState {
            name: "web.service".parse().unwrap(),
            load_state: "loaded".into(),
            active_state: "active".into(),
            sub_state: "running".into(),
            content_hash: None,
        };
        assert!(state.is_launched());

        state.active_state = "inactive".into();
        assert!(!state.is_launched());
    }
}
