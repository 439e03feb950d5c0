//! Bindings and observed unit state.

use serde::{Deserialize, Serialize};

use crate::id::{MachineId, UnitName};
use crate::unit::{ContentHash, TargetState};

/// The association of a unit with a machine, plus the last observed runtime
/// state. Exists only for non-global units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledUnit {
    /// The unit this binding is for.
    pub name: UnitName,

    /// The machine the unit is bound to; `None` means unbound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_machine: Option<MachineId>,

    /// The most recently observed runtime state, if any agent has reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<TargetState>,
}

impl ScheduledUnit {
    /// Creates an unbound record for a unit.
    #[must_use]
    pub const fn unbound(name: UnitName) -> Self {
        Self {
            name,
            target_machine: None,
            state: None,
        }
    }

    /// Returns true if the unit is bound to a machine.
    #[must_use]
    pub const fn is_scheduled(&self) -> bool {
        self.target_machine.is_some()
    }
}

/// A per-agent report of a unit's runtime status.
///
/// The load/active/sub states are free-form strings from the local unit
/// manager; armada stores and forwards them without interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStateObservation {
    /// The unit being reported on.
    pub name: UnitName,

    /// Manager load state (e.g. "loaded").
    pub load_state: String,

    /// Manager active state (e.g. "active").
    pub active_state: String,

    /// Manager sub state (e.g. "running").
    pub sub_state: String,

    /// The machine making the report.
    pub machine_id: MachineId,

    /// Hash of the contents the agent actually loaded, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<ContentHash>,
}
