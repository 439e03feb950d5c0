//! Machine records: identity and attributes of cluster members.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::id::MachineId;

/// The published state of a cluster machine.
///
/// Written to the shared store under a liveness TTL by the owning node; a
/// machine whose record has expired is considered absent from the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineState {
    /// Stable machine identity, self-assigned on first boot.
    pub id: MachineId,

    /// Publicly routable address of the machine.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub public_ip: String,

    /// Operator-supplied key/value metadata (e.g. region, role).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,

    /// Version of the daemon that published this record.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Declared capabilities of the machine.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub capabilities: BTreeSet<String>,
}

impl MachineState {
    /// Creates a machine state with no attributes.
    #[must_use]
    pub fn new(id: MachineId) -> Self {
        Self {
            id,
            public_ip: String::new(),
            metadata: BTreeMap::new(),
            version: String::new(),
            capabilities: BTreeSet::new(),
        }
    }

    /// Sets the public address.
    #[must_use]
    pub fn with_public_ip(mut self, public_ip: impl Into<String>) -> Self {
        self.public_ip = public_ip.into();
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns true if this machine satisfies the required metadata: for
    /// every key, the machine's value must be among the accepted values.
    #[must_use]
    pub fn has_metadata(&self, required: &BTreeMap<String, BTreeSet<String>>) -> bool {
        required.iter().all(|(key, accepted)| {
            self.metadata
                .get(key)
                .is_some_and(|value| accepted.contains(value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_requirement_always_matches() {
        let machine = MachineState::new(MachineId::generate());
        assert!(machine.has_metadata(&BTreeMap::new()));
    }

    #[test]
    fn requirement_needs_matching_value() {
        let machine = MachineState::new(MachineId::generate()).with_metadata("region", "eu");

        let mut required = BTreeMap::new();
        required.insert(
            "region".to_string(),
            ["eu".to_string()].into_iter().collect::<BTreeSet<_>>(),
        );
        assert!(machine.has_metadata(&required));

        required.insert(
            "role".to_string(),
            ["worker".to_string()].into_iter().collect(),
        );
        assert!(!machine.has_metadata(&required));
    }

    #[test]
    fn machine_state_roundtrips_through_json() {
        let machine = MachineState::new(MachineId::generate())
            .with_public_ip("10.0.0.7")
            .with_metadata("region", "eu");

        let json = serde_json::to_string(&machine).unwrap();
        let back: MachineState = serde_json::from_str(&json).unwrap();
        assert_eq!(machine, back);
    }
}
