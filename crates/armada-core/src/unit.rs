//! Units: declarative named service descriptions.
//!
//! A [`Unit`] is the operator-facing object: an opaque blob of service
//! configuration plus a desired [`TargetState`] and [`Placement`] constraints.
//! The content hash pins observations to the exact contents an agent loaded,
//! so a redeployed unit with new contents is distinguishable from a stale one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::id::UnitName;
use crate::placement::Placement;

/// The operator-requested state of a unit.
///
/// States are ordered: `Inactive < Loaded < Launched`. The agent uses the
/// ordering to decide whether a unit must be brought up or torn down.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum TargetState {
    /// The unit is known to the cluster but not placed anywhere.
    #[default]
    Inactive,
    /// The unit is loaded into the local unit manager but not running.
    Loaded,
    /// The unit is loaded and running.
    Launched,
}

impl TargetState {
    /// Returns the canonical lower-case string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Loaded => "loaded",
            Self::Launched => "launched",
        }
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TargetState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "inactive" => Ok(Self::Inactive),
            "loaded" => Ok(Self::Loaded),
            "launched" => Ok(Self::Launched),
            other => Err(Error::serialization(format!(
                "unknown target state '{other}'"
            ))),
        }
    }
}

/// A content hash over a unit's contents.
///
/// Stored in the short form `sha256:<first 16 bytes as hex>`, which is plenty
/// to detect drift while keeping registry values compact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Computes the hash of the given unit contents.
    #[must_use]
    pub fn of(contents: &str) -> Self {
        use std::fmt::Write;

        let mut hasher = Sha256::new();
        hasher.update(contents.as_bytes());
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(7 + 32);
        hex.push_str("sha256:");
        for byte in &digest[..16] {
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }

    /// Returns the hash string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named declarative description of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// Cluster-unique unit name.
    pub name: UnitName,

    /// Opaque unit contents, handed verbatim to the local unit manager.
    pub contents: String,

    /// Hash of `contents`, computed at creation time.
    pub content_hash: ContentHash,

    /// The operator-requested state.
    pub target_state: TargetState,

    /// Placement constraints evaluated by the engine and, for global units,
    /// by each agent independently.
    #[serde(default)]
    pub placement: Placement,
}

impl Unit {
    /// Creates a unit with default (empty) placement constraints.
    #[must_use]
    pub fn new(name: UnitName, contents: impl Into<String>, target_state: TargetState) -> Self {
        let contents = contents.into();
        let content_hash = ContentHash::of(&contents);
        Self {
            name,
            contents,
            content_hash,
            target_state,
            placement: Placement::default(),
        }
    }

    /// Sets the placement constraints.
    #[must_use]
    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    /// Returns true if this unit runs on every eligible machine.
    #[must_use]
    pub const fn is_global(&self) -> bool {
        self.placement.global
    }

    /// Returns the unit's scheduling weight (default 1).
    #[must_use]
    pub const fn weight(&self) -> u32 {
        self.placement.weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_state_ordering() {
        assert!(TargetState::Inactive < TargetState::Loaded);
        assert!(TargetState::Loaded < TargetState::Launched);
    }

    #[test]
    fn target_state_string_roundtrip() {
        for state in [
            TargetState::Inactive,
            TargetState::Loaded,
            TargetState::Launched,
        ] {
            let parsed: TargetState = state.as_str().parse().unwrap();
            assert_eq!(parsed, state);
        }
        assert!("running".parse::<TargetState>().is_err());
    }

    #[test]
    fn content_hash_is_deterministic() {
        let a = ContentHash::of("[Service]\nExecStart=/bin/true");
        let b = ContentHash::of("[Service]\nExecStart=/bin/true");
        let c = ContentHash::of("[Service]\nExecStart=/bin/false");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with("sha256:"));
    }

    #[test]
    fn unit_roundtrips_through_json() {
        let name: UnitName = "web.service".parse().unwrap();
        let unit = Unit::new(name, "[Service]\nExecStart=/bin/web", TargetState::Launched);

        let json = serde_json::to_string(&unit).unwrap();
        let back: Unit = serde_json::from_str(&json).unwrap();
        assert_eq!(unit, back);
    }

    #[test]
    fn unit_hash_tracks_contents() {
        let name: UnitName = "web.service".parse().unwrap();
        let unit = Unit::new(name, "v1", TargetState::Loaded);
        assert_eq!(unit.content_hash, ContentHash::of("v1"));
    }
}
