//! Typed registry keys for the shared store layout.
//!
//! Every record armada persists lives under one of a small set of key shapes.
//! Using typed constructors instead of ad-hoc `format!` calls keeps the layout
//! in one place and makes wrong paths unconstructable.
//!
//! # Key Layout
//!
//! | Key | Record | TTL |
//! |-----|--------|-----|
//! | `machines/<id>` | machine state | agent TTL |
//! | `units/<name>/object` | unit descriptor | none |
//! | `units/<name>/target-state` | desired state | none |
//! | `units/<name>/target-machine` | binding | none |
//! | `units/<name>/state/<machine>` | observed state | agent TTL |
//! | `leases/<name>` | lease | lease TTL |
//!
//! Keys are store-relative; the configured key prefix is applied by the
//! registry when it talks to the store.
//!
//! # Example
//!
//! ```rust
//! use armada_core::keys::{MachineKey, UnitKey};
//! use armada_core::id::MachineId;
//!
//! let id = MachineId::generate();
//! let key = MachineKey::record(&id);
//! assert!(key.as_ref().starts_with("machines/"));
//!
//! let name = "web.service".parse().unwrap();
//! assert_eq!(UnitKey::object(&name).as_ref(), "units/web.service/object");
//! ```

use crate::id::{MachineId, UnitName};

/// A typed storage key that encodes path structure.
pub trait RegistryKey: AsRef<str> {
    /// Returns the underlying path string.
    fn path(&self) -> &str {
        self.as_ref()
    }
}

/// Prefix under which machine records live.
pub const MACHINE_PREFIX: &str = "machines/";

/// Prefix under which unit records live.
pub const UNIT_PREFIX: &str = "units/";

/// Prefix under which lease records live.
pub const LEASE_PREFIX: &str = "leases/";

// ============================================================================
// MachineKey - per-machine liveness records
// ============================================================================

/// A typed key for machine record paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MachineKey(String);

impl MachineKey {
    /// Creates the key for a machine's record.
    #[must_use]
    pub fn record(id: &MachineId) -> Self {
        Self(format!("{MACHINE_PREFIX}{id}"))
    }

    /// Creates the key for the machines directory prefix.
    #[must_use]
    pub fn dir() -> Self {
        Self(MACHINE_PREFIX.to_string())
    }
}

impl AsRef<str> for MachineKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl RegistryKey for MachineKey {}

impl std::fmt::Display for MachineKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// UnitKey - per-unit descriptor, desired state, binding, and observations
// ============================================================================

/// A typed key for unit record paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitKey(String);

impl UnitKey {
    /// Creates the key for a unit's descriptor.
    #[must_use]
    pub fn object(name: &UnitName) -> Self {
        Self(format!("{UNIT_PREFIX}{name}/object"))
    }

    /// Creates the key for a unit's desired state.
    #[must_use]
    pub fn target_state(name: &UnitName) -> Self {
        Self(format!("{UNIT_PREFIX}{name}/target-state"))
    }

    /// Creates the key for a unit's binding.
    #[must_use]
    pub fn target_machine(name: &UnitName) -> Self {
        Self(format!("{UNIT_PREFIX}{name}/target-machine"))
    }

    /// Creates the key for one machine's observation of a unit.
    #[must_use]
    pub fn state(name: &UnitName, machine: &MachineId) -> Self {
        Self(format!("{UNIT_PREFIX}{name}/state/{machine}"))
    }

    /// Creates the key for a unit's observation directory prefix.
    #[must_use]
    pub fn state_dir(name: &UnitName) -> Self {
        Self(format!("{UNIT_PREFIX}{name}/state/"))
    }

    /// Creates the key for a unit's directory prefix.
    #[must_use]
    pub fn unit_dir(name: &UnitName) -> Self {
        Self(format!("{UNIT_PREFIX}{name}/"))
    }

    /// Creates the key for the units directory prefix.
    #[must_use]
    pub fn dir() -> Self {
        Self(UNIT_PREFIX.to_string())
    }
}

impl AsRef<str> for UnitKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl RegistryKey for UnitKey {}

impl std::fmt::Display for UnitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// LeaseKey - named TTL leases
// ============================================================================

/// A typed key for lease paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseKey(String);

impl LeaseKey {
    /// Creates the key for a named lease.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self(format!("{LEASE_PREFIX}{name}"))
    }
}

impl AsRef<str> for LeaseKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl RegistryKey for LeaseKey {}

impl std::fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Key parsing - used to turn raw store events into typed cluster events
// ============================================================================

/// A store-relative key parsed back into its typed shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedKey {
    /// `machines/<id>`
    Machine(MachineId),
    /// `units/<name>/object`
    UnitObject(UnitName),
    /// `units/<name>/target-state`
    UnitTargetState(UnitName),
    /// `units/<name>/target-machine`
    UnitTargetMachine(UnitName),
    /// `units/<name>/state/<machine>`
    UnitState(UnitName, MachineId),
    /// `leases/<name>`
    Lease(String),
}

impl ParsedKey {
    /// Parses a store-relative key, returning `None` for unrecognized shapes.
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        if let Some(id) = key.strip_prefix(MACHINE_PREFIX) {
            return id.parse().ok().map(Self::Machine);
        }
        if let Some(name) = key.strip_prefix(LEASE_PREFIX) {
            if name.is_empty() {
                return None;
            }
            return Some(Self::Lease(name.to_string()));
        }
        let rest = key.strip_prefix(UNIT_PREFIX)?;
        let (name, field) = rest.split_once('/')?;
        let name: UnitName = name.parse().ok()?;
        match field {
            "object" => Some(Self::UnitObject(name)),
            "target-state" => Some(Self::UnitTargetState(name)),
            "target-machine" => Some(Self::UnitTargetMachine(name)),
            other => {
                let machine = other.strip_prefix("state/")?;
                machine.parse().ok().map(|m| Self::UnitState(name, m))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_key_format() {
        let id = MachineId::generate();
        let key = MachineKey::record(&id);
        assert_eq!(key.as_ref(), format!("machines/{id}"));
        assert_eq!(MachineKey::dir().as_ref(), "machines/");
    }

    #[test]
    fn unit_key_formats() {
        let name: UnitName = "web.service".parse().unwrap();
        let machine = MachineId::generate();

        assert_eq!(UnitKey::object(&name).as_ref(), "units/web.service/object");
        assert_eq!(
            UnitKey::target_state(&name).as_ref(),
            "units/web.service/target-state"
        );
        assert_eq!(
            UnitKey::target_machine(&name).as_ref(),
            "units/web.service/target-machine"
        );
        assert_eq!(
            UnitKey::state(&name, &machine).as_ref(),
            format!("units/web.service/state/{machine}")
        );
        assert_eq!(
            UnitKey::state_dir(&name).as_ref(),
            "units/web.service/state/"
        );
    }

    #[test]
    fn lease_key_format() {
        assert_eq!(LeaseKey::named("engine-leader").as_ref(), "leases/engine-leader");
    }

    #[test]
    fn keys_implement_display() {
        let name: UnitName = "web.service".parse().unwrap();
        assert_eq!(
            format!("{}", UnitKey::object(&name)),
            "units/web.service/object"
        );
    }

    #[test]
    fn parse_roundtrips_every_shape() {
        let name: UnitName = "web.service".parse().unwrap();
        let machine = MachineId::generate();

        assert_eq!(
            ParsedKey::parse(MachineKey::record(&machine).as_ref()),
            Some(ParsedKey::Machine(machine))
        );
        assert_eq!(
            ParsedKey::parse(UnitKey::object(&name).as_ref()),
            Some(ParsedKey::UnitObject(name.clone()))
        );
        assert_eq!(
            ParsedKey::parse(UnitKey::target_state(&name).as_ref()),
            Some(ParsedKey::UnitTargetState(name.clone()))
        );
        assert_eq!(
            ParsedKey::parse(UnitKey::target_machine(&name).as_ref()),
            Some(ParsedKey::UnitTargetMachine(name.clone()))
        );
        assert_eq!(
            ParsedKey::parse(UnitKey::state(&name, &machine).as_ref()),
            Some(ParsedKey::UnitState(name, machine))
        );
        assert_eq!(
            ParsedKey::parse("leases/engine-leader"),
            Some(ParsedKey::Lease("engine-leader".into()))
        );
    }

    #[test]
    fn parse_rejects_unrecognized_shapes() {
        assert_eq!(ParsedKey::parse("units/web.service"), None);
        assert_eq!(ParsedKey::parse("units/web.service/unknown"), None);
        assert_eq!(ParsedKey::parse("machines/not-a-ulid"), None);
        assert_eq!(ParsedKey::parse("other/key"), None);
        assert_eq!(ParsedKey::parse("leases/"), None);
    }
}
