//! Strongly-typed identifiers for armada entities.
//!
//! All identifiers are:
//! - **Strongly typed**: A machine ID can never be confused with a unit name
//! - **Lexicographically sortable**: Machine IDs are ULIDs, so the engine's
//!   deterministic tie-break over IDs is also a tie-break over creation time
//! - **Globally unique**: No coordination required for generation
//!
//! # Example
//!
//! ```rust
//! use armada_core::id::{MachineId, UnitName};
//!
//! let machine = MachineId::generate();
//! let name: UnitName = "web.service".parse().unwrap();
//!
//! // IDs are different types - this won't compile:
//! // let wrong: MachineId = name;
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};

/// A unique identifier for a machine in the cluster.
///
/// Self-assigned on first boot and persisted by the owning node, so the same
/// host keeps the same identity across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineId(Ulid);

impl MachineId {
    /// Generates a new unique machine ID.
    ///
    /// Uses ULID generation which is:
    /// - Lexicographically sortable by creation time
    /// - Globally unique without coordination
    /// - URL-safe and case-insensitive
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Creates a machine ID from a raw ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MachineId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::InvalidId {
                message: format!("invalid machine ID '{s}': {e}"),
            })
    }
}

/// A validated, cluster-unique unit name.
///
/// Unit names are opaque to armada beyond validation: non-empty, no path
/// separators, no whitespace. They appear verbatim in registry keys, so the
/// restrictions exist to keep the key layout unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitName(String);

impl UnitName {
    /// Creates a validated unit name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] if the name is empty, contains `/`, or
    /// contains whitespace.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidId {
                message: "unit name must not be empty".into(),
            });
        }
        if name.contains('/') || name.chars().any(char::is_whitespace) {
            return Err(Error::InvalidId {
                message: format!("unit name '{name}' must not contain '/' or whitespace"),
            });
        }
        Ok(Self(name))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UnitName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for UnitName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<UnitName> for String {
    fn from(name: UnitName) -> Self {
        name.0
    }
}
