//! # armada-core
//!
//! Core abstractions for the armada cluster unit manager.
//!
//! This crate provides the foundational types shared by every armada
//! component:
//!
//! - **Identifiers**: Strongly-typed machine IDs and validated unit names
//! - **Data Model**: Units, machines, bindings, and state observations
//! - **Placement**: Constraint predicates evaluated by the engine and agents
//! - **Registry Keys**: Typed key paths for the shared store layout
//! - **Error Types**: The shared error contract and result alias
//!
//! ## Crate Boundary
//!
//! `armada-core` is the only crate allowed to define shared primitives. The
//! control-plane crate (`armada-cluster`) builds on these types but never
//! redefines them; everything that crosses a component boundary is expressed
//! in terms of this crate.
//!
//! ## Example
//!
//! ```rust
//! use armada_core::prelude::*;
//!
//! let machine = MachineId::generate();
//! let name: UnitName = "web.service".parse().unwrap();
//! let unit = Unit::new(name, "[Service]\nExecStart=/bin/web", TargetState::Launched);
//! assert!(!unit.is_global());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod keys;
pub mod machine;
pub mod observability;
pub mod placement;
pub mod schedule;
pub mod unit;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use armada_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{MachineId, UnitName};
    pub use crate::keys::{LeaseKey, MachineKey, RegistryKey, UnitKey};
    pub use crate::machine::MachineState;
    pub use crate::placement::Placement;
    pub use crate::schedule::{ScheduledUnit, UnitStateObservation};
    pub use crate::unit::{ContentHash, TargetState, Unit};
}

// Re-export key types at crate root for ergonomics.
pub use error::{Error, Result};
pub use id::{MachineId, UnitName};
pub use keys::{LeaseKey, MachineKey, RegistryKey, UnitKey};
pub use machine::MachineState;
pub use observability::{init_logging, LogFormat};
pub use placement::Placement;
pub use schedule::{ScheduledUnit, UnitStateObservation};
pub use unit::{ContentHash, TargetState, Unit};
