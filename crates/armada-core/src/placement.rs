//! Placement constraints for units.
//!
//! Constraints are evaluated in two places with identical semantics: the
//! engine checks them when choosing a machine for a scheduled unit, and every
//! agent checks them independently for global units. Keeping the predicate
//! logic here is what makes those two views agree.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::id::{MachineId, UnitName};
use crate::machine::MachineState;

fn default_weight() -> u32 {
    1
}

fn is_default_weight(weight: &u32) -> bool {
    *weight == 1
}

/// Placement constraints declared on a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    /// Required machine metadata: for each key, the machine's value must be
    /// one of the listed values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, BTreeSet<String>>,

    /// Glob patterns naming units this unit must not share a machine with.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<String>,

    /// Units this unit must be co-located with. The unit descriptor also
    /// accepts `peers` as an alias for this field.
    #[serde(default, alias = "peers", skip_serializing_if = "Vec::is_empty")]
    pub machine_of: Vec<UnitName>,

    /// Pins the unit to one specific machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_pin: Option<MachineId>,

    /// Run on every eligible machine instead of being scheduled to one.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub global: bool,

    /// Scheduling weight; an agent's load is the sum of placed weights.
    #[serde(default = "default_weight", skip_serializing_if = "is_default_weight")]
    pub weight: u32,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            metadata: BTreeMap::new(),
            conflicts: Vec::new(),
            machine_of: Vec::new(),
            machine_pin: None,
            global: false,
            weight: 1,
        }
    }
}

impl Placement {
    /// Returns true if the machine satisfies the metadata predicates and any
    /// machine pin. Co-location and conflict checks need knowledge of what
    /// else is placed and live in the cluster-state model.
    #[must_use]
    pub fn machine_eligible(&self, machine: &MachineState) -> bool {
        if let Some(pin) = &self.machine_pin {
            if *pin != machine.id {
                return false;
            }
        }
        machine.has_metadata(&self.metadata)
    }

    /// Returns true if any conflict pattern matches the given unit name.
    #[must_use]
    pub fn conflicts_with(&self, name: &UnitName) -> bool {
        self.conflicts
            .iter()
            .any(|pattern| glob_matches(pattern, name.as_str()))
    }
}

/// Shell-style glob matching used for conflict patterns.
///
/// `*` matches any run of characters, `?` matches a single character; all
/// other characters match literally. The pattern is anchored at both ends.
#[must_use]
pub fn glob_matches(pattern: &str, name: &str) -> bool {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');

    // An unparsable pattern matches nothing rather than poisoning scheduling.
    regex::Regex::new(&regex).is_ok_and(|re| re.is_match(name))
}
