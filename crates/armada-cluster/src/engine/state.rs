//! The in-memory cluster snapshot used during one reconcile round.
//!
//! Built once per round from `(units, scheduled units, machines)` and mutated
//! as decisions are applied, so later decisions in the same round see earlier
//! ones. The shared store remains the source of truth; this model is a cache
//! that dies with the round.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use armada_core::{Error, MachineId, MachineState, Result, ScheduledUnit, TargetState, Unit, UnitName};

/// A non-global unit with its current binding.
#[derive(Debug, Clone)]
struct Job {
    unit: Unit,
    target_machine: Option<MachineId>,
}

/// One machine's view within a reconcile round: the units believed placed on
/// it, for constraint and load calculations.
#[derive(Debug, Clone)]
pub struct AgentState {
    /// The machine this view describes.
    pub machine: MachineState,
    /// Units placed on this machine, by name.
    pub units: HashMap<UnitName, Unit>,
}

impl AgentState {
    /// Creates an empty view for a machine.
    #[must_use]
    pub fn new(machine: MachineState) -> Self {
        Self {
            machine,
            units: HashMap::new(),
        }
    }

    /// Returns this agent's load: the sum of placed unit weights.
    #[must_use]
    pub fn load(&self) -> u32 {
        self.units.values().map(Unit::weight).sum()
    }

    /// Returns true if a conflict exists between the candidate and any
    /// placed unit, in either direction.
    #[must_use]
    pub fn has_conflict(&self, candidate: &Unit) -> bool {
        self.units.values().any(|placed| {
            placed.placement.conflicts_with(&candidate.name)
                || candidate.placement.conflicts_with(&placed.name)
        })
    }

    /// Returns true if the unit could be newly placed on this machine.
    #[must_use]
    pub fn able_to_host(&self, unit: &Unit) -> bool {
        !self.units.contains_key(&unit.name) && self.satisfies(unit, None)
    }

    /// Returns true if a unit already placed here still satisfies its
    /// constraints against this machine.
    #[must_use]
    pub fn can_keep(&self, unit: &Unit) -> bool {
        self.satisfies(unit, Some(&unit.name))
    }

    fn satisfies(&self, unit: &Unit, exclude: Option<&UnitName>) -> bool {
        if !unit.placement.machine_eligible(&self.machine) {
            return false;
        }

        let conflicted = self
            .units
            .values()
            .filter(|placed| Some(&placed.name) != exclude)
            .any(|placed| {
                placed.placement.conflicts_with(&unit.name)
                    || unit.placement.conflicts_with(&placed.name)
            });
        if conflicted {
            return false;
        }

        unit.placement
            .machine_of
            .iter()
            .all(|dep| self.units.contains_key(dep))
    }
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::fatal("cluster state lock poisoned")
}

/// The engine's snapshot of the cluster for one reconcile round.
pub struct ClusterState {
    jobs: RwLock<HashMap<UnitName, Job>>,
    globals: HashMap<UnitName, Unit>,
    machines: HashMap<MachineId, MachineState>,
}

impl ClusterState {
    /// Builds a snapshot from registry listings.
    #[must_use]
    pub fn new(
        units: Vec<Unit>,
        scheduled: Vec<ScheduledUnit>,
        machines: Vec<MachineState>,
    ) -> Self {
        let bindings: HashMap<UnitName, MachineId> = scheduled
            .into_iter()
            .filter_map(|s| s.target_machine.map(|m| (s.name, m)))
            .collect();

        let mut jobs = HashMap::new();
        let mut globals = HashMap::new();
        for unit in units {
            if unit.is_global() {
                globals.insert(unit.name.clone(), unit);
            } else {
                let target_machine = bindings.get(&unit.name).copied();
                jobs.insert(
                    unit.name.clone(),
                    Job {
                        unit,
                        target_machine,
                    },
                );
            }
        }

        Self {
            jobs: RwLock::new(jobs),
            globals,
            machines: machines.into_iter().map(|m| (m.id, m)).collect(),
        }
    }

    /// Returns the present machines.
    #[must_use]
    pub fn machines(&self) -> &HashMap<MachineId, MachineState> {
        &self.machines
    }

    /// Returns all non-global unit names, sorted for deterministic rounds.
    pub fn job_names(&self) -> Result<Vec<UnitName>> {
        let jobs = self.jobs.read().map_err(poison_err)?;
        let mut names: Vec<UnitName> = jobs.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Returns one job's unit and current binding.
    pub fn job(&self, name: &UnitName) -> Result<Option<(Unit, Option<MachineId>)>> {
        let jobs = self.jobs.read().map_err(poison_err)?;
        Ok(jobs
            .get(name)
            .map(|job| (job.unit.clone(), job.target_machine)))
    }

    /// Builds the per-machine view: scheduled units first, then global units
    /// that satisfy each machine's attributes and conflict checks.
    pub fn agents(&self) -> Result<HashMap<MachineId, AgentState>> {
        let mut agents: HashMap<MachineId, AgentState> = self
            .machines
            .values()
            .map(|machine| (machine.id, AgentState::new(machine.clone())))
            .collect();

        let jobs = self.jobs.read().map_err(poison_err)?;
        for job in jobs.values() {
            if job.unit.target_state == TargetState::Inactive {
                continue;
            }
            let Some(machine_id) = job.target_machine else {
                continue;
            };
            if let Some(agent) = agents.get_mut(&machine_id) {
                agent.units.insert(job.unit.name.clone(), job.unit.clone());
            }
        }
        drop(jobs);

        let mut global_names: Vec<&UnitName> = self.globals.keys().collect();
        global_names.sort();
        for name in global_names {
            let global = &self.globals[name];
            if global.target_state == TargetState::Inactive {
                continue;
            }
            for agent in agents.values_mut() {
                if !global.placement.machine_eligible(&agent.machine) {
                    continue;
                }
                if agent.has_conflict(global) {
                    continue;
                }
                agent.units.insert(global.name.clone(), global.clone());
            }
        }

        Ok(agents)
    }

    /// Records a binding decision in the snapshot.
    pub fn schedule(&self, name: &UnitName, machine: MachineId) -> Result<()> {
        let mut jobs = self.jobs.write().map_err(poison_err)?;
        if let Some(job) = jobs.get_mut(name) {
            job.target_machine = Some(machine);
        }
        Ok(())
    }

    /// Clears a binding in the snapshot.
    pub fn unschedule(&self, name: &UnitName) -> Result<()> {
        let mut jobs = self.jobs.write().map_err(poison_err)?;
        if let Some(job) = jobs.get_mut(name) {
            job.target_machine = None;
        }
        Ok(())
    }
}
