//! Placement decisions for unbound units.

use std::collections::HashMap;

use armada_core::{MachineId, Unit};

use super::state::AgentState;

/// Chooses a machine for an unbound unit, or `None` when no machine
/// satisfies the unit's constraints.
pub trait Scheduler: Send + Sync {
    /// Picks a target machine from the current per-machine views.
    fn decide(&self, agents: &HashMap<MachineId, AgentState>, unit: &Unit) -> Option<MachineId>;
}

/// Prefers the machine with the lowest current load (sum of placed unit
/// weights), breaking ties by lexicographic machine ID so rounds are
/// deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastLoadedScheduler;

impl Scheduler for LeastLoadedScheduler {
    fn decide(&self, agents: &HashMap<MachineId, AgentState>, unit: &Unit) -> Option<MachineId> {
        agents
            .values()
            .filter(|agent| agent.able_to_host(unit))
            .min_by_key(|agent| (agent.load(), agent.machine.id))
            .map(|agent| agent.machine.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_core::{MachineState, TargetState};

    fn unit(name: &str) -> Unit {
        Unit::new(name.parse().unwrap(), "contents", TargetState::Launched)
    }

    fn agents_of(machines: Vec<AgentState>) -> HashMap<MachineId, AgentState> {
        machines.into_iter().map(|a| (a.machine.id, a)).collect()
    }

    #[test]
    fn no_machines_means_no_decision() {
        let scheduler = LeastLoadedScheduler;
        assert_eq!(scheduler.decide(&HashMap::new(), &unit("web.service")), None);
    }

    #[test]
    fn lowest_load_wins() {
        let scheduler = LeastLoadedScheduler;

        let mut busy = AgentState::new(MachineState::new(MachineId::generate()));
        let mut placed = unit("db.service");
        placed.placement.weight = 4;
        busy.units.insert(placed.name.clone(), placed);
        let idle = AgentState::new(MachineState::new(MachineId::generate()));
        let idle_id = idle.machine.id;

        let decision = scheduler.decide(&agents_of(vec![busy, idle]), &unit("web.service"));
        assert_eq!(decision, Some(idle_id));
    }

    #[test]
    fn ties_break_by_machine_id() {
        let scheduler = LeastLoadedScheduler;
        let a = AgentState::new(MachineState::new(MachineId::generate()));
        let b = AgentState::new(MachineState::new(MachineId::generate()));
        let lowest = a.machine.id.min(b.machine.id);

        let decision = scheduler.decide(&agents_of(vec![a, b]), &unit("web.service"));
        assert_eq!(decision, Some(lowest));
    }

    #[test]
    fn ineligible_machines_are_skipped_entirely() {
        let scheduler = LeastLoadedScheduler;
        let agent = AgentState::new(MachineState::new(MachineId::generate()));

        let mut constrained = unit("web.service");
        constrained
            .placement
            .metadata
            .insert("region".into(), ["eu".to_string()].into_iter().collect());

        assert_eq!(scheduler.decide(&agents_of(vec![agent]), &constrained), None);
    }
}
