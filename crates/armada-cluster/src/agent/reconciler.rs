//! The agent reconcile loop.
//!
//! Each pass snapshots the desired units for this machine (bindings plus
//! eligible global units), snapshots the local manager, computes the task set
//! that converges one onto the other, and executes it. A failed task is
//! logged and the unit retried on the next pass; other units proceed.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use armada_core::{MachineState, Result, TargetState, Unit, UnitName};

use crate::manager::ManagedUnitState;
use crate::metrics::ClusterMetrics;
use crate::registry::{ClusterEventStream, Registry};

use super::Agent;

/// One operation against the local unit manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOp {
    /// Load the unit's contents.
    Load,
    /// Start a loaded unit.
    Start,
    /// Stop a running unit.
    Stop,
    /// Remove the unit from the manager.
    Unload,
}

/// A single reconciliation task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTask {
    /// The unit to operate on.
    pub name: UnitName,
    /// The operation to perform.
    pub op: TaskOp,
}

impl AgentTask {
    fn new(name: &UnitName, op: TaskOp) -> Self {
        Self {
            name: name.clone(),
            op,
        }
    }
}

/// Computes the tasks that converge the local manager onto the desired set.
///
/// Pure and deterministic: tasks come out in unit-name order, with teardown
/// of undesired units after convergence of desired ones.
#[must_use]
pub fn calculate_tasks(
    desired: &BTreeMap<UnitName, Unit>,
    actual: &[ManagedUnitState],
) -> Vec<AgentTask> {
    let actual_by_name: BTreeMap<&UnitName, bool> = actual
        .iter()
        .map(|state| (&state.name, state.is_launched()))
        .collect();

    let mut tasks = Vec::new();

    for (name, unit) in desired {
        match (unit.target_state, actual_by_name.get(name)) {
            (TargetState::Launched, None) => {
                tasks.push(AgentTask::new(name, TaskOp::Load));
                tasks.push(AgentTask::new(name, TaskOp::Start));
            }
            (TargetState::Launched, Some(false)) => {
                tasks.push(AgentTask::new(name, TaskOp::Start));
            }
            (TargetState::Loaded, None) => {
                tasks.push(AgentTask::new(name, TaskOp::Load));
            }
            (TargetState::Loaded, Some(true)) => {
                tasks.push(AgentTask::new(name, TaskOp::Stop));
            }
            // Already converged, or inactive units that never belong in the
            // desired set in the first place.
            _ => {}
        }
    }

    for state in actual {
        if desired.contains_key(&state.name) {
            continue;
        }
        if state.is_launched() {
            tasks.push(AgentTask::new(&state.name, TaskOp::Stop));
        }
        tasks.push(AgentTask::new(&state.name, TaskOp::Unload));
    }

    tasks
}

/// Computes this machine's desired unit set.
///
/// Non-global units are taken from bindings; global units are evaluated
/// against this machine's attributes and against conflicts with units already
/// in the set, scheduled units first so an explicit binding always outranks a
/// global.
#[must_use]
pub(crate) fn desired_units(
    units: &[Unit],
    bound_to_me: &[UnitName],
    machine: &MachineState,
) -> BTreeMap<UnitName, Unit> {
    let mut desired: BTreeMap<UnitName, Unit> = BTreeMap::new();

    for unit in units {
        if unit.is_global() || unit.target_state == TargetState::Inactive {
            continue;
        }
        if bound_to_me.contains(&unit.name) {
            desired.insert(unit.name.clone(), unit.clone());
        }
    }

    for unit in units {
        if !unit.is_global() || unit.target_state == TargetState::Inactive {
            continue;
        }
        if !unit.placement.machine_eligible(machine) {
            continue;
        }
        let conflicted = desired.values().any(|placed| {
            placed.placement.conflicts_with(&unit.name)
                || unit.placement.conflicts_with(&placed.name)
        });
        if conflicted {
            debug!(unit = %unit.name, machine = %machine.id, "global unit conflicts with placed unit");
            continue;
        }
        desired.insert(unit.name.clone(), unit.clone());
    }

    desired
}

/// The per-machine reconcile loop.
pub struct AgentReconciler {
    registry: Registry,
    interval: Duration,
    use_watches: bool,
    metrics: ClusterMetrics,
}

impl AgentReconciler {
    /// Creates a reconciler ticking at the given interval.
    ///
    /// With `use_watches` set, store events also trigger passes; the tick
    /// alone is sufficient for correctness.
    #[must_use]
    pub fn new(registry: Registry, interval: Duration, use_watches: bool) -> Self {
        Self {
            registry,
            interval,
            use_watches,
            metrics: ClusterMetrics::new(),
        }
    }

    /// Runs reconcile passes until shutdown.
    pub async fn run(&self, agent: &Agent, mut shutdown: watch::Receiver<bool>) {
        let mut events = if self.use_watches {
            Some(self.registry.subscribe())
        } else {
            None
        };
        let mut manager_events = agent.manager().subscribe();

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                event = next_event(&mut events) => {
                    if event.is_none() {
                        // Stream closed; fall back to pure polling.
                        events = None;
                    }
                    debug!(?event, "reconciling on cluster event");
                }
                _ = manager_events.recv() => {
                    debug!("reconciling on unit manager event");
                }
                _ = shutdown.changed() => break,
            }

            if let Err(err) = self.reconcile(agent).await {
                warn!(error = %err, "agent reconcile pass failed");
            }
        }
    }

    /// Runs a single reconcile pass.
    pub async fn reconcile(&self, agent: &Agent) -> Result<()> {
        let units = self.registry.units().await?;
        let scheduled = self.registry.scheduled_units().await?;
        let machine = agent.machine_state()?;

        let bound_to_me: Vec<UnitName> = scheduled
            .iter()
            .filter(|s| s.target_machine == Some(machine.id))
            .map(|s| s.name.clone())
            .collect();

        let desired = desired_units(&units, &bound_to_me, &machine);
        let actual = agent.manager().units().await?;
        let tasks = calculate_tasks(&desired, &actual);

        for task in tasks {
            if let Err(err) = self.execute(agent, &desired, &task).await {
                warn!(unit = %task.name, op = ?task.op, error = %err,
                      "task failed; unit will retry next pass");
            }
        }

        self.publish_convergence(agent, &desired).await?;
        Ok(())
    }

    async fn execute(
        &self,
        agent: &Agent,
        desired: &BTreeMap<UnitName, Unit>,
        task: &AgentTask,
    ) -> Result<()> {
        match task.op {
            TaskOp::Load => {
                let unit = desired.get(&task.name).ok_or_else(|| {
                    armada_core::Error::fatal(format!(
                        "load task for unit {} not in desired set",
                        task.name
                    ))
                })?;
                agent.load_unit(unit).await
            }
            TaskOp::Start => agent.start_unit(&task.name).await,
            TaskOp::Stop => agent.stop_unit(&task.name).await,
            TaskOp::Unload => agent.unload_unit(&task.name).await,
        }
    }

    /// Publishes per-unit convergence gauges for this agent.
    async fn publish_convergence(
        &self,
        agent: &Agent,
        desired: &BTreeMap<UnitName, Unit>,
    ) -> Result<()> {
        let actual = agent.manager().units().await?;
        let actual_by_name: BTreeMap<&UnitName, bool> = actual
            .iter()
            .map(|state| (&state.name, state.is_launched()))
            .collect();

        for (name, unit) in desired {
            let nominal = match unit.target_state {
                TargetState::Launched => actual_by_name.get(name) == Some(&true),
                TargetState::Loaded => actual_by_name.get(name) == Some(&false),
                TargetState::Inactive => !actual_by_name.contains_key(name),
            };
            self.metrics
                .set_agent_state(name.as_str(), unit.target_state.as_str(), nominal);
        }
        Ok(())
    }

    /// Stops and unloads every unit this agent has driven.
    ///
    /// Used on unhealthy shutdown; no fresh observations are published, so
    /// the remaining records simply expire.
    pub async fn purge(&self, agent: &Agent) {
        let driven = match agent.driven_units() {
            Ok(driven) => driven,
            Err(err) => {
                warn!(error = %err, "cannot enumerate driven units for purge");
                return;
            }
        };

        for (name, state) in driven {
            if state == TargetState::Launched {
                if let Err(err) = agent.stop_unit(&name).await {
                    warn!(unit = %name, error = %err, "failed to stop unit during purge");
                }
            }
            if let Err(err) = agent.unload_unit(&name).await {
                warn!(unit = %name, error = %err, "failed to unload unit during purge");
            }
        }
    }
}

/// Awaits the next event when watches are enabled, or parks forever so the
/// select arm never fires in poll-only mode.
async fn next_event(
    events: &mut Option<ClusterEventStream>,
) -> Option<crate::registry::ClusterEvent> {
    match events {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
