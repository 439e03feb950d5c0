//! The leader-elected scheduler.
//!
//! One engine per cluster is active at a time, gated by the `engine-leader`
//! lease. Each reconcile round snapshots the cluster, emits scheduling
//! decisions (bind, unbind), and applies each decision to the registry
//! independently: a failed write is counted and retried next round, and a
//! lost compare-and-swap abandons the round — the next one sees fresh state.

mod scheduler;
mod state;

pub use scheduler::{LeastLoadedScheduler, Scheduler};
pub use state::{AgentState, ClusterState};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use armada_core::{MachineId, Result, TargetState, Unit, UnitName};

use crate::lease::{Lease, LeaseManager};
use crate::machine::LocalMachine;
use crate::metrics::{ClusterMetrics, EngineTask, ReconcileFailure, TimingGuard};
use crate::registry::{ClusterEventStream, Registry};

/// The lease name that elects the engine leader.
pub const ENGINE_LEADER_LEASE: &str = "engine-leader";

/// The leader lease lives several reconcile intervals so a single missed
/// tick never drops leadership.
const LEASE_TTL_FACTOR: u32 = 5;
const MIN_LEASE_TTL: Duration = Duration::from_secs(10);

fn lease_ttl(interval: Duration) -> Duration {
    (interval * LEASE_TTL_FACTOR).max(MIN_LEASE_TTL)
}

/// The cluster scheduler.
pub struct Engine {
    registry: Registry,
    leases: LeaseManager,
    machine: Arc<LocalMachine>,
    scheduler: Box<dyn Scheduler>,
    lease: Mutex<Option<Lease>>,
    metrics: ClusterMetrics,
}

impl Engine {
    /// Creates an engine with the default least-loaded scheduler.
    #[must_use]
    pub fn new(registry: Registry, leases: LeaseManager, machine: Arc<LocalMachine>) -> Self {
        Self {
            registry,
            leases,
            machine,
            scheduler: Box::new(LeastLoadedScheduler),
            lease: Mutex::new(None),
            metrics: ClusterMetrics::new(),
        }
    }

    /// Replaces the placement strategy.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Box<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Runs reconcile rounds at the given interval until shutdown.
    ///
    /// With `events` supplied, cluster changes also trigger rounds between
    /// ticks; the periodic tick alone is sufficient for correctness.
    pub async fn run(
        &self,
        interval: Duration,
        mut events: Option<ClusterEventStream>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                event = next_event(&mut events) => {
                    if event.is_none() {
                        // Stream closed; fall back to pure polling.
                        events = None;
                    }
                    debug!(?event, "engine round triggered by cluster event");
                }
                _ = shutdown.changed() => break,
            }
            self.tick(interval).await;
        }

        self.purge().await;
    }

    /// Runs one leader-gated round.
    pub async fn tick(&self, interval: Duration) {
        if !self.ensure_leader(lease_ttl(interval)).await {
            self.metrics.set_is_leader(false);
            return;
        }
        self.metrics.set_is_leader(true);

        if let Err(err) = self.reconcile().await {
            warn!(error = %err, "reconcile round failed");
            self.metrics.record_reconcile_failure(ReconcileFailure::Run);
        }
    }

    /// Acquires or renews the leader lease.
    ///
    /// A displaced holder notices here, on the failed renew, and ceases
    /// writing before the successor's TTL window opens.
    async fn ensure_leader(&self, ttl: Duration) -> bool {
        let mut held = self.lease.lock().await;

        if let Some(lease) = held.as_ref() {
            match self.leases.renew(lease, ttl).await {
                Ok(renewed) => {
                    *held = Some(renewed);
                    return true;
                }
                Err(err) if err.is_precondition_failed() => {
                    info!("engine leadership lost");
                    *held = None;
                    return false;
                }
                Err(err) => {
                    warn!(error = %err, "lease renewal failed; standing down this round");
                    return false;
                }
            }
        }

        match self
            .leases
            .acquire(ENGINE_LEADER_LEASE, &self.machine.id(), ttl)
            .await
        {
            Ok(Some(lease)) => {
                info!(machine = %self.machine.id(), "engine leadership acquired");
                self.metrics.set_leader_start_time(Utc::now().timestamp());
                *held = Some(lease);
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!(error = %err, "lease acquisition failed");
                false
            }
        }
    }

    /// Runs one reconcile round against a fresh snapshot.
    ///
    /// A completed round reports a single histogram observation of its total
    /// duration; abandoned or failed rounds disarm the timer.
    pub async fn reconcile(&self) -> Result<()> {
        let metrics = self.metrics.clone();
        let mut round_timer = TimingGuard::new(move |duration| {
            metrics.record_reconcile_success(duration);
        });

        match self.run_round().await {
            Ok(RoundOutcome::Completed) => Ok(()),
            Ok(RoundOutcome::Abandoned) => {
                round_timer.cancel();
                Ok(())
            }
            Err(err) => {
                round_timer.cancel();
                Err(err)
            }
        }
    }

    async fn run_round(&self) -> Result<RoundOutcome> {
        let units = self.registry.units().await?;
        let scheduled = self.registry.scheduled_units().await?;
        let machines = self.registry.machines().await?;

        let cluster = ClusterState::new(units, scheduled, machines);
        self.metrics.set_agents_available(cluster.machines().len());
        for (id, agent) in cluster.agents()? {
            self.metrics.set_agent_load(&id.to_string(), agent.load());
        }

        for name in cluster.job_names()? {
            let Some((unit, target_machine)) = cluster.job(&name)? else {
                continue;
            };

            let decision =
                Self::decide(&cluster, self.scheduler.as_ref(), &unit, target_machine)?;
            match decision {
                Decision::Keep => {}
                Decision::Unschedule(reason) => {
                    self.apply_unschedule(&cluster, &name, reason).await;
                }
                Decision::Schedule(machine_id) => {
                    // A lost CAS means another leader is writing; abandon the
                    // round and let the next one start from fresh state.
                    if !self.apply_schedule(&cluster, &name, machine_id).await? {
                        return Ok(RoundOutcome::Abandoned);
                    }
                }
            }
        }

        Ok(RoundOutcome::Completed)
    }

    fn decide(
        cluster: &ClusterState,
        scheduler: &dyn Scheduler,
        unit: &Unit,
        target_machine: Option<MachineId>,
    ) -> Result<Decision> {
        if unit.target_state == TargetState::Inactive {
            return Ok(if target_machine.is_some() {
                Decision::Unschedule(ReconcileFailure::Run)
            } else {
                Decision::Keep
            });
        }

        if let Some(machine_id) = target_machine {
            let agents = cluster.agents()?;
            return Ok(match agents.get(&machine_id) {
                None => {
                    debug!(unit = %unit.name, machine = %machine_id, "bound machine departed");
                    Decision::Unschedule(ReconcileFailure::MachineAway)
                }
                Some(agent) if !agent.can_keep(unit) => {
                    debug!(unit = %unit.name, machine = %machine_id,
                           "bound machine no longer satisfies constraints");
                    Decision::Unschedule(ReconcileFailure::Run)
                }
                Some(_) => Decision::Keep,
            });
        }

        let agents = cluster.agents()?;
        match scheduler.decide(&agents, unit) {
            Some(machine_id) => Ok(Decision::Schedule(machine_id)),
            None => {
                // Not a failure: the unit simply has no candidate right now.
                debug!(unit = %unit.name, "no machine satisfies constraints");
                Ok(Decision::Keep)
            }
        }
    }

    async fn apply_unschedule(
        &self,
        cluster: &ClusterState,
        name: &UnitName,
        failure: ReconcileFailure,
    ) {
        self.metrics.record_engine_task(EngineTask::Unschedule);
        match self.registry.unschedule_unit(name).await {
            Ok(()) => {
                info!(unit = %name, "unscheduled");
                if let Err(err) = cluster.unschedule(name) {
                    warn!(unit = %name, error = %err, "snapshot update failed");
                }
            }
            Err(err) => {
                warn!(unit = %name, error = %err, "unschedule write failed");
                self.metrics.record_engine_task_failure(EngineTask::Unschedule);
                self.metrics.record_reconcile_failure(failure);
            }
        }
    }

    /// Applies one schedule decision. Returns `false` when the round must be
    /// abandoned because another leader won the CAS.
    async fn apply_schedule(
        &self,
        cluster: &ClusterState,
        name: &UnitName,
        machine_id: MachineId,
    ) -> Result<bool> {
        self.metrics.record_engine_task(EngineTask::Schedule);
        match self.registry.schedule_unit(name, &machine_id).await {
            Ok(()) => {
                info!(unit = %name, machine = %machine_id, "scheduled");
                cluster.schedule(name, machine_id)?;
                Ok(true)
            }
            Err(err) if err.is_precondition_failed() => {
                debug!(unit = %name, "schedule CAS lost; abandoning round");
                Ok(false)
            }
            Err(err) => {
                warn!(unit = %name, machine = %machine_id, error = %err,
                      "schedule write failed");
                self.metrics.record_engine_task_failure(EngineTask::Schedule);
                self.metrics
                    .record_reconcile_failure(ReconcileFailure::Schedule);
                Ok(true)
            }
        }
    }

    /// Releases the leader lease on shutdown.
    pub async fn purge(&self) {
        let mut held = self.lease.lock().await;
        if let Some(lease) = held.take() {
            if let Err(err) = self.leases.release(&lease).await {
                warn!(error = %err, "failed to release leader lease");
            }
        }
        self.metrics.set_is_leader(false);
    }
}

/// The outcome of evaluating one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Keep,
    Schedule(MachineId),
    Unschedule(ReconcileFailure),
}

/// How a reconcile round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundOutcome {
    /// Every decision was evaluated and applied.
    Completed,
    /// A lost CAS cut the round short; the next round retries.
    Abandoned,
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
