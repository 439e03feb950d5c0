//! Observability metrics for the cluster control plane.
//!
//! Metrics are exported via the `metrics` crate facade. Install a recorder
//! (e.g. a Prometheus exporter) at daemon startup; without one every call is
//! a no-op, which keeps tests hermetic.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `armada_registry_operation_count_total` | Counter | `op` | Registry operations |
//! | `armada_registry_operation_failed_count_total` | Counter | `op` | Failed registry operations |
//! | `armada_registry_operation_duration_seconds` | Histogram | `op` | Registry operation latency |
//! | `armada_engine_reconcile_count_total` | Counter | - | Completed reconcile rounds |
//! | `armada_engine_reconcile_duration_seconds` | Histogram | - | Round duration |
//! | `armada_engine_reconcile_failure_count_total` | Counter | `type` | Failed scheduling writes |
//! | `armada_engine_task_count_total` | Counter | `type` | Emitted scheduling tasks |
//! | `armada_engine_task_failure_count_total` | Counter | `type` | Failed scheduling tasks |
//! | `armada_engine_is_leader` | Gauge | - | 1 while this engine holds the lease |
//! | `armada_engine_leader_start_time_seconds` | Gauge | - | Epoch seconds leadership began |
//! | `armada_engine_agents_available` | Gauge | - | Present machines |
//! | `armada_engine_agent_load` | Gauge | `id` | Sum of unit weights per agent |
//! | `armada_agent_healthy` | Gauge | - | 1 while heartbeats succeed |
//! | `armada_agent_state` | Gauge | `unit`, `desired_state` | Per-unit convergence |

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: registry operations by kind.
    pub const REGISTRY_OP_COUNT: &str = "armada_registry_operation_count_total";
    /// Counter: failed registry operations by kind.
    pub const REGISTRY_OP_FAILED_COUNT: &str = "armada_registry_operation_failed_count_total";
    /// Histogram: registry operation latency in seconds.
    pub const REGISTRY_OP_DURATION_SECONDS: &str = "armada_registry_operation_duration_seconds";
    /// Counter: completed engine reconcile rounds.
    pub const ENGINE_RECONCILE_COUNT: &str = "armada_engine_reconcile_count_total";
    /// Histogram: engine reconcile round duration in seconds.
    pub const ENGINE_RECONCILE_DURATION_SECONDS: &str =
        "armada_engine_reconcile_duration_seconds";
    /// Counter: failed scheduling writes by failure type.
    pub const ENGINE_RECONCILE_FAILURE_COUNT: &str =
        "armada_engine_reconcile_failure_count_total";
    /// Counter: emitted engine tasks by type.
    pub const ENGINE_TASK_COUNT: &str = "armada_engine_task_count_total";
    /// Counter: failed engine tasks by type.
    pub const ENGINE_TASK_FAILURE_COUNT: &str = "armada_engine_task_failure_count_total";
    /// Gauge: whether this engine currently holds the leader lease.
    pub const ENGINE_IS_LEADER: &str = "armada_engine_is_leader";
    /// Gauge: epoch seconds at which the current leadership began.
    pub const ENGINE_LEADER_START_TIME_SECONDS: &str =
        "armada_engine_leader_start_time_seconds";
    /// Gauge: number of machines present in the cluster.
    pub const ENGINE_AGENTS_AVAILABLE: &str = "armada_engine_agents_available";
    /// Gauge: current load on a given agent.
    pub const ENGINE_AGENT_LOAD: &str = "armada_engine_agent_load";
    /// Gauge: whether the local heart is beating successfully.
    pub const AGENT_HEALTHY: &str = "armada_agent_healthy";
    /// Gauge: per-unit agent convergence state.
    pub const AGENT_STATE: &str = "armada_agent_state";
}

/// Label keys used across metrics.
pub mod labels {
    /// Registry operation kind (get, set, get_all).
    pub const OP: &str = "op";
    /// Task or failure type.
    pub const TYPE: &str = "type";
    /// Machine identifier.
    pub const ID: &str = "id";
    /// Unit name.
    pub const UNIT: &str = "unit";
    /// Desired state of a unit.
    pub const DESIRED_STATE: &str = "desired_state";
}

/// Registry operation kinds used as the `op` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryOp {
    /// A single-record read.
    Get,
    /// A write or delete.
    Set,
    /// A prefix listing.
    GetAll,
}

impl RegistryOp {
    /// Returns the canonical label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::GetAll => "get_all",
        }
    }
}

/// Engine task kinds used as the `type` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineTask {
    /// Bind a unit to a machine.
    Schedule,
    /// Clear a unit's binding.
    Unschedule,
}

impl EngineTask {
    /// Returns the canonical label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Unschedule => "unschedule",
        }
    }
}

/// Reconcile failure classes used as the `type` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileFailure {
    /// Failed to unschedule a unit from a departed machine.
    MachineAway,
    /// The round itself could not run (snapshot failure).
    Run,
    /// A schedule write failed.
    Schedule,
}

impl ReconcileFailure {
    /// Returns the canonical label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MachineAway => "machine_away",
            Self::Run => "run",
            Self::Schedule => "schedule",
        }
    }
}

/// High-level interface for recording cluster metrics.
///
/// Cheap to clone and share across tasks.
#[derive(Debug, Clone, Default)]
pub struct ClusterMetrics;

impl ClusterMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records a completed registry operation with its latency.
    pub fn record_registry_op(&self, op: RegistryOp, duration: Duration) {
        counter!(names::REGISTRY_OP_COUNT, labels::OP => op.as_str()).increment(1);
        histogram!(names::REGISTRY_OP_DURATION_SECONDS, labels::OP => op.as_str())
            .record(duration.as_secs_f64());
    }

    /// Records a failed registry operation.
    pub fn record_registry_op_failure(&self, op: RegistryOp) {
        counter!(names::REGISTRY_OP_FAILED_COUNT, labels::OP => op.as_str()).increment(1);
    }

    /// Records a completed reconcile round with its duration.
    pub fn record_reconcile_success(&self, duration: Duration) {
        counter!(names::ENGINE_RECONCILE_COUNT).increment(1);
        histogram!(names::ENGINE_RECONCILE_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Records a failed scheduling write.
    pub fn record_reconcile_failure(&self, reason: ReconcileFailure) {
        counter!(names::ENGINE_RECONCILE_FAILURE_COUNT, labels::TYPE => reason.as_str())
            .increment(1);
    }

    /// Records an emitted engine task.
    pub fn record_engine_task(&self, task: EngineTask) {
        counter!(names::ENGINE_TASK_COUNT, labels::TYPE => task.as_str()).increment(1);
    }

    /// Records a failed engine task.
    pub fn record_engine_task_failure(&self, task: EngineTask) {
        counter!(names::ENGINE_TASK_FAILURE_COUNT, labels::TYPE => task.as_str()).increment(1);
    }

    /// Publishes whether this engine holds the leader lease.
    pub fn set_is_leader(&self, is_leader: bool) {
        gauge!(names::ENGINE_IS_LEADER).set(if is_leader { 1.0 } else { 0.0 });
    }

    /// Publishes the epoch second at which leadership began.
    #[allow(clippy::cast_precision_loss)] // Epoch seconds fit f64 comfortably
    pub fn set_leader_start_time(&self, epoch_secs: i64) {
        gauge!(names::ENGINE_LEADER_START_TIME_SECONDS).set(epoch_secs as f64);
    }

    /// Publishes the number of present machines.
    #[allow(clippy::cast_precision_loss)] // Gauge values are typically small
    pub fn set_agents_available(&self, count: usize) {
        gauge!(names::ENGINE_AGENTS_AVAILABLE).set(count as f64);
    }

    /// Publishes the load on one agent.
    pub fn set_agent_load(&self, machine_id: &str, load: u32) {
        gauge!(names::ENGINE_AGENT_LOAD, labels::ID => machine_id.to_string())
            .set(f64::from(load));
    }

    /// Publishes the local heart's health.
    pub fn set_agent_healthy(&self, healthy: bool) {
        gauge!(names::AGENT_HEALTHY).set(if healthy { 1.0 } else { 0.0 });
    }

    /// Publishes one unit's convergence state on this agent.
    ///
    /// `nominal` is true when the observed state matches the desired state.
    pub fn set_agent_state(&self, unit: &str, desired_state: &str, nominal: bool) {
        gauge!(
            names::AGENT_STATE,
            labels::UNIT => unit.to_string(),
            labels::DESIRED_STATE => desired_state.to_string(),
        )
        .set(if nominal { 1.0 } else { 0.0 });
    }
}

/// RAII guard for timing operations.
///
/// Automatically invokes its callback with the elapsed duration when dropped.
/// Callers that only report durations for successful operations disarm the
/// guard with [`cancel`] on their failure paths.
///
/// [`cancel`]: TimingGuard::cancel
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed
    /// duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Disarms the guard; the callback will not run on drop.
    pub fn cancel(&mut self) {
        self.on_drop = None;
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_can_record_without_a_recorder() {
        let metrics = ClusterMetrics::new();

        // These calls should not panic even without a metrics recorder installed.
        metrics.record_registry_op(RegistryOp::Get, Duration::from_millis(2));
        metrics.record_registry_op_failure(RegistryOp::Set);
        metrics.record_reconcile_success(Duration::from_millis(10));
        metrics.record_reconcile_failure(ReconcileFailure::Schedule);
        metrics.record_engine_task(EngineTask::Schedule);
        metrics.record_engine_task_failure(EngineTask::Unschedule);
        metrics.set_is_leader(true);
        metrics.set_leader_start_time(1_700_000_000);
        metrics.set_agents_available(3);
        metrics.set_agent_load("machine-1", 4);
        metrics.set_agent_healthy(true);
        metrics.set_agent_state("web.service", "launched", true);
    }

    #[test]
    fn label_values_are_stable() {
        assert_eq!(RegistryOp::Get.as_str(), "get");
        assert_eq!(RegistryOp::Set.as_str(), "set");
        assert_eq!(RegistryOp::GetAll.as_str(), "get_all");
        assert_eq!(EngineTask::Schedule.as_str(), "schedule");
        assert_eq!(EngineTask::Unschedule.as_str(), "unschedule");
        assert_eq!(ReconcileFailure::MachineAway.as_str(), "machine_away");
    }

    #[test]
    fn timing_guard_measures_duration() {
        let mut recorded = None;
        {
            let _guard = TimingGuard::new(|d| {
                recorded = Some(d);
            });
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(recorded.is_some_and(|d| d >= Duration::from_millis(5)));
    }

    #[test]
    fn canceled_timing_guard_records_nothing() {
        let mut recorded = false;
        {
            let mut guard = TimingGuard::new(|_| {
                recorded = true;
            });
            guard.cancel();
        }
        assert!(!recorded);
    }
}
