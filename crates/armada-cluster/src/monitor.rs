//! Health-check supervision of the local heart.
//!
//! The monitor beats the heart at half the liveness TTL and reports one of
//! two outcomes: the operator asked for shutdown, or a beat failed terminally
//! and the machine must be treated as unhealthy. The server supervisor exits
//! on the former and restarts on the latter.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use armada_core::Error;

use crate::heart::Heart;
use crate::metrics::ClusterMetrics;

/// Why the monitor returned.
#[derive(Debug)]
pub enum MonitorOutcome {
    /// The operator kill channel fired; shut down cleanly.
    ShutdownRequested,
    /// A heartbeat failed terminally; the server must restart.
    Unhealthy(Error),
}

/// Periodic health checker for a [`Heart`].
pub struct Monitor {
    ttl: Duration,
    interval: Duration,
    metrics: ClusterMetrics,
}

impl Monitor {
    /// Creates a monitor beating at half the given TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            interval: ttl / 2,
            metrics: ClusterMetrics::new(),
        }
    }

    /// Returns the TTL this monitor maintains.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Runs until the kill channel fires or a beat fails terminally.
    ///
    /// Each tick beats once and, on failure, retries once immediately: a
    /// single dropped request should not bounce the whole server.
    pub async fn run(&self, heart: &Heart, mut kill: watch::Receiver<bool>) -> MonitorOutcome {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.check(heart).await {
                        self.metrics.set_agent_healthy(false);
                        return MonitorOutcome::Unhealthy(err);
                    }
                    self.metrics.set_agent_healthy(true);
                }
                changed = kill.changed() => {
                    if changed.is_err() || *kill.borrow() {
                        info!("monitor shutdown requested");
                        return MonitorOutcome::ShutdownRequested;
                    }
                }
            }
        }
    }

    async fn check(&self, heart: &Heart) -> Result<(), Error> {
        match heart.beat(self.ttl).await {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!(error = %first, "heartbeat failed, retrying once");
                heart.beat(self.ttl).await.map_err(|err| {
                    Error::unhealthy(format!("heartbeat failed twice: {err}"))
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::machine::LocalMachine;
    use crate::registry::Registry;
    use crate::store::memory::InMemoryStore;
    use armada_core::{MachineId, MachineState};

    fn heart() -> Heart {
        let registry = Registry::new(
            Arc::new(InMemoryStore::new()),
            "/armada/",
            Duration::from_secs(1),
        );
        let machine = Arc::new(LocalMachine::new(MachineState::new(MachineId::generate())));
        Heart::new(registry, machine)
    }

    #[tokio::test]
    async fn kill_channel_requests_shutdown() {
        let monitor = Monitor::new(Duration::from_secs(30));
        let (kill_tx, kill_rx) = watch::channel(false);

        let heart = heart();
        let run = tokio::spawn(async move { monitor.run(&heart, kill_rx).await });

        kill_tx.send(true).unwrap();
        let outcome = run.await.unwrap();
        assert!(matches!(outcome, MonitorOutcome::ShutdownRequested));
    }

    #[tokio::test]
    async fn dropped_kill_sender_also_stops_the_monitor() {
        let monitor = Monitor::new(Duration::from_secs(30));
        let (kill_tx, kill_rx) = watch::channel(false);

        let heart = heart();
        let run = tokio::spawn(async move { monitor.run(&heart, kill_rx).await });

        drop(kill_tx);
        let outcome = run.await.unwrap();
        assert!(matches!(outcome, MonitorOutcome::ShutdownRequested));
    }

    #[tokio::test]
    async fn healthy_heart_keeps_running() {
        let monitor = Monitor::new(Duration::from_millis(40));
        let (kill_tx, kill_rx) = watch::channel(false);

        let heart = heart();
        let run = tokio::spawn(async move { monitor.run(&heart, kill_rx).await });

        // Let several ticks elapse, then shut down cleanly.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!run.is_finished());
        kill_tx.send(true).unwrap();
        assert!(matches!(
            run.await.unwrap(),
            MonitorOutcome::ShutdownRequested
        ));
    }

    #[tokio::test]
    async fn interval_is_half_the_ttl() {
        let monitor = Monitor::new(Duration::from_secs(30));
        assert_eq!(monitor.interval, Duration::from_secs(15));
        assert_eq!(monitor.ttl(), Duration::from_secs(30));
    }

    mod unhealthy {
        use async_trait::async_trait;
        use tokio::sync::broadcast;

        use super::*;
        use crate::store::{KeyValueStore, KvEntry, PutOptions, StoreEvent, WritePrecondition};
        use armada_core::Result;

        /// A store whose every operation fails, as if the network is gone.
        struct UnreachableStore {
            events: broadcast::Sender<StoreEvent>,
        }

        impl UnreachableStore {
            fn new() -> Self {
                let (events, _) = broadcast::channel(1);
                Self { events }
            }
        }

        #[async_trait]
        impl KeyValueStore for UnreachableStore {
            async fn get(&self, _key: &str) -> Result<Option<KvEntry>> {
                Err(Error::transient("store unreachable"))
            }

            async fn list(&self, _prefix: &str) -> Result<Vec<KvEntry>> {
                Err(Error::transient("store unreachable"))
            }

            async fn put(&self, _key: &str, _value: &str, _options: PutOptions) -> Result<u64> {
                Err(Error::transient("store unreachable"))
            }

            async fn delete(
                &self,
                _key: &str,
                _precondition: WritePrecondition,
            ) -> Result<bool> {
                Err(Error::transient("store unreachable"))
            }

            async fn latest_revision(&self) -> Result<u64> {
                Err(Error::transient("store unreachable"))
            }

            fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
                self.events.subscribe()
            }
        }

        #[tokio::test]
        async fn failing_beats_report_unhealthy() {
            let registry = Registry::new(
                Arc::new(UnreachableStore::new()),
                "/armada/",
                Duration::from_secs(1),
            );
            let machine = Arc::new(LocalMachine::new(MachineState::new(MachineId::generate())));
            let heart = Heart::new(registry, machine);

            let monitor = Monitor::new(Duration::from_millis(20));
            let (_kill_tx, kill_rx) = watch::channel(false);

            let outcome = monitor.run(&heart, kill_rx).await;
            assert!(matches!(outcome, MonitorOutcome::Unhealthy(_)));
        }
    }
}
