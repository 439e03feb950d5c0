//! The server supervisor.
//!
//! Composes heart, monitor, agent, publisher, and engine into one daemon,
//! owns their lifecycle, and restarts the whole assembly when the monitor
//! reports the machine unhealthy. Shutdown is cooperative: one stop broadcast
//! terminates every loop, and exceeding the shutdown timeout is a deliberate
//! abort so an external process manager can take over.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use armada_core::{Error, MachineState, Result};

use crate::agent::{Agent, AgentReconciler, UnitStateGenerator, UnitStatePublisher};
use crate::config::Config;
use crate::engine::Engine;
use crate::heart::Heart;
use crate::lease::LeaseManager;
use crate::machine::{load_or_create_machine_id, LocalMachine};
use crate::manager::UnitManager;
use crate::monitor::{Monitor, MonitorOutcome};
use crate::registry::Registry;
use crate::store::KeyValueStore;

/// Upper bound on waiting for components to stop before aborting.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Store connect/register retries start here and double per attempt.
const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Fallback tick for the agent reconciler; store events usually fire first.
const AGENT_RECONCILE_INTERVAL: Duration = Duration::from_secs(5);

/// Capacity of the generator → publisher heartbeat channel.
const HEARTBEAT_CHANNEL_CAPACITY: usize = 64;

/// Doubles a backoff delay up to the cap.
fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

/// The composed daemon.
pub struct Server {
    config: Config,
    heart: Heart,
    agent: Arc<Agent>,
    reconciler: Arc<AgentReconciler>,
    generator: Arc<UnitStateGenerator>,
    publisher: Arc<UnitStatePublisher>,
    engine: Arc<Engine>,
    registry: Registry,
}

impl Server {
    /// Builds the daemon from configuration, a store, and a unit manager.
    ///
    /// # Errors
    ///
    /// Fails fatally when the local machine identity cannot be established.
    pub fn new(
        config: Config,
        store: Arc<dyn KeyValueStore>,
        manager: Arc<dyn UnitManager>,
    ) -> Result<Self> {
        let machine_id = load_or_create_machine_id(&config.state_dir)?;

        let mut state = MachineState::new(machine_id).with_public_ip(config.public_ip.clone());
        state.metadata = config.metadata.clone();
        state.capabilities = config.capabilities.clone();
        state.version = env!("CARGO_PKG_VERSION").to_string();
        let machine = Arc::new(LocalMachine::new(state));

        let registry = Registry::new(store.clone(), &config.key_prefix, config.request_timeout);
        let leases = LeaseManager::new(store, &config.key_prefix);
        let heart = Heart::new(registry.clone(), machine.clone());

        let agent = Arc::new(Agent::new(
            manager.clone(),
            registry.clone(),
            machine.clone(),
            config.agent_ttl,
        ));
        let reconciler = Arc::new(AgentReconciler::new(
            registry.clone(),
            AGENT_RECONCILE_INTERVAL,
            !config.disable_watches,
        ));
        let generator = Arc::new(UnitStateGenerator::new(manager, config.agent_ttl / 2));
        let publisher = Arc::new(UnitStatePublisher::new(
            registry.clone(),
            machine.clone(),
            config.agent_ttl,
        ));
        let engine = Arc::new(Engine::new(registry.clone(), leases, machine));

        info!(machine = %machine_id, "server assembled");
        Ok(Self {
            config,
            heart,
            agent,
            reconciler,
            generator,
            publisher,
            engine,
            registry,
        })
    }

    /// Returns this server's registry handle.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Runs the daemon until the kill channel fires.
    ///
    /// Startup: establish presence in the store (register on first boot,
    /// beat on restart) with exponential backoff, then launch components and
    /// block on the monitor. An unhealthy monitor exit purges locally driven
    /// units and re-enters startup; an operator kill exits cleanly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fatal`] when component shutdown exceeds the timeout;
    /// by design there is no cleanup in that case.
    pub async fn run(&self, mut kill: watch::Receiver<bool>) -> Result<()> {
        let mut restart = false;

        loop {
            if !self.establish_presence(restart, &mut kill).await {
                info!("kill requested during store connect");
                return Ok(());
            }

            info!(restart, "starting server components");
            let (stop_tx, stop_rx) = watch::channel(false);
            let tasks = self.start_components(&stop_rx);

            let monitor = Monitor::new(self.config.agent_ttl);
            let outcome = monitor.run(&self.heart, kill.clone()).await;

            let _ = stop_tx.send(true);
            match outcome {
                MonitorOutcome::ShutdownRequested => {
                    self.wait_for_components(tasks).await?;
                    info!("server shut down");
                    return Ok(());
                }
                MonitorOutcome::Unhealthy(err) => {
                    error!(error = %err, "machine unhealthy; purging local units and restarting");
                    self.reconciler.purge(&self.agent).await;
                    self.wait_for_components(tasks).await?;
                    restart = true;
                }
            }
        }
    }

    /// Registers (or beats, on restart) until the store accepts the write.
    ///
    /// Returns `false` if the kill channel fired while retrying.
    async fn establish_presence(&self, restart: bool, kill: &mut watch::Receiver<bool>) -> bool {
        let ttl = self.config.agent_ttl;
        let mut delay = BACKOFF_INITIAL;

        loop {
            let attempt = if restart {
                self.heart.beat(ttl).await
            } else {
                self.heart.register(ttl).await
            };
            match attempt {
                Ok(()) => {
                    info!(restart, "machine presence established");
                    return true;
                }
                Err(err) => {
                    warn!(error = %err, retry_in_secs = delay.as_secs(),
                          "failed to establish presence");
                }
            }

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = kill.changed() => return false,
            }
            delay = next_backoff(delay, BACKOFF_MAX);
        }
    }

    fn start_components(&self, stop: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let (beat_tx, beat_rx) = mpsc::channel(HEARTBEAT_CHANNEL_CAPACITY);
        let mut tasks = Vec::new();

        let agent = self.agent.clone();
        let stop_rx = stop.clone();
        tasks.push(tokio::spawn(async move {
            agent.heartbeat(stop_rx).await;
        }));

        let reconciler = self.reconciler.clone();
        let agent = self.agent.clone();
        let stop_rx = stop.clone();
        tasks.push(tokio::spawn(async move {
            reconciler.run(&agent, stop_rx).await;
        }));

        let generator = self.generator.clone();
        let stop_rx = stop.clone();
        tasks.push(tokio::spawn(async move {
            generator.run(beat_tx, stop_rx).await;
        }));

        let publisher = self.publisher.clone();
        let stop_rx = stop.clone();
        tasks.push(tokio::spawn(async move {
            publisher.run(beat_rx, stop_rx).await;
        }));

        if self.config.disable_engine {
            info!("engine disabled; running as pure agent");
        } else {
            let engine = self.engine.clone();
            let interval = self.config.engine_reconcile_interval;
            let events = (!self.config.disable_watches).then(|| self.registry.subscribe());
            let stop_rx = stop.clone();
            tasks.push(tokio::spawn(async move {
                engine.run(interval, events, stop_rx).await;
            }));
        }

        tasks
    }

    async fn wait_for_components(&self, tasks: Vec<JoinHandle<()>>) -> Result<()> {
        let shutdown = futures::future::join_all(tasks);
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown).await {
            Ok(_) => Ok(()),
            Err(_) => Err(Error::fatal(
                "timed out waiting for server shutdown; aborting without cleanup",
            )),
        }
    }

    /// Tears down everything this server owns in the cluster: locally driven
    /// units, this machine's observations, the leader lease, and the machine
    /// record.
    pub async fn purge(&self) {
        self.reconciler.purge(&self.agent).await;
        self.publisher.purge().await;
        self.engine.purge().await;
        if let Err(err) = self.heart.clear().await {
            warn!(error = %err, "failed to clear machine record");
        }
    }
}
