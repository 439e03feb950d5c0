//! Convergence proof with watches disabled.
//!
//! The store event stream is an optimization, never a correctness
//! dependency: with every watch turned off, periodic reconciliation alone
//! must restore all invariants. These tests run the real engine and agent
//! loops in poll-only mode and wait for convergence.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use armada_cluster::agent::{Agent, AgentReconciler};
use armada_cluster::engine::Engine;
use armada_cluster::lease::LeaseManager;
use armada_cluster::machine::LocalMachine;
use armada_cluster::manager::memory::InMemoryUnitManager;
use armada_cluster::manager::UnitManager;
use armada_cluster::registry::Registry;
use armada_cluster::store::memory::InMemoryStore;
use armada_core::{MachineId, MachineState, Result, ScheduledUnit, TargetState, Unit};

const PREFIX: &str = "/armada/";
const TICK: Duration = Duration::from_millis(50);
const CONVERGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Polls until the condition holds or the convergence timeout elapses.
async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + CONVERGE_TIMEOUT;
    loop {
        if check().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for: {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn poll_only_mode_converges_without_watches() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let registry = Registry::new(store.clone(), PREFIX, Duration::from_secs(1));

    // One machine, registered with a long TTL.
    let state = MachineState::new(MachineId::generate());
    registry
        .set_machine_state(&state, Duration::from_secs(60))
        .await?;
    let machine = Arc::new(LocalMachine::new(state));

    let manager = Arc::new(InMemoryUnitManager::new());
    let agent = Arc::new(Agent::new(
        manager.clone(),
        registry.clone(),
        machine.clone(),
        Duration::from_secs(60),
    ));

    // Watches disabled everywhere: the engine gets no event stream and the
    // reconciler runs on its tick alone.
    let reconciler = Arc::new(AgentReconciler::new(registry.clone(), TICK, false));
    let engine = Arc::new(Engine::new(
        registry.clone(),
        LeaseManager::new(store, PREFIX),
        machine,
    ));

    let (stop_tx, stop_rx) = watch::channel(false);
    let engine_task = {
        let engine = engine.clone();
        let stop = stop_rx.clone();
        tokio::spawn(async move { engine.run(TICK, None, stop).await })
    };
    let agent_task = {
        let reconciler = reconciler.clone();
        let agent = agent.clone();
        let stop = stop_rx;
        tokio::spawn(async move { reconciler.run(&agent, stop).await })
    };

    // Submit a unit and wait for the loops to pick it up on ticks alone.
    let web = Unit::new("web.service".parse().unwrap(), "contents", TargetState::Launched);
    registry.create_unit(&web).await?;

    eventually("web.service to be bound and launched", || {
        let registry = registry.clone();
        let manager = manager.clone();
        async move {
            let bound = registry
                .scheduled_units()
                .await
                .is_ok_and(|s| s.iter().any(ScheduledUnit::is_scheduled));
            let launched = manager
                .units()
                .await
                .is_ok_and(|units| units.iter().any(|u| u.is_launched()));
            bound && launched
        }
    })
    .await;

    // Flip the target to inactive; invariant 4 must be restored by polling.
    registry
        .set_unit_target_state(&web.name, TargetState::Inactive)
        .await?;

    eventually("web.service to be unbound and unloaded", || {
        let registry = registry.clone();
        let manager = manager.clone();
        async move {
            let unbound = registry
                .scheduled_units()
                .await
                .is_ok_and(|s| s.iter().all(|u| !u.is_scheduled()));
            let unloaded = manager.units().await.is_ok_and(|units| units.is_empty());
            unbound && unloaded
        }
    })
    .await;

    let _ = stop_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(5), engine_task).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), agent_task).await;
    Ok(())
}

#[tokio::test]
async fn watch_driven_mode_converges_the_same_way() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let registry = Registry::new(store.clone(), PREFIX, Duration::from_secs(1));

    let state = MachineState::new(MachineId::generate());
    registry
        .set_machine_state(&state, Duration::from_secs(60))
        .await?;
    let machine = Arc::new(LocalMachine::new(state));

    let manager = Arc::new(InMemoryUnitManager::new());
    let agent = Arc::new(Agent::new(
        manager.clone(),
        registry.clone(),
        machine.clone(),
        Duration::from_secs(60),
    ));

    // A deliberately glacial tick: if convergence happens inside the test
    // timeout, the event stream did the triggering.
    let slow = Duration::from_secs(3600);
    let reconciler = Arc::new(AgentReconciler::new(registry.clone(), slow, true));
    let engine = Arc::new(Engine::new(
        registry.clone(),
        LeaseManager::new(store, PREFIX),
        machine,
    ));

    let (stop_tx, stop_rx) = watch::channel(false);
    let events = registry.subscribe();
    {
        let engine = engine.clone();
        let stop = stop_rx.clone();
        tokio::spawn(async move { engine.run(slow, Some(events), stop).await });
    }
    {
        let reconciler = reconciler.clone();
        let agent = agent.clone();
        let stop = stop_rx;
        tokio::spawn(async move { reconciler.run(&agent, stop).await });
    }

    // Give both loops their initial tick before relying on events.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let web = Unit::new("web.service".parse().unwrap(), "contents", TargetState::Launched);
    registry.create_unit(&web).await?;

    eventually("event-driven binding and launch", || {
        let registry = registry.clone();
        let manager = manager.clone();
        async move {
            let bound = registry
                .scheduled_units()
                .await
                .is_ok_and(|s| s.iter().any(ScheduledUnit::is_scheduled));
            let launched = manager
                .units()
                .await
                .is_ok_and(|units| units.iter().any(|u| u.is_launched()));
            bound && launched
        }
    })
    .await;

    let _ = stop_tx.send(true);
    Ok(())
}
