//! In-memory unit manager implementation.
//!
//! Backs tests and standalone deployments: units are plain records, start and
//! stop flip their active state, and no processes are executed. Per-unit
//! failure injection lets tests exercise the agent's partial-failure paths.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;

use armada_core::{ContentHash, Error, Result, UnitName};

use super::{ManagedUnitState, UnitManager};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
struct ManagedUnit {
    contents: String,
    running: bool,
}

#[derive(Debug, Default)]
struct Inner {
    units: HashMap<UnitName, ManagedUnit>,
    failing: HashSet<UnitName>,
}

/// In-memory implementation of [`UnitManager`].
#[derive(Debug)]
pub struct InMemoryUnitManager {
    inner: RwLock<Inner>,
    events: broadcast::Sender<UnitName>,
}

impl Default for InMemoryUnitManager {
    fn default() -> Self {
        Self::new()
    }
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::fatal("unit manager lock poisoned")
}

impl InMemoryUnitManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            events,
        }
    }

    /// Makes every operation on the named unit fail until cleared.
    ///
    /// Test hook for exercising per-unit failure handling in the agent.
    pub fn set_failing(&self, name: &UnitName, failing: bool) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        if failing {
            inner.failing.insert(name.clone());
        } else {
            inner.failing.remove(name);
        }
        Ok(())
    }

    fn check_failing(inner: &Inner, name: &UnitName) -> Result<()> {
        if inner.failing.contains(name) {
            return Err(Error::transient(format!(
                "injected failure for unit {name}"
            )));
        }
        Ok(())
    }

    fn notify(&self, name: &UnitName) {
        let _ = self.events.send(name.clone());
    }
}

#[async_trait]
impl UnitManager for InMemoryUnitManager {
    async fn load(&self, name: &UnitName, contents: &str) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        Self::check_failing(&inner, name)?;
        inner.units.insert(
            name.clone(),
            ManagedUnit {
                contents: contents.to_string(),
                running: false,
            },
        );
        drop(inner);
        self.notify(name);
        Ok(())
    }

    async fn unload(&self, name: &UnitName) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        Self::check_failing(&inner, name)?;
        inner.units.remove(name);
        drop(inner);
        self.notify(name);
        Ok(())
    }

    async fn start(&self, name: &UnitName) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        Self::check_failing(&inner, name)?;
        match inner.units.get_mut(name) {
            Some(unit) => unit.running = true,
            None => return Err(Error::not_found("unit", name.as_str())),
        }
        drop(inner);
        self.notify(name);
        Ok(())
    }

    async fn stop(&self, name: &UnitName) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        Self::check_failing(&inner, name)?;
        match inner.units.get_mut(name) {
            Some(unit) => unit.running = false,
            None => return Err(Error::not_found("unit", name.as_str())),
        }
        drop(inner);
        self.notify(name);
        Ok(())
    }

    async fn units(&self) -> Result<Vec<ManagedUnitState>> {
        let inner = self.inner.read().map_err(poison_err)?;
        let mut states: Vec<ManagedUnitState> = inner
            .units
            .iter()
            .map(|(name, unit)| ManagedUnitState {
                name: name.clone(),
                load_state: "loaded".into(),
                active_state: if unit.running { "active" } else { "inactive" }.into(),
                sub_state: if unit.running { "running" } else { "dead" }.into(),
                content_hash: Some(ContentHash::of(&unit.contents)),
            })
            .collect();
        states.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(states)
    }

    fn subscribe(&self) -> broadcast::Receiver<UnitName> {
        self.events.subscribe()
    }
}
