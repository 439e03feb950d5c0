//! Pluggable key/value storage for cluster state.
//!
//! The [`KeyValueStore`] trait is the boundary contract with the shared
//! strongly-consistent store. Everything above it (registry, leases, engine,
//! agents) is written against this trait; the in-memory implementation in
//! [`memory`] backs tests and single-process deployments, and production
//! wrappers over an external store plug in without touching the control
//! loops.
//!
//! ## Design Principles
//!
//! - **CAS semantics**: Every write can be gated on the prior revision,
//!   which is the anti-split-brain primitive the whole system leans on
//! - **TTLs are the liveness mechanism**: Machine records, observations, and
//!   leases all expire rather than being garbage-collected
//! - **Watches are an optimization**: The event stream is at-least-once with
//!   per-key ordering; correctness never depends on it

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use armada_core::Result;

/// A precondition attached to a write or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePrecondition {
    /// Apply unconditionally.
    #[default]
    None,
    /// Apply only if the key does not currently exist.
    MustNotExist,
    /// Apply only if the key exists at exactly this revision.
    RevisionMatches(u64),
}

/// Options for a [`KeyValueStore::put`] call.
#[derive(Debug, Clone, Copy, Default)]
pub struct PutOptions {
    /// Precondition gating the write.
    pub precondition: WritePrecondition,
    /// Time-to-live; the entry silently expires after this duration.
    pub ttl: Option<Duration>,
}

impl PutOptions {
    /// Creates unconditional, non-expiring options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires that the key does not yet exist.
    #[must_use]
    pub const fn must_not_exist(mut self) -> Self {
        self.precondition = WritePrecondition::MustNotExist;
        self
    }

    /// Requires that the key currently has the given revision.
    #[must_use]
    pub const fn revision_matches(mut self, revision: u64) -> Self {
        self.precondition = WritePrecondition::RevisionMatches(revision);
        self
    }

    /// Attaches a time-to-live to the entry.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// An entry read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    /// The full key.
    pub key: String,
    /// The stored UTF-8 JSON value.
    pub value: String,
    /// The revision at which the entry was last written.
    pub revision: u64,
}

/// The kind of change a [`StoreEvent`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEventKind {
    /// The key was created or overwritten.
    Put,
    /// The key was explicitly deleted.
    Delete,
    /// The key's TTL elapsed.
    Expire,
}

/// A change notification from the store.
///
/// Delivery is at-least-once with per-key ordering; consecutive changes to
/// the same key may be observed coalesced. A receiver that falls behind gets
/// a lag error from the broadcast channel and must fall back to polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    /// The full key that changed.
    pub key: String,
    /// What happened to it.
    pub kind: StoreEventKind,
    /// The store revision associated with the change.
    pub revision: u64,
}

/// Storage abstraction over the shared strongly-consistent store.
///
/// ## CAS Semantics
///
/// `put` and `delete` take a [`WritePrecondition`]; a failed precondition
/// surfaces as [`armada_core::Error::PreconditionFailed`] carrying the actual
/// revision. This is the core primitive for distributed correctness: two
/// believed leaders can both write, and exactly one CAS wins.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` to support concurrent access from every
/// control loop in the process.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Gets a single entry, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<KvEntry>>;

    /// Lists all live entries under a key prefix, sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<KvEntry>>;

    /// Writes an entry, subject to the options' precondition and TTL.
    ///
    /// Returns the revision assigned to the write.
    async fn put(&self, key: &str, value: &str, options: PutOptions) -> Result<u64>;

    /// Deletes an entry, subject to the precondition.
    ///
    /// Returns `true` if an entry was deleted, `false` if the key was absent.
    async fn delete(&self, key: &str, precondition: WritePrecondition) -> Result<bool>;

    /// Returns the store's latest revision.
    async fn latest_revision(&self) -> Result<u64>;

    /// Subscribes to the change stream.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_options_builders_compose() {
        let options = PutOptions::new()
            .revision_matches(7)
            .with_ttl(Duration::from_secs(30));
        assert_eq!(options.precondition, WritePrecondition::RevisionMatches(7));
        assert_eq!(options.ttl, Some(Duration::from_secs(30)));

        let create = PutOptions::new().must_not_exist();
        assert_eq!(create.precondition, WritePrecondition::MustNotExist);
        assert_eq!(create.ttl, None);
    }

    #[test]
    fn default_precondition_is_none() {
        assert_eq!(WritePrecondition::default(), WritePrecondition::None);
    }
}
