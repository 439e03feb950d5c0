//! In-memory key/value store implementation.
//!
//! Backs tests and single-process deployments. Honors the full contract:
//! store-global monotonic revisions, CAS preconditions, TTL expiry, and the
//! change stream.
//!
//! ## Limitations
//!
//! - **Single-process only**: No cross-process coordination or durability
//! - **Lazy expiry**: TTLs are enforced when entries are next touched, so an
//!   expired entry is invisible immediately but its `Expire` event fires on
//!   the next store access

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use armada_core::{Error, Result};

use super::{
    KeyValueStore, KvEntry, PutOptions, StoreEvent, StoreEventKind, WritePrecondition,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    revision: u64,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    revision: u64,
}

/// In-memory implementation of [`KeyValueStore`].
#[derive(Debug)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts a lock poison error to a fatal error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::fatal("store lock poisoned")
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            events,
        }
    }

    /// Removes expired entries and emits their `Expire` events.
    ///
    /// Called under the write lock before every mutation and read so expired
    /// entries are never observable.
    fn reap_expired(&self, inner: &mut Inner, now: DateTime<Utc>) {
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at.is_some_and(|at| at <= now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            if let Some(entry) = inner.entries.remove(&key) {
                let _ = self.events.send(StoreEvent {
                    key,
                    kind: StoreEventKind::Expire,
                    revision: entry.revision,
                });
            }
        }
    }

    fn check_precondition(
        key: &str,
        current: Option<&Entry>,
        precondition: WritePrecondition,
    ) -> Result<()> {
        match (precondition, current) {
            (WritePrecondition::None, _) => Ok(()),
            (WritePrecondition::MustNotExist, None) => Ok(()),
            (WritePrecondition::MustNotExist, Some(entry)) => Err(Error::PreconditionFailed {
                key: key.to_string(),
                expected: None,
                actual: Some(entry.revision),
            }),
            (WritePrecondition::RevisionMatches(expected), Some(entry)) => {
                if entry.revision == expected {
                    Ok(())
                } else {
                    Err(Error::PreconditionFailed {
                        key: key.to_string(),
                        expected: Some(expected),
                        actual: Some(entry.revision),
                    })
                }
            }
            (WritePrecondition::RevisionMatches(expected), None) => {
                Err(Error::PreconditionFailed {
                    key: key.to_string(),
                    expected: Some(expected),
                    actual: None,
                })
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<KvEntry>> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        self.reap_expired(&mut inner, Utc::now());

        Ok(inner.entries.get(key).map(|entry| KvEntry {
            key: key.to_string(),
            value: entry.value.clone(),
            revision: entry.revision,
        }))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvEntry>> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        self.reap_expired(&mut inner, Utc::now());

        Ok(inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| KvEntry {
                key: key.clone(),
                value: entry.value.clone(),
                revision: entry.revision,
            })
            .collect())
    }

    async fn put(&self, key: &str, value: &str, options: PutOptions) -> Result<u64> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        let now = Utc::now();
        self.reap_expired(&mut inner, now);

        Self::check_precondition(key, inner.entries.get(key), options.precondition)?;

        inner.revision += 1;
        let revision = inner.revision;
        let expires_at = options
            .ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| now + ttl);

        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                revision,
                expires_at,
            },
        );
        drop(inner);

        let _ = self.events.send(StoreEvent {
            key: key.to_string(),
            kind: StoreEventKind::Put,
            revision,
        });
        Ok(revision)
    }

    async fn delete(&self, key: &str, precondition: WritePrecondition) -> Result<bool> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        self.reap_expired(&mut inner, Utc::now());

        match inner.entries.get(key) {
            None => {
                // Deleting an absent key is a no-op unless a revision was required.
                Self::check_precondition(key, None, precondition)?;
                Ok(false)
            }
            Some(entry) => {
                Self::check_precondition(key, Some(entry), precondition)?;
                let revision = entry.revision;
                inner.entries.remove(key);
                drop(inner);

                let _ = self.events.send(StoreEvent {
                    key: key.to_string(),
                    kind: StoreEventKind::Delete,
                    revision,
                });
                Ok(true)
            }
        }
    }

    async fn latest_revision(&self) -> Result<u64> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner.revision)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn get_returns_none_for_missing_key() -> Result<()> {
        let store = InMemoryStore::new();
        assert_eq!(store.get("units/web.service/object").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() -> Result<()> {
        let store = InMemoryStore::new();

        let revision = store.put("machines/m1", "{}", PutOptions::new()).await?;
        let entry = store.get("machines/m1").await?.expect("entry");
        assert_eq!(entry.value, "{}");
        assert_eq!(entry.revision, revision);
        Ok(())
    }

    #[tokio::test]
    async fn revisions_are_monotonic_and_global() -> Result<()> {
        let store = InMemoryStore::new();

        let r1 = store.put("a", "1", PutOptions::new()).await?;
        let r2 = store.put("b", "2", PutOptions::new()).await?;
        let r3 = store.put("a", "3", PutOptions::new()).await?;
        assert!(r1 < r2 && r2 < r3);
        assert_eq!(store.latest_revision().await?, r3);
        Ok(())
    }

    #[tokio::test]
    async fn must_not_exist_rejects_overwrite() -> Result<()> {
        let store = InMemoryStore::new();
        store
            .put("units/web.service/target-machine", "m1", PutOptions::new())
            .await?;

        let err = store
            .put(
                "units/web.service/target-machine",
                "m2",
                PutOptions::new().must_not_exist(),
            )
            .await
            .expect_err("second create must lose");
        assert!(err.is_precondition_failed());

        let entry = store
            .get("units/web.service/target-machine")
            .await?
            .expect("entry");
        assert_eq!(entry.value, "m1");
        Ok(())
    }

    #[tokio::test]
    async fn revision_matches_guards_writes() -> Result<()> {
        let store = InMemoryStore::new();
        let revision = store.put("leases/engine-leader", "a", PutOptions::new()).await?;

        // Matching revision succeeds.
        store
            .put(
                "leases/engine-leader",
                "b",
                PutOptions::new().revision_matches(revision),
            )
            .await?;

        // Stale revision loses.
        let err = store
            .put(
                "leases/engine-leader",
                "c",
                PutOptions::new().revision_matches(revision),
            )
            .await
            .expect_err("stale CAS must lose");
        assert!(err.is_precondition_failed());
        Ok(())
    }

    #[tokio::test]
    async fn delete_is_idempotent_unless_guarded() -> Result<()> {
        let store = InMemoryStore::new();
        store.put("a", "1", PutOptions::new()).await?;

        assert!(store.delete("a", WritePrecondition::None).await?);
        assert!(!store.delete("a", WritePrecondition::None).await?);

        let err = store
            .delete("a", WritePrecondition::RevisionMatches(1))
            .await
            .expect_err("guarded delete of absent key must fail");
        assert!(err.is_precondition_failed());
        Ok(())
    }

    #[tokio::test]
    async fn list_returns_prefix_sorted() -> Result<()> {
        let store = InMemoryStore::new();
        store.put("units/b.service/object", "b", PutOptions::new()).await?;
        store.put("units/a.service/object", "a", PutOptions::new()).await?;
        store.put("machines/m1", "m", PutOptions::new()).await?;

        let entries = store.list("units/").await?;
        let keys: Vec<_> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["units/a.service/object", "units/b.service/object"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn ttl_entries_expire() -> Result<()> {
        let store = InMemoryStore::new();
        store
            .put(
                "machines/m1",
                "{}",
                PutOptions::new().with_ttl(Duration::from_millis(10)),
            )
            .await?;

        assert!(store.get("machines/m1").await?.is_some());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("machines/m1").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn expiry_emits_an_expire_event() -> Result<()> {
        let store = InMemoryStore::new();
        let mut events = store.subscribe();

        store
            .put(
                "machines/m1",
                "{}",
                PutOptions::new().with_ttl(Duration::from_millis(10)),
            )
            .await?;
        assert_eq!(events.recv().await.unwrap().kind, StoreEventKind::Put);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let _ = store.get("machines/m1").await?;
        assert_eq!(events.recv().await.unwrap().kind, StoreEventKind::Expire);
        Ok(())
    }

    #[tokio::test]
    async fn puts_and_deletes_emit_events_in_order() -> Result<()> {
        let store = InMemoryStore::new();
        let mut events = store.subscribe();

        store.put("a", "1", PutOptions::new()).await?;
        store.delete("a", WritePrecondition::None).await?;

        let first = events.recv().await.unwrap();
        assert_eq!((first.key.as_str(), first.kind), ("a", StoreEventKind::Put));
        let second = events.recv().await.unwrap();
        assert_eq!(
            (second.key.as_str(), second.kind),
            ("a", StoreEventKind::Delete)
        );
        Ok(())
    }

    #[tokio::test]
    async fn refreshing_a_ttl_extends_expiry() -> Result<()> {
        let store = InMemoryStore::new();
        store
            .put(
                "machines/m1",
                "{}",
                PutOptions::new().with_ttl(Duration::from_millis(40)),
            )
            .await?;
        tokio::time::sleep(Duration::from_millis(25)).await;

        // Refresh before expiry.
        store
            .put(
                "machines/m1",
                "{}",
                PutOptions::new().with_ttl(Duration::from_millis(40)),
            )
            .await?;
        tokio::time::sleep(Duration::from_millis(25)).await;

        assert!(store.get("machines/m1").await?.is_some());
        Ok(())
    }
}
