//! Named TTL leases over the shared store.
//!
//! Leases are the leader-election primitive: a named record whose holder and
//! version are guarded by compare-and-swap, and whose TTL bounds how long a
//! crashed holder can block a successor.
//!
//! ## Design Principles
//!
//! - **Leases, not locks**: Holders own a time-bounded claim, never an
//!   indefinite lock
//! - **Renewal is a CAS**: A displaced holder learns it lost on its next
//!   renew, which returns `PreconditionFailed`, and must cease writing before
//!   the new holder's TTL window opens
//! - **No native election primitive**: Only CAS + TTL from the store contract
//!   is used, so any conforming backend can arbitrate leadership

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use armada_core::{Error, LeaseKey, MachineId, Result};

use crate::store::{KeyValueStore, PutOptions, WritePrecondition};

/// A named lease as stored under `leases/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// The lease name (e.g. `engine-leader`).
    pub name: String,

    /// The machine currently holding the lease.
    pub holder: MachineId,

    /// Incremented whenever ownership is forced over (steal).
    pub version: u64,

    /// The TTL the lease was last written with, in seconds.
    pub ttl_secs: u64,

    /// The store revision backing this view of the lease. Used to guard
    /// renew/release; not part of the stored value.
    #[serde(skip)]
    revision: u64,
}

impl Lease {
    /// Returns the store revision this lease view was read at.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }
}

/// Manages named leases on behalf of one machine.
#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl LeaseManager {
    /// Creates a lease manager over the given store and key prefix.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: &str) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, LeaseKey::named(name))
    }

    /// Attempts to acquire the named lease for `holder`.
    ///
    /// Returns the lease if it was free (or expired, or already held by this
    /// holder, in which case it is refreshed), or `None` if another holder
    /// has a live claim.
    pub async fn acquire(
        &self,
        name: &str,
        holder: &MachineId,
        ttl: Duration,
    ) -> Result<Option<Lease>> {
        let key = self.key(name);

        match self.store.get(&key).await? {
            None => {
                let mut lease = Lease {
                    name: name.to_string(),
                    holder: *holder,
                    version: 1,
                    ttl_secs: ttl.as_secs(),
                    revision: 0,
                };
                let value = serde_json::to_string(&lease)?;
                match self
                    .store
                    .put(&key, &value, PutOptions::new().must_not_exist().with_ttl(ttl))
                    .await
                {
                    Ok(revision) => {
                        lease.revision = revision;
                        Ok(Some(lease))
                    }
                    // Someone else created it between our read and write.
                    Err(err) if err.is_precondition_failed() => Ok(None),
                    Err(err) => Err(err),
                }
            }
            Some(entry) => {
                let mut lease: Lease = serde_json::from_str(&entry.value)?;
                lease.revision = entry.revision;
                if lease.holder != *holder {
                    return Ok(None);
                }
                // Already ours: refresh the claim in place.
                match self.renew(&lease, ttl).await {
                    Ok(renewed) => Ok(Some(renewed)),
                    Err(err) if err.is_precondition_failed() => Ok(None),
                    Err(err) => Err(err),
                }
            }
        }
    }

    /// Extends the lease's TTL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreconditionFailed`] if the caller has been displaced
    /// (the lease expired, was stolen, or was re-acquired by another holder).
    pub async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease> {
        let key = self.key(&lease.name);
        let mut renewed = lease.clone();
        renewed.ttl_secs = ttl.as_secs();

        let value = serde_json::to_string(&renewed)?;
        let revision = self
            .store
            .put(
                &key,
                &value,
                PutOptions::new()
                    .revision_matches(lease.revision)
                    .with_ttl(ttl),
            )
            .await?;
        renewed.revision = revision;
        Ok(renewed)
    }

    /// Releases the lease.
    ///
    /// Returns `true` if this call deleted the lease, `false` if the caller
    /// no longer held it.
    pub async fn release(&self, lease: &Lease) -> Result<bool> {
        let key = self.key(&lease.name);
        match self
            .store
            .delete(&key, WritePrecondition::RevisionMatches(lease.revision))
            .await
        {
            Ok(deleted) => Ok(deleted),
            Err(err) if err.is_precondition_failed() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Forces ownership of the named lease.
    ///
    /// Only for operator intervention: the displaced holder finds out on its
    /// next renew. The version is bumped so the theft is visible.
    pub async fn steal(&self, name: &str, holder: &MachineId, ttl: Duration) -> Result<Lease> {
        let key = self.key(name);
        let current = self.store.get(&key).await?;

        let (version, precondition) = match &current {
            Some(entry) => {
                let existing: Lease = serde_json::from_str(&entry.value)?;
                (
                    existing.version + 1,
                    WritePrecondition::RevisionMatches(entry.revision),
                )
            }
            None => (1, WritePrecondition::MustNotExist),
        };

        let mut lease = Lease {
            name: name.to_string(),
            holder: *holder,
            version,
            ttl_secs: ttl.as_secs(),
            revision: 0,
        };
        let value = serde_json::to_string(&lease)?;
        let options = PutOptions {
            precondition,
            ttl: Some(ttl),
        };
        lease.revision = self.store.put(&key, &value, options).await?;
        Ok(lease)
    }

    /// Returns the current lease, if one is live.
    pub async fn current(&self, name: &str) -> Result<Option<Lease>> {
        let entry = self.store.get(&self.key(name)).await?;
        entry
            .map(|entry| {
                let mut lease: Lease =
                    serde_json::from_str(&entry.value).map_err(Error::from)?;
                lease.revision = entry.revision;
                Ok(lease)
            })
            .transpose()
    }
}
