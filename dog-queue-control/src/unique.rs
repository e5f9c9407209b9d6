//! Uniqueness guard: at most one pending-or-running chain per fingerprint.
//!
//! A lock is taken with an atomic create-if-absent when the chain is enqueued
//! and held for the whole logical chain (retries and continuations included).
//! Only a terminal state deletes it; the TTL reclaims locks of crashed holders.
//!
//! Each delivery of a hop that runs under a held lock first claims a hop key,
//! so a redelivered copy of the same hop cannot run next to the original.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{ControlResult, JobId, store::LockStore};

/// Argument list -> fingerprint
pub type FingerprintFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// Fingerprint function declared by a unique job type
#[derive(Clone)]
pub struct Uniqueness {
    fingerprint: FingerprintFn,
}

impl Uniqueness {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        Self {
            fingerprint: Arc::new(f),
        }
    }

    /// Fingerprint of an argument list
    pub fn fingerprint(&self, args: &Value) -> String {
        (self.fingerprint)(args)
    }
}

impl fmt::Debug for Uniqueness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Uniqueness(<fn>)")
    }
}

/// `queue:fingerprint`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    pub fn new(queue: &str, fingerprint: &str) -> Self {
        Self(format!("{}:{}", queue, fingerprint))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Admission control over a shared lock store
#[derive(Clone)]
pub struct UniquenessGuard {
    store: Arc<dyn LockStore>,
}

impl UniquenessGuard {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self { store }
    }

    /// Try to take the lock for `fingerprint` on behalf of chain `owner`.
    ///
    /// `Ok(None)` means another chain holds it and the job must be dropped.
    /// Store faults propagate; they are never read as "unlocked".
    pub async fn try_acquire(
        &self,
        queue: &str,
        fingerprint: &str,
        owner: &JobId,
        ttl: Duration,
    ) -> ControlResult<Option<LockLease>> {
        let key = LockKey::new(queue, fingerprint);
        let acquired = self.store.set_if_absent(key.as_str(), owner.as_str(), ttl).await?;

        if acquired {
            debug!(lock_key = %key, owner = %owner, "Acquired uniqueness lock");
            Ok(Some(LockLease::new(key, self.store.clone())))
        } else {
            debug!(lock_key = %key, "Uniqueness lock already held");
            Ok(None)
        }
    }

    /// Re-attach to a lock this chain already owns (continuations and retries)
    pub fn resume(&self, queue: &str, fingerprint: &str) -> LockLease {
        LockLease::new(LockKey::new(queue, fingerprint), self.store.clone())
    }

    /// Claim hop `(attempt, iteration)` of chain `owner` for this delivery.
    ///
    /// `Ok(None)` means another delivery of the same hop holds it.
    pub async fn claim_hop(
        &self,
        queue: &str,
        fingerprint: &str,
        owner: &JobId,
        attempt: u32,
        iteration: u32,
        ttl: Duration,
    ) -> ControlResult<Option<HopClaim>> {
        let key = HopClaim::key(&LockKey::new(queue, fingerprint), owner, attempt, iteration);
        if self.store.set_if_absent(&key, owner.as_str(), ttl).await? {
            debug!(hop_key = %key, "Claimed hop");
            Ok(Some(HopClaim {
                key,
                store: self.store.clone(),
            }))
        } else {
            debug!(hop_key = %key, "Hop already claimed by another delivery");
            Ok(None)
        }
    }

    /// Delete the lock for `fingerprint`
    pub async fn release(&self, queue: &str, fingerprint: &str) -> ControlResult<()> {
        let key = LockKey::new(queue, fingerprint);
        self.store.delete(key.as_str()).await?;
        debug!(lock_key = %key, "Released uniqueness lock");
        Ok(())
    }

    /// Check whether some chain holds the lock for `fingerprint`
    pub async fn is_locked(&self, queue: &str, fingerprint: &str) -> ControlResult<bool> {
        self.store.exists(LockKey::new(queue, fingerprint).as_str()).await
    }
}

/// A held uniqueness lock. Must be settled with [`release`](Self::release)
/// or [`retain`](Self::retain).
pub struct LockLease {
    key: LockKey,
    store: Arc<dyn LockStore>,
    settled: bool,
}

impl LockLease {
    fn new(key: LockKey, store: Arc<dyn LockStore>) -> Self {
        Self {
            key,
            store,
            settled: false,
        }
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// Terminal state reached: delete the lock
    pub async fn release(mut self) -> ControlResult<()> {
        self.settled = true;
        self.store.delete(self.key.as_str()).await?;
        debug!(lock_key = %self.key, "Released uniqueness lock");
        Ok(())
    }

    /// The chain goes on (enqueued, retried or continued): keep the lock
    pub fn retain(mut self) {
        self.settled = true;
        debug!(lock_key = %self.key, "Retaining uniqueness lock for the next hop");
    }
}

impl Drop for LockLease {
    fn drop(&mut self) {
        if !self.settled {
            warn!(lock_key = %self.key, "Lock lease dropped unsettled, TTL will reclaim it");
        }
    }
}

/// One delivery's claim on a chain hop, deleted once the hop settles
pub struct HopClaim {
    key: String,
    store: Arc<dyn LockStore>,
}

impl HopClaim {
    /// `lock_key:job_id:attempt:iteration`
    pub fn key(lock_key: &LockKey, owner: &JobId, attempt: u32, iteration: u32) -> String {
        format!("{}:{}:{}:{}", lock_key, owner, attempt, iteration)
    }

    /// The hop settled; faults are left to the TTL
    pub async fn settle(self) {
        if let Err(e) = self.store.delete(&self.key).await {
            warn!(hop_key = %self.key, "Failed to delete hop key, TTL will reclaim it: {}", e);
        }
    }
}

impl fmt::Debug for HopClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HopClaim").field("key", &self.key).finish()
    }
}

impl fmt::Debug for LockLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockLease")
            .field("key", &self.key)
            .field("settled", &self.settled)
            .finish()
    }
}
