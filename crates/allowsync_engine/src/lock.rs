//! Distributed refresh lock.
//!
//! A lock backend is any store offering atomic set-if-absent with expiry.
//! Tokens expire on their own, so a replica that crashes while holding the
//! lock blocks other replicas for at most one TTL.
//!
//! [`DistributedLock`] layers the degradation policy on top of a backend:
//!
//! | backend      | result                                   |
//! |--------------|------------------------------------------|
//! | none         | `Bypassed` (single-replica semantics)    |
//! | free         | `Acquired(token)`                        |
//! | held         | `NotAcquired`                            |
//! | erroring     | `NotAcquired` if `require_lock`, else `Bypassed` |

use crate::error::SyncResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Proof of holding a lock key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    /// Locked key.
    pub key: String,
    /// Unique holder id.
    pub id: String,
}

impl LockToken {
    /// Creates a fresh token for `key`.
    pub fn generate(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            id: Uuid::new_v4().to_string(),
        }
    }
}

/// A store offering atomic set-if-absent with expiry.
pub trait LockBackend: Send + Sync {
    /// Acquires `key` for `ttl` if nobody holds it.
    ///
    /// Returns `Ok(None)` when the key is held by someone else.
    fn try_acquire(&self, key: &str, ttl: Duration) -> SyncResult<Option<LockToken>>;

    /// Releases a token. Releasing an expired or foreign token is a no-op.
    fn release(&self, token: &LockToken) -> SyncResult<()>;
}

/// Result of a lock attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    /// The backend granted the lock.
    Acquired(LockToken),
    /// No usable backend; proceed as the only replica.
    Bypassed,
    /// Someone else holds the lock, or the backend failed in a
    /// configuration that forbids proceeding unprotected.
    NotAcquired,
}

impl LockAttempt {
    /// Returns true if the cycle may proceed.
    pub fn may_proceed(&self) -> bool {
        !matches!(self, LockAttempt::NotAcquired)
    }
}

/// The refresh lock with graceful single-replica degradation.
#[derive(Clone)]
pub struct DistributedLock {
    backend: Option<Arc<dyn LockBackend>>,
    require: bool,
}

impl DistributedLock {
    /// Creates a lock over an optional backend.
    ///
    /// With `require` set, backend errors skip the cycle instead of letting
    /// it run unprotected.
    pub fn new(backend: Option<Arc<dyn LockBackend>>, require: bool) -> Self {
        Self { backend, require }
    }

    /// A lock with no backend; every attempt is bypassed.
    pub fn single_replica() -> Self {
        Self::new(None, false)
    }

    /// Returns true if a backend is configured.
    pub fn is_distributed(&self) -> bool {
        self.backend.is_some()
    }

    /// Attempts to take the lock.
    pub fn try_acquire(&self, key: &str, ttl: Duration) -> LockAttempt {
        let Some(backend) = &self.backend else {
            return LockAttempt::Bypassed;
        };

        match backend.try_acquire(key, ttl) {
            Ok(Some(token)) => {
                debug!(key, token = %token.id, "refresh lock acquired");
                LockAttempt::Acquired(token)
            }
            Ok(None) => {
                debug!(key, "refresh lock held elsewhere");
                LockAttempt::NotAcquired
            }
            Err(e) if self.require => {
                warn!(key, error = %e, "lock backend error, skipping cycle");
                LockAttempt::NotAcquired
            }
            Err(e) => {
                warn!(key, error = %e, "lock backend unreachable, proceeding as single replica");
                LockAttempt::Bypassed
            }
        }
    }

    /// Releases a previously acquired lock. Errors are logged; the token
    /// expires on its own.
    pub fn release(&self, attempt: &LockAttempt) {
        let (Some(backend), LockAttempt::Acquired(token)) = (&self.backend, attempt) else {
            return;
        };
        match backend.release(token) {
            Ok(()) => debug!(key = %token.key, "refresh lock released"),
            Err(e) => warn!(key = %token.key, error = %e, "failed to release refresh lock"),
        }
    }

    /// Attempts to take the lock, returning a guard that releases on drop.
    pub fn acquire(&self, key: &str, ttl: Duration) -> Option<LockGuard<'_>> {
        let attempt = self.try_acquire(key, ttl);
        attempt.may_proceed().then_some(LockGuard {
            lock: self,
            attempt,
        })
    }
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("distributed", &self.is_distributed())
            .field("require", &self.require)
            .finish()
    }
}

/// Holds the refresh lock for one cycle.
///
/// Dropping the guard releases the lock, including while unwinding from a
/// panic inside the cycle.
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a DistributedLock,
    attempt: LockAttempt,
}

impl LockGuard<'_> {
    /// Returns the underlying attempt.
    pub fn attempt(&self) -> &LockAttempt {
        &self.attempt
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(&self.attempt);
    }
}

/// In-memory lock backend.
///
/// Suitable for tests and for several schedulers sharing one process.
#[derive(Debug, Default)]
pub struct MemoryLockBackend {
    held: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryLockBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `key` is held by a live token.
    pub fn is_held(&self, key: &str) -> bool {
        self.held
            .lock()
            .get(key)
            .is_some_and(|(_, expires)| *expires > Instant::now())
    }
}

impl LockBackend for MemoryLockBackend {
    fn try_acquire(&self, key: &str, ttl: Duration) -> SyncResult<Option<LockToken>> {
        let mut held = self.held.lock();
        let now = Instant::now();
        if let Some((_, expires)) = held.get(key) {
            if *expires > now {
                return Ok(None);
            }
        }

        let token = LockToken::generate(key);
        held.insert(key.to_string(), (token.id.clone(), now + ttl));
        Ok(Some(token))
    }

    fn release(&self, token: &LockToken) -> SyncResult<()> {
        let mut held = self.held.lock();
        if held.get(&token.key).is_some_and(|(id, _)| *id == token.id) {
            held.remove(&token.key);
        }
        Ok(())
    }
}
