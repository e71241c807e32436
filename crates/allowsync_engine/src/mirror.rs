//! Mirror of the committed snapshot in shared storage.
//!
//! The mirror lets a freshly started replica serve immediately, before its
//! first successful source load. It is written after every commit that
//! changed the snapshot, with bounded retries. A failed write never
//! affects the committed local snapshot.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use crate::shutdown::ShutdownSignal;
use allowsync_core::{MirrorRecord, Snapshot};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A shared key/value store with expiry.
pub trait MirrorBackend: Send + Sync {
    /// Reads the value under `key`. Expired values read as `None`.
    fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>>;

    /// Writes `value` under `key` with the given lifetime.
    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> SyncResult<()>;
}

/// In-memory mirror backend.
#[derive(Debug, Default)]
pub struct MemoryMirror {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
    writes: Mutex<u64>,
}

impl MemoryMirror {
    /// Creates an empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful writes.
    pub fn writes(&self) -> u64 {
        *self.writes.lock()
    }
}

impl MirrorBackend for MemoryMirror {
    fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>> {
        let entries = self.entries.lock();
        Ok(entries
            .get(key)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> SyncResult<()> {
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_vec(), Instant::now() + ttl));
        *self.writes.lock() += 1;
        Ok(())
    }
}

/// Writes snapshots to a mirror backend with bounded retries.
#[derive(Clone)]
pub struct RetryingMirrorWriter {
    backend: Arc<dyn MirrorBackend>,
    key: String,
    ttl: Duration,
    retry: RetryConfig,
    shutdown: ShutdownSignal,
}

impl RetryingMirrorWriter {
    /// Creates a writer.
    pub fn new(
        backend: Arc<dyn MirrorBackend>,
        key: impl Into<String>,
        ttl: Duration,
        retry: RetryConfig,
    ) -> Self {
        Self {
            backend,
            key: key.into(),
            ttl,
            retry,
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Makes retry sleeps cancellable by `shutdown`.
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Returns the mirror key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Writes `snapshot`, retrying retryable failures.
    ///
    /// Returns the number of attempts used.
    ///
    /// # Errors
    ///
    /// - `MirrorWriteFailed` once the attempt budget is spent or a
    ///   non-retryable error occurs
    /// - `Cancelled` if shutdown interrupts a backoff sleep
    /// - `Core` if the snapshot cannot be encoded
    pub fn write(&self, snapshot: &Snapshot) -> SyncResult<u32> {
        let payload = MirrorRecord::from_snapshot(snapshot).encode()?;
        let max_attempts = self.retry.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.backend.set(&self.key, &payload, self.ttl) {
                Ok(()) => {
                    debug!(key = %self.key, attempt, bytes = payload.len(), "snapshot mirrored");
                    return Ok(attempt);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        key = %self.key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "mirror write failed, retrying"
                    );
                    if self.shutdown.wait_timeout(delay) {
                        return Err(SyncError::Cancelled);
                    }
                }
                Err(e) => {
                    return Err(SyncError::MirrorWriteFailed {
                        attempts: attempt,
                        reason: e.to_string(),
                    })
                }
            }
        }
    }

    /// Reads the mirrored snapshot.
    ///
    /// Returns `Ok(None)` when nothing is mirrored or the entry expired.
    /// Undecodable or tampered entries are errors.
    pub fn read(&self) -> SyncResult<Option<Snapshot>> {
        let Some(bytes) = self.backend.get(&self.key)? else {
            return Ok(None);
        };
        let snapshot = MirrorRecord::decode(&bytes)?.into_snapshot()?;
        Ok(Some(snapshot))
    }
}

impl std::fmt::Debug for RetryingMirrorWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingMirrorWriter")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("retry", &self.retry)
            .finish()
    }
}
