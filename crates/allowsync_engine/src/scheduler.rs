//! Refresh scheduler state machine.
//!
//! ```text
//! Idle → TryLock ─┬─ acquired/bypassed → Load → Merge → HashCompare
//!                 │     HashCompare ─┬─ changed → CommitLocal → MirrorWrite → Release → Idle
//!                 │                  └─ unchanged ──────────→ [MirrorWrite] → Release → Idle
//!                 └─ not acquired → Skip → Idle
//! ```
//!
//! One background thread drives cycles on a fixed timer. Each cycle runs
//! under `catch_unwind`: a panic abandons the cycle, releases the lock and
//! leaves the committed snapshot untouched. The loop always continues.
//!
//! The scheduler remembers the hash it last mirrored. An unchanged cycle
//! that holds the lock rewrites the mirror when it lags the committed
//! snapshot, so a bootstrap from the sources or a failed write converges on
//! a later tick without a second write for content already mirrored.

use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::lock::{DistributedLock, LockBackend};
use crate::mirror::{MirrorBackend, RetryingMirrorWriter};
use crate::shutdown::ShutdownSignal;
use crate::source::{SourceLoader, UnconfiguredSource};
use allowsync_core::{
    LocalCache, MergeOutcome, MergeStrategy, Snapshot, SnapshotHash, SourceKind, SourceResult,
};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};

/// Where the scheduler currently is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    /// Waiting for the next tick.
    Idle,
    /// Acquiring the refresh lock.
    TryLock,
    /// Loading the sources.
    Load,
    /// Merging source results.
    Merge,
    /// Comparing the merged hash with the committed one.
    HashCompare,
    /// Swapping the new snapshot into the cache.
    CommitLocal,
    /// Writing the mirror.
    MirrorWrite,
    /// Releasing the refresh lock.
    Release,
    /// The lock was not acquired; the cycle is skipped.
    Skip,
}

impl RefreshState {
    /// Returns true while a cycle is in progress.
    pub fn is_active(&self) -> bool {
        !matches!(self, RefreshState::Idle)
    }
}

/// Result of the mirror write that follows a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorWrite {
    /// No mirror backend is configured.
    NotConfigured,
    /// The snapshot was mirrored.
    Written {
        /// Attempts used.
        attempts: u32,
    },
    /// The write failed; the mirror is degraded until the next success.
    Failed {
        /// Failure description.
        reason: String,
    },
}

/// Result of one refresh cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The refresh lock is held elsewhere.
    Skipped,
    /// No source was usable; the committed snapshot was kept.
    Retained {
        /// Why nothing was merged.
        reason: String,
    },
    /// The merged snapshot matched the committed one.
    Unchanged {
        /// The current hash.
        hash: SnapshotHash,
    },
    /// A new snapshot was committed.
    Committed {
        /// Hash of the new snapshot.
        hash: SnapshotHash,
        /// Number of identities in it.
        records: usize,
        /// Mirror write result.
        mirror: MirrorWrite,
    },
}

/// Counters over the scheduler's lifetime.
#[derive(Debug, Clone, Default)]
pub struct RefreshStats {
    /// Cycles started.
    pub cycles_run: u64,
    /// Cycles that committed a new snapshot.
    pub committed: u64,
    /// Cycles whose merge matched the committed snapshot.
    pub unchanged: u64,
    /// Cycles skipped because the lock was held elsewhere.
    pub skipped: u64,
    /// Cycles where no source was usable.
    pub retained: u64,
    /// Cycles that failed or panicked.
    pub failed: u64,
    /// Successful mirror writes, including catch-up writes on unchanged
    /// cycles.
    pub mirror_writes: u64,
    /// Mirror writes that exhausted their retries.
    pub mirror_failures: u64,
    /// Last cycle or mirror error.
    pub last_error: Option<String>,
    /// Time of the last commit.
    pub last_commit: Option<SystemTime>,
    /// Duration of the last cycle.
    pub last_cycle_duration: Option<Duration>,
}

/// Overall health as seen by a health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Data is loaded and the mirror (if any) is current.
    Ok,
    /// Serving, but either nothing was loaded yet or the mirror is stale.
    Degraded,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Ok => f.write_str("ok"),
            HealthStatus::Degraded => f.write_str("degraded"),
        }
    }
}

/// Snapshot of the service health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    /// Overall status.
    pub status: HealthStatus,
    /// Whether any snapshot was committed since start.
    pub loaded: bool,
    /// Number of identities served.
    pub records: usize,
    /// Hash of the served snapshot.
    pub hash: SnapshotHash,
    /// Whether the last mirror write failed.
    pub mirror_degraded: bool,
}

/// Which source populated the cache at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOrigin {
    /// The distributed mirror.
    Mirror,
    /// The local file.
    Local,
    /// The remote endpoint.
    Remote,
}

impl From<SourceKind> for BootstrapOrigin {
    fn from(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Local => BootstrapOrigin::Local,
            SourceKind::Remote => BootstrapOrigin::Remote,
        }
    }
}

/// Builder for [`RefreshScheduler`].
pub struct SchedulerBuilder {
    config: EngineConfig,
    cache: Arc<LocalCache>,
    local: Arc<dyn SourceLoader>,
    remote: Arc<dyn SourceLoader>,
    lock_backend: Option<Arc<dyn LockBackend>>,
    mirror_backend: Option<Arc<dyn MirrorBackend>>,
    shutdown: ShutdownSignal,
}

impl SchedulerBuilder {
    /// Starts a builder that commits into `cache`.
    ///
    /// Both sources start unconfigured and no backends are set.
    pub fn new(cache: Arc<LocalCache>) -> Self {
        Self {
            config: EngineConfig::default(),
            cache,
            local: Arc::new(UnconfiguredSource::new(SourceKind::Local)),
            remote: Arc::new(UnconfiguredSource::new(SourceKind::Remote)),
            lock_backend: None,
            mirror_backend: None,
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Sets the engine configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the local source.
    pub fn with_local(mut self, source: Arc<dyn SourceLoader>) -> Self {
        self.local = source;
        self
    }

    /// Sets the remote source.
    pub fn with_remote(mut self, source: Arc<dyn SourceLoader>) -> Self {
        self.remote = source;
        self
    }

    /// Enables distributed locking.
    pub fn with_lock_backend(mut self, backend: Arc<dyn LockBackend>) -> Self {
        self.lock_backend = Some(backend);
        self
    }

    /// Enables the snapshot mirror.
    pub fn with_mirror_backend(mut self, backend: Arc<dyn MirrorBackend>) -> Self {
        self.mirror_backend = Some(backend);
        self
    }

    /// Shares an existing shutdown signal.
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Builds the scheduler.
    pub fn build(self) -> RefreshScheduler {
        let config = self.config;
        let strategy =
            MergeStrategy::new(config.merge_mode).with_precedence(config.union_precedence);
        let lock = DistributedLock::new(self.lock_backend, config.require_lock);
        let mirror = self.mirror_backend.map(|backend| {
            RetryingMirrorWriter::new(
                backend,
                config.mirror_key.clone(),
                config.mirror_ttl,
                config.retry.clone(),
            )
            .with_shutdown(self.shutdown.clone())
        });

        RefreshScheduler {
            config,
            cache: self.cache,
            local: self.local,
            remote: self.remote,
            strategy,
            lock,
            mirror,
            shutdown: self.shutdown,
            state: RwLock::new(RefreshState::Idle),
            stats: RwLock::new(RefreshStats::default()),
            mirror_degraded: AtomicBool::new(false),
            mirrored: Mutex::new(None),
        }
    }
}

/// Periodically rebuilds the cached snapshot from its sources.
pub struct RefreshScheduler {
    config: EngineConfig,
    cache: Arc<LocalCache>,
    local: Arc<dyn SourceLoader>,
    remote: Arc<dyn SourceLoader>,
    strategy: MergeStrategy,
    lock: DistributedLock,
    mirror: Option<RetryingMirrorWriter>,
    shutdown: ShutdownSignal,
    state: RwLock<RefreshState>,
    stats: RwLock<RefreshStats>,
    mirror_degraded: AtomicBool,
    mirrored: Mutex<Option<SnapshotHash>>,
}

impl RefreshScheduler {
    /// Starts a builder.
    pub fn builder(cache: Arc<LocalCache>) -> SchedulerBuilder {
        SchedulerBuilder::new(cache)
    }

    /// Returns the cache this scheduler commits into.
    pub fn cache(&self) -> &Arc<LocalCache> {
        &self.cache
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the merge strategy.
    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// Returns the current state.
    pub fn state(&self) -> RefreshState {
        *self.state.read()
    }

    /// Returns a copy of the statistics.
    pub fn stats(&self) -> RefreshStats {
        self.stats.read().clone()
    }

    /// Returns the shutdown signal.
    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Reports service health. Never fails; missing data is `Degraded`.
    pub fn health(&self) -> HealthReport {
        let state = self.cache.state();
        let loaded = state.is_loaded();
        let mirror_degraded = self.mirror_degraded.load(Ordering::SeqCst);
        let status = if loaded && !mirror_degraded {
            HealthStatus::Ok
        } else {
            HealthStatus::Degraded
        };

        HealthReport {
            status,
            loaded,
            records: state.snapshot().len(),
            hash: state.hash(),
            mirror_degraded,
        }
    }

    /// Longest a cycle can run: every bounded source load plus the mirror
    /// retry backoff.
    pub fn cycle_budget(&self) -> Duration {
        let loads: Duration = [&self.local, &self.remote]
            .into_iter()
            .filter(|source| self.strategy.mode().uses(source.kind()))
            .filter_map(|source| source.timeout())
            .sum();
        let mirror = if self.mirror.is_some() {
            self.config.retry.total_backoff()
        } else {
            Duration::ZERO
        };
        loads + mirror
    }

    /// Returns true if the lock outlives a worst-case cycle.
    ///
    /// When it does not, the token can expire mid-cycle and let another
    /// replica start its own cycle.
    pub fn lock_ttl_covers_cycle(&self) -> bool {
        self.config.lock_ttl > self.cycle_budget()
    }

    fn set_state(&self, state: RefreshState) {
        *self.state.write() = state;
    }

    /// Populates the cache once at startup, ignoring the lock.
    ///
    /// Tries the mirror, then the local file, then the remote endpoint, and
    /// commits the first non-empty result. Sources the merge mode does not
    /// use are not consulted. Returns `None` (and leaves the cache empty)
    /// if nothing yielded data.
    pub fn bootstrap(&self) -> Option<BootstrapOrigin> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.bootstrap_inner())) {
            Ok(origin) => origin,
            Err(payload) => {
                error!(error = %panic_message(&*payload), "initial load panicked, starting empty");
                None
            }
        }
    }

    fn bootstrap_inner(&self) -> Option<BootstrapOrigin> {
        if let Some(mirror) = &self.mirror {
            match mirror.read() {
                Ok(Some(snapshot)) if !snapshot.is_empty() => {
                    *self.mirrored.lock() = Some(snapshot.hash());
                    return Some(self.commit_bootstrap(BootstrapOrigin::Mirror, snapshot));
                }
                Ok(_) => debug!(key = mirror.key(), "mirror is empty"),
                Err(e) => warn!(key = mirror.key(), error = %e, "failed to read mirror"),
            }
        }

        for source in [&self.local, &self.remote] {
            let kind = source.kind();
            if !self.strategy.mode().uses(kind) {
                continue;
            }
            let result = source.load();
            if result.has_records() {
                let snapshot = Snapshot::new(result.records);
                return Some(self.commit_bootstrap(kind.into(), snapshot));
            }
        }

        warn!("initial load found no data, serving an empty allowlist");
        None
    }

    fn commit_bootstrap(&self, origin: BootstrapOrigin, snapshot: Snapshot) -> BootstrapOrigin {
        info!(
            origin = ?origin,
            records = snapshot.len(),
            hash = %snapshot.hash().short(),
            "initial snapshot loaded"
        );
        self.cache.set(snapshot);
        self.stats.write().last_commit = Some(SystemTime::now());
        origin
    }

    /// Runs one refresh cycle.
    ///
    /// A panic inside the cycle is caught and returned as
    /// [`SyncError::CyclePanic`]; the committed snapshot is unaffected.
    pub fn run_cycle(&self) -> SyncResult<CycleOutcome> {
        let started = Instant::now();
        let result = match panic::catch_unwind(AssertUnwindSafe(|| self.cycle())) {
            Ok(result) => result,
            Err(payload) => Err(SyncError::CyclePanic(panic_message(&*payload))),
        };
        self.set_state(RefreshState::Idle);
        self.record(&result, started.elapsed());
        result
    }

    fn cycle(&self) -> SyncResult<CycleOutcome> {
        if self.shutdown.is_triggered() {
            return Err(SyncError::Cancelled);
        }

        self.set_state(RefreshState::TryLock);
        let Some(guard) = self.lock.acquire(&self.config.lock_key, self.config.lock_ttl) else {
            self.set_state(RefreshState::Skip);
            debug!(key = %self.config.lock_key, "refresh lock not acquired, skipping cycle");
            return Ok(CycleOutcome::Skipped);
        };

        self.set_state(RefreshState::Load);
        let local = self.load(&self.local);
        let remote = self.load(&self.remote);

        self.set_state(RefreshState::Merge);
        let merged = match self.strategy.merge(&local, &remote) {
            MergeOutcome::Replace(snapshot) => snapshot,
            MergeOutcome::Retain { reason } => {
                warn!(mode = %self.strategy.mode(), %reason, "keeping committed snapshot");
                self.set_state(RefreshState::Release);
                drop(guard);
                return Ok(CycleOutcome::Retained { reason });
            }
        };

        self.set_state(RefreshState::HashCompare);
        let hash = merged.hash();
        if hash == self.cache.current_hash() {
            debug!(hash = %hash.short(), "snapshot unchanged");
            self.catch_up_mirror(&merged);
            self.set_state(RefreshState::Release);
            drop(guard);
            return Ok(CycleOutcome::Unchanged { hash });
        }

        // A cycle interrupted by shutdown never commits.
        if self.shutdown.is_triggered() {
            return Err(SyncError::Cancelled);
        }

        self.set_state(RefreshState::CommitLocal);
        let records = merged.len();
        if !self.cache.set_if_changed(merged.clone()) {
            self.catch_up_mirror(&merged);
            self.set_state(RefreshState::Release);
            drop(guard);
            return Ok(CycleOutcome::Unchanged { hash });
        }
        info!(
            mode = %self.strategy.mode(),
            records,
            hash = %hash.short(),
            "committed new snapshot"
        );

        self.set_state(RefreshState::MirrorWrite);
        let mirror = self.write_mirror(&merged);

        self.set_state(RefreshState::Release);
        drop(guard);
        Ok(CycleOutcome::Committed {
            hash,
            records,
            mirror,
        })
    }

    fn load(&self, source: &Arc<dyn SourceLoader>) -> SourceResult {
        let kind = source.kind();
        if self.strategy.mode().uses(kind) {
            source.load()
        } else {
            SourceResult::unavailable(kind)
        }
    }

    fn write_mirror(&self, snapshot: &Snapshot) -> MirrorWrite {
        let Some(mirror) = &self.mirror else {
            return MirrorWrite::NotConfigured;
        };

        match mirror.write(snapshot) {
            Ok(attempts) => {
                *self.mirrored.lock() = Some(snapshot.hash());
                self.mirror_degraded.store(false, Ordering::SeqCst);
                self.stats.write().mirror_writes += 1;
                MirrorWrite::Written { attempts }
            }
            Err(SyncError::Cancelled) => MirrorWrite::Failed {
                reason: SyncError::Cancelled.to_string(),
            },
            Err(e) => {
                warn!(key = mirror.key(), error = %e, "mirror degraded");
                self.mirror_degraded.store(true, Ordering::SeqCst);
                let mut stats = self.stats.write();
                stats.mirror_failures += 1;
                stats.last_error = Some(e.to_string());
                MirrorWrite::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Rewrites the mirror if it does not hold `snapshot`, the committed
    /// snapshot. Only called while the cycle holds the lock.
    fn catch_up_mirror(&self, snapshot: &Snapshot) {
        if self.mirror.is_none() || *self.mirrored.lock() == Some(snapshot.hash()) {
            return;
        }

        info!(hash = %snapshot.hash().short(), "mirror behind committed snapshot, rewriting");
        self.set_state(RefreshState::MirrorWrite);
        self.write_mirror(snapshot);
    }

    fn record(&self, result: &SyncResult<CycleOutcome>, elapsed: Duration) {
        let mut stats = self.stats.write();
        stats.cycles_run += 1;
        stats.last_cycle_duration = Some(elapsed);

        match result {
            Ok(CycleOutcome::Skipped) => stats.skipped += 1,
            Ok(CycleOutcome::Retained { .. }) => stats.retained += 1,
            Ok(CycleOutcome::Unchanged { .. }) => stats.unchanged += 1,
            Ok(CycleOutcome::Committed { .. }) => {
                stats.committed += 1;
                stats.last_commit = Some(SystemTime::now());
            }
            Err(SyncError::Cancelled) => debug!("refresh cycle cancelled"),
            Err(e) => {
                error!(error = %e, "refresh cycle failed");
                stats.failed += 1;
                stats.last_error = Some(e.to_string());
            }
        }
    }

    /// Starts the background refresh thread.
    ///
    /// The first cycle runs immediately; later cycles run at a fixed rate.
    /// Ticks missed by a long cycle are dropped, never queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(self: Arc<Self>) -> SyncResult<SchedulerHandle> {
        let interval = self.config.refresh_interval();
        if self.config.interval_clamped() {
            warn!(
                configured_ms = self.config.configured_refresh_interval().as_millis() as u64,
                effective_ms = interval.as_millis() as u64,
                "refresh interval below minimum, clamped"
            );
        }
        if self.lock.is_distributed() && !self.lock_ttl_covers_cycle() {
            warn!(
                lock_ttl_ms = self.config.lock_ttl.as_millis() as u64,
                cycle_budget_ms = self.cycle_budget().as_millis() as u64,
                "lock TTL shorter than a worst-case cycle, another replica may overlap"
            );
        }
        info!(
            interval_ms = interval.as_millis() as u64,
            mode = %self.strategy.mode(),
            distributed = self.lock.is_distributed(),
            mirror = self.mirror.is_some(),
            "refresh scheduler started"
        );

        let (done_tx, done_rx) = mpsc::channel();
        let scheduler = Arc::clone(&self);
        let thread = std::thread::Builder::new()
            .name("allowsync-refresh".into())
            .spawn(move || {
                scheduler.run_loop(interval);
                let _ = done_tx.send(());
            })?;

        Ok(SchedulerHandle {
            scheduler: self,
            thread: Some(thread),
            done: done_rx,
        })
    }

    fn run_loop(&self, interval: Duration) {
        let mut next_tick = Instant::now();
        loop {
            if self.shutdown.is_triggered() {
                break;
            }
            let _ = self.run_cycle();

            next_tick += interval;
            let now = Instant::now();
            while next_tick <= now {
                next_tick += interval;
            }
            if self.shutdown.wait_timeout(next_tick - now) {
                break;
            }
        }
        debug!("refresh loop stopped");
    }
}

impl fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("mode", &self.strategy.mode())
            .field("state", &self.state())
            .field("lock", &self.lock)
            .field("mirror", &self.mirror)
            .finish()
    }
}

/// Handle to a running refresh thread.
pub struct SchedulerHandle {
    scheduler: Arc<RefreshScheduler>,
    thread: Option<JoinHandle<()>>,
    done: mpsc::Receiver<()>,
}

impl SchedulerHandle {
    /// Returns the running scheduler.
    pub fn scheduler(&self) -> &Arc<RefreshScheduler> {
        &self.scheduler
    }

    /// Stops the timer and waits up to the configured grace period for an
    /// in-flight cycle.
    ///
    /// Returns true if the thread stopped in time. An abandoned cycle keeps
    /// running detached but can no longer commit.
    pub fn shutdown(mut self) -> bool {
        let grace = self.scheduler.config.shutdown_grace;
        self.scheduler.shutdown.trigger();

        match self.done.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    let _ = thread.join();
                }
                info!("refresh scheduler stopped");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(grace_ms = grace.as_millis() as u64, "refresh cycle abandoned at shutdown");
                false
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.scheduler.shutdown.trigger();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::lock::MemoryLockBackend;
    use crate::mirror::MemoryMirror;
    use crate::source::StaticSource;
    use allowsync_core::{ContentHasher, Identity, MergeMode};

    fn alice() -> Identity {
        Identity::new("111", "alice@x.com").with_role("admin")
    }

    fn bob() -> Identity {
        Identity::new("222", "bob@x.com")
    }

    struct Fixture {
        cache: Arc<LocalCache>,
        local: Arc<StaticSource>,
        remote: Arc<StaticSource>,
        mirror: Arc<MemoryMirror>,
    }

    impl Fixture {
        fn new(local: StaticSource, remote: StaticSource) -> Self {
            Self {
                cache: Arc::new(LocalCache::new()),
                local: Arc::new(local),
                remote: Arc::new(remote),
                mirror: Arc::new(MemoryMirror::new()),
            }
        }

        fn scheduler(&self, mode: MergeMode) -> RefreshScheduler {
            RefreshScheduler::builder(Arc::clone(&self.cache))
                .with_config(EngineConfig::new().with_merge_mode(mode))
                .with_local(self.local.clone())
                .with_remote(self.remote.clone())
                .with_mirror_backend(self.mirror.clone())
                .build()
        }
    }

    struct PanickingSource;

    impl SourceLoader for PanickingSource {
        fn kind(&self) -> SourceKind {
            SourceKind::Remote
        }

        fn load(&self) -> SourceResult {
            panic!("remote loader exploded");
        }
    }

    #[test]
    fn commit_then_unchanged() {
        let fx = Fixture::new(
            StaticSource::available(SourceKind::Local, vec![alice()]),
            StaticSource::available(SourceKind::Remote, vec![alice(), bob()]),
        );
        let scheduler = fx.scheduler(MergeMode::RemoteFirst);

        let outcome = scheduler.run_cycle().unwrap();
        let expected = ContentHasher::hash(&[alice(), bob()]);
        assert_eq!(
            outcome,
            CycleOutcome::Committed {
                hash: expected,
                records: 2,
                mirror: MirrorWrite::Written { attempts: 1 },
            }
        );
        assert_eq!(fx.cache.current_hash(), expected);

        // Same content again: no commit, no second mirror write.
        assert_eq!(
            scheduler.run_cycle().unwrap(),
            CycleOutcome::Unchanged { hash: expected }
        );
        assert_eq!(fx.mirror.writes(), 1);
        assert_eq!(fx.cache.state().generation(), 1);

        let stats = scheduler.stats();
        assert_eq!(stats.cycles_run, 2);
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.unchanged, 1);
        assert_eq!(stats.mirror_writes, 1);
        assert_eq!(scheduler.state(), RefreshState::Idle);
    }

    #[test]
    fn bootstrap_from_sources_is_mirrored_once() {
        let fx = Fixture::new(
            StaticSource::available(SourceKind::Local, vec![alice()]),
            StaticSource::unavailable(SourceKind::Remote),
        );
        let scheduler = fx.scheduler(MergeMode::LocalFirst);
        assert_eq!(scheduler.bootstrap(), Some(BootstrapOrigin::Local));
        assert_eq!(fx.mirror.writes(), 0);

        for _ in 0..5 {
            assert!(matches!(
                scheduler.run_cycle().unwrap(),
                CycleOutcome::Unchanged { .. }
            ));
        }
        assert_eq!(fx.mirror.writes(), 1);
        assert_eq!(scheduler.stats().mirror_writes, 1);

        let mirrored = RetryingMirrorWriter::new(
            fx.mirror.clone(),
            EngineConfig::new().mirror_key,
            Duration::from_secs(60),
            Default::default(),
        )
        .read()
        .unwrap()
        .unwrap();
        assert_eq!(mirrored.hash(), fx.cache.current_hash());
    }

    #[test]
    fn bootstrap_from_mirror_is_not_rewritten() {
        let fx = Fixture::new(
            StaticSource::available(SourceKind::Local, vec![alice()]),
            StaticSource::unavailable(SourceKind::Remote),
        );
        RetryingMirrorWriter::new(
            fx.mirror.clone(),
            EngineConfig::new().mirror_key,
            Duration::from_secs(60),
            Default::default(),
        )
        .write(&Snapshot::new(vec![alice()]))
        .unwrap();

        let scheduler = fx.scheduler(MergeMode::LocalFirst);
        assert_eq!(scheduler.bootstrap(), Some(BootstrapOrigin::Mirror));
        scheduler.run_cycle().unwrap();
        scheduler.run_cycle().unwrap();
        assert_eq!(fx.mirror.writes(), 1);
    }

    #[test]
    fn held_lock_never_touches_a_stale_mirror() {
        let backend = Arc::new(MemoryLockBackend::new());
        let config = EngineConfig::new().with_merge_mode(MergeMode::LocalOnly);
        let fx = Fixture::new(
            StaticSource::available(SourceKind::Local, vec![alice()]),
            StaticSource::unavailable(SourceKind::Remote),
        );
        let scheduler = RefreshScheduler::builder(Arc::clone(&fx.cache))
            .with_config(config.clone())
            .with_local(fx.local.clone())
            .with_lock_backend(backend.clone())
            .with_mirror_backend(fx.mirror.clone())
            .build();
        assert_eq!(scheduler.bootstrap(), Some(BootstrapOrigin::Local));

        backend
            .try_acquire(&config.lock_key, Duration::from_secs(60))
            .unwrap()
            .unwrap();
        assert_eq!(scheduler.run_cycle().unwrap(), CycleOutcome::Skipped);
        assert_eq!(fx.mirror.writes(), 0);
    }

    #[test]
    fn lock_ttl_is_checked_against_cycle_budget() {
        struct SlowRemote;

        impl SourceLoader for SlowRemote {
            fn kind(&self) -> SourceKind {
                SourceKind::Remote
            }

            fn load(&self) -> SourceResult {
                SourceResult::unavailable(SourceKind::Remote)
            }

            fn timeout(&self) -> Option<Duration> {
                Some(Duration::from_secs(60))
            }
        }

        let retry = RetryConfig::new(3)
            .with_base_delay(Duration::from_secs(1))
            .with_multiplier(1.0);
        let build = |lock_ttl: Duration, mode: MergeMode| {
            RefreshScheduler::builder(Arc::new(LocalCache::new()))
                .with_config(
                    EngineConfig::new()
                        .with_merge_mode(mode)
                        .with_lock_ttl(lock_ttl)
                        .with_retry(retry.clone()),
                )
                .with_remote(Arc::new(SlowRemote))
                .with_mirror_backend(Arc::new(MemoryMirror::new()))
                .build()
        };

        let short = build(Duration::from_secs(30), MergeMode::RemoteFirst);
        assert_eq!(short.cycle_budget(), Duration::from_secs(63));
        assert!(!short.lock_ttl_covers_cycle());

        let long = build(Duration::from_secs(90), MergeMode::RemoteFirst);
        assert!(long.lock_ttl_covers_cycle());

        // A mode that never loads the remote does not wait on it.
        let local_only = build(Duration::from_secs(30), MergeMode::LocalOnly);
        assert_eq!(local_only.cycle_budget(), Duration::from_secs(3));
        assert!(local_only.lock_ttl_covers_cycle());
    }

    #[test]
    fn both_unavailable_retains() {
        let fx = Fixture::new(
            StaticSource::available(SourceKind::Local, vec![alice()]),
            StaticSource::unavailable(SourceKind::Remote),
        );
        let scheduler = fx.scheduler(MergeMode::RemoteFirst);
        scheduler.run_cycle().unwrap();
        let committed = fx.cache.current_hash();

        fx.local.set(SourceResult::unavailable(SourceKind::Local));
        assert!(matches!(
            scheduler.run_cycle().unwrap(),
            CycleOutcome::Retained { .. }
        ));
        assert_eq!(fx.cache.current_hash(), committed);
        assert_eq!(scheduler.stats().retained, 1);
    }

    #[test]
    fn unused_sources_are_not_loaded() {
        let fx = Fixture::new(
            StaticSource::available(SourceKind::Local, vec![alice()]),
            StaticSource::available(SourceKind::Remote, vec![bob()]),
        );
        let scheduler = fx.scheduler(MergeMode::LocalOnly);
        scheduler.run_cycle().unwrap();

        assert_eq!(fx.remote.calls(), 0);
        assert_eq!(fx.cache.get().records(), &[alice()]);
    }

    #[test]
    fn panic_is_contained() {
        let cache = Arc::new(LocalCache::new());
        cache.set(Snapshot::new(vec![alice()]));
        let before = cache.current_hash();

        let backend = Arc::new(MemoryLockBackend::new());
        let scheduler = RefreshScheduler::builder(Arc::clone(&cache))
            .with_remote(Arc::new(PanickingSource))
            .with_lock_backend(backend.clone())
            .build();

        let err = scheduler.run_cycle().unwrap_err();
        assert!(matches!(err, SyncError::CyclePanic(ref m) if m.contains("exploded")));
        assert_eq!(cache.current_hash(), before);
        assert!(!backend.is_held(&scheduler.config().lock_key));
        assert_eq!(scheduler.state(), RefreshState::Idle);

        let stats = scheduler.stats();
        assert_eq!(stats.failed, 1);
        assert!(stats.last_error.unwrap().contains("exploded"));
    }

    #[test]
    fn held_lock_skips_cycle() {
        let backend = Arc::new(MemoryLockBackend::new());
        let config = EngineConfig::new();
        backend
            .try_acquire(&config.lock_key, Duration::from_secs(60))
            .unwrap()
            .unwrap();

        let cache = Arc::new(LocalCache::new());
        let remote = Arc::new(StaticSource::available(SourceKind::Remote, vec![alice()]));
        let scheduler = RefreshScheduler::builder(Arc::clone(&cache))
            .with_config(config)
            .with_remote(remote.clone())
            .with_lock_backend(backend)
            .build();

        assert_eq!(scheduler.run_cycle().unwrap(), CycleOutcome::Skipped);
        assert_eq!(remote.calls(), 0);
        assert!(cache.is_empty());
        assert_eq!(scheduler.stats().skipped, 1);
    }

    #[test]
    fn shutdown_prevents_commit() {
        let fx = Fixture::new(
            StaticSource::unavailable(SourceKind::Local),
            StaticSource::available(SourceKind::Remote, vec![alice()]),
        );
        let scheduler = fx.scheduler(MergeMode::RemoteFirst);
        scheduler.shutdown_signal().trigger();

        assert!(matches!(scheduler.run_cycle(), Err(SyncError::Cancelled)));
        assert!(fx.cache.is_empty());
        assert_eq!(scheduler.stats().failed, 0);
    }

    #[test]
    fn bootstrap_order() {
        // Mirror first.
        let fx = Fixture::new(
            StaticSource::available(SourceKind::Local, vec![alice()]),
            StaticSource::available(SourceKind::Remote, vec![bob()]),
        );
        RetryingMirrorWriter::new(
            fx.mirror.clone(),
            EngineConfig::new().mirror_key,
            Duration::from_secs(60),
            Default::default(),
        )
        .write(&Snapshot::new(vec![alice(), bob()]))
        .unwrap();
        let scheduler = fx.scheduler(MergeMode::RemoteFirst);
        assert_eq!(scheduler.bootstrap(), Some(BootstrapOrigin::Mirror));
        assert_eq!(fx.cache.len(), 2);
        assert_eq!(fx.local.calls(), 0);

        // Then local, skipping an empty mirror.
        let fx = Fixture::new(
            StaticSource::available(SourceKind::Local, vec![alice()]),
            StaticSource::available(SourceKind::Remote, vec![bob()]),
        );
        let scheduler = fx.scheduler(MergeMode::RemoteFirst);
        assert_eq!(scheduler.bootstrap(), Some(BootstrapOrigin::Local));
        assert_eq!(fx.cache.get().records(), &[alice()]);
        assert_eq!(fx.remote.calls(), 0);

        // Then remote.
        let fx = Fixture::new(
            StaticSource::available(SourceKind::Local, Vec::new()),
            StaticSource::available(SourceKind::Remote, vec![bob()]),
        );
        let scheduler = fx.scheduler(MergeMode::RemoteFirst);
        assert_eq!(scheduler.bootstrap(), Some(BootstrapOrigin::Remote));
    }

    #[test]
    fn bootstrap_without_data_starts_empty() {
        let fx = Fixture::new(
            StaticSource::unavailable(SourceKind::Local),
            StaticSource::unavailable(SourceKind::Remote),
        );
        let scheduler = fx.scheduler(MergeMode::Union);
        assert_eq!(scheduler.bootstrap(), None);
        assert!(fx.cache.is_empty());

        let health = scheduler.health();
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(!health.loaded);
        assert_eq!(health.records, 0);
    }

    #[test]
    fn bootstrap_respects_mode() {
        let fx = Fixture::new(
            StaticSource::available(SourceKind::Local, vec![alice()]),
            StaticSource::available(SourceKind::Remote, vec![bob()]),
        );
        let scheduler = fx.scheduler(MergeMode::RemoteOnly);
        assert_eq!(scheduler.bootstrap(), Some(BootstrapOrigin::Remote));
        assert_eq!(fx.local.calls(), 0);
    }

    #[test]
    fn health_reports_loaded_data() {
        let fx = Fixture::new(
            StaticSource::available(SourceKind::Local, vec![alice(), bob()]),
            StaticSource::unavailable(SourceKind::Remote),
        );
        let scheduler = fx.scheduler(MergeMode::LocalFirst);
        scheduler.run_cycle().unwrap();

        let health = scheduler.health();
        assert_eq!(health.status, HealthStatus::Ok);
        assert!(health.loaded);
        assert_eq!(health.records, 2);
        assert_eq!(health.hash, fx.cache.current_hash());
        assert!(!health.mirror_degraded);
    }

    #[test]
    fn spawned_loop_runs_and_stops() {
        let fx = Fixture::new(
            StaticSource::unavailable(SourceKind::Local),
            StaticSource::available(SourceKind::Remote, vec![alice()]),
        );
        let scheduler = Arc::new(
            RefreshScheduler::builder(Arc::clone(&fx.cache))
                .with_config(
                    EngineConfig::new()
                        .with_refresh_interval(Duration::from_secs(3600))
                        .with_shutdown_grace(Duration::from_secs(5)),
                )
                .with_remote(fx.remote.clone())
                .build(),
        );

        let handle = Arc::clone(&scheduler).spawn().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while fx.cache.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(fx.cache.len(), 1);

        assert!(handle.shutdown());
        assert!(scheduler.shutdown_signal().is_triggered());
        assert_eq!(scheduler.stats().cycles_run, 1);
    }

    #[test]
    fn panic_message_formats() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*payload), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*payload), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*payload), "unknown panic");
    }
}
