//! Run command implementation.

use crate::sources::SourceArgs;
use allowsync_core::LocalCache;
use allowsync_engine::{EngineConfig, FsStore, RefreshScheduler, SchedulerBuilder};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Scheduler flags of the run command.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Refresh interval in seconds.
    pub interval: u64,
    /// Shared store directory for lock and mirror.
    pub store: Option<PathBuf>,
    /// Whether lock store failures skip cycles.
    pub require_lock: bool,
    /// Lock lifetime in seconds.
    pub lock_ttl: u64,
    /// Mirror lifetime in seconds.
    pub mirror_ttl: u64,
    /// Shutdown grace period in seconds.
    pub grace: u64,
}

impl RunOptions {
    /// Builds the engine configuration.
    pub fn config(&self, sources: &SourceArgs) -> EngineConfig {
        sources.apply(
            EngineConfig::new()
                .with_refresh_interval(Duration::from_secs(self.interval))
                .with_require_lock(self.require_lock)
                .with_lock_ttl(Duration::from_secs(self.lock_ttl))
                .with_mirror_ttl(Duration::from_secs(self.mirror_ttl))
                .with_shutdown_grace(Duration::from_secs(self.grace)),
        )
    }
}

/// Builds the scheduler for the given flags.
pub fn build(
    sources: &SourceArgs,
    options: &RunOptions,
    cache: Arc<LocalCache>,
) -> Result<RefreshScheduler, Box<dyn std::error::Error>> {
    let mut builder: SchedulerBuilder =
        RefreshScheduler::builder(cache).with_config(options.config(sources));
    builder = sources.install(builder)?;

    if let Some(dir) = &options.store {
        let store = Arc::new(FsStore::open(dir)?);
        info!(store = %store.root().display(), "using shared store for lock and mirror");
        builder = builder
            .with_lock_backend(store.clone())
            .with_mirror_backend(store);
    } else if options.require_lock {
        warn!("--require-lock has no effect without --store");
    }

    Ok(builder.build())
}

/// Runs the refresher until Ctrl-C.
pub fn run(sources: &SourceArgs, options: &RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let cache = Arc::new(LocalCache::new());
    let scheduler = Arc::new(build(sources, options, Arc::clone(&cache))?);

    match scheduler.bootstrap() {
        Some(origin) => info!(?origin, records = cache.len(), "serving initial snapshot"),
        None => warn!("no initial data, serving an empty allowlist until the first refresh"),
    }

    let handle = Arc::clone(&scheduler).spawn()?;

    // The refresh thread does all blocking I/O; this runtime only waits for
    // the interrupt.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(tokio::signal::ctrl_c())?;
    info!("interrupt received, shutting down");

    let stopped = handle.shutdown();
    let stats = scheduler.stats();
    let health = scheduler.health();
    info!(
        stopped,
        cycles = stats.cycles_run,
        committed = stats.committed,
        skipped = stats.skipped,
        failed = stats.failed,
        mirror_failures = stats.mirror_failures,
        status = %health.status,
        records = health.records,
        hash = %health.hash.short(),
        "final state"
    );
    Ok(())
}
