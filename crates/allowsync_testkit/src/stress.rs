//! Concurrent reader stress harness.
//!
//! Runs N reader threads against a [`LocalCache`] while one writer commits
//! M snapshots in sequence, and checks that every value a reader observed
//! is one of the committed snapshots, paired with its own hash.

use allowsync_core::{ContentHasher, Identity, LocalCache, Snapshot, SnapshotHash};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Configuration for a reader stress run.
#[derive(Debug, Clone)]
pub struct ReaderStressConfig {
    /// Number of concurrent reader threads.
    pub readers: usize,
    /// Number of sequential commits.
    pub commits: usize,
    /// Identities per committed snapshot.
    pub records_per_commit: usize,
}

impl Default for ReaderStressConfig {
    fn default() -> Self {
        Self {
            readers: 8,
            commits: 50,
            records_per_commit: 32,
        }
    }
}

/// Result of a reader stress run.
#[derive(Debug, Clone)]
pub struct ReaderStressResult {
    /// Total reads across all readers.
    pub reads: u64,
    /// Reads whose snapshot did not hash to its paired hash, or was not
    /// one of the committed snapshots.
    pub torn_reads: u64,
    /// Distinct hashes observed by readers.
    pub observed_hashes: usize,
    /// Total duration.
    pub duration: Duration,
}

impl ReaderStressResult {
    /// Returns true if no torn read was observed.
    pub fn is_clean(&self) -> bool {
        self.torn_reads == 0
    }
}

/// Builds the snapshot committed at step `step`.
///
/// Consecutive snapshots share most identities and differ in size and
/// payload, so a torn mix of two would hash to neither.
pub fn stress_snapshot(step: usize, records: usize) -> Snapshot {
    Snapshot::new((0..records + step % 3).map(|i| {
        Identity::new(format!("{i:06}"), format!("u{i}@stress.test"))
            .with_status(if (i + step) % 2 == 0 { "active" } else { "suspended" })
            .with_role(format!("r{step}"))
    }))
}

/// Runs the reader stress test.
pub fn run_reader_stress(config: &ReaderStressConfig) -> ReaderStressResult {
    let cache = Arc::new(LocalCache::new());
    let committed: Vec<Snapshot> = (0..config.commits)
        .map(|step| stress_snapshot(step, config.records_per_commit))
        .collect();

    let mut allowed: HashSet<SnapshotHash> = committed.iter().map(Snapshot::hash).collect();
    allowed.insert(Snapshot::empty().hash());
    let allowed = Arc::new(allowed);
    let done = Arc::new(AtomicBool::new(false));

    let start = Instant::now();
    let readers: Vec<_> = (0..config.readers)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let allowed = Arc::clone(&allowed);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut reads = 0u64;
                let mut torn = 0u64;
                let mut seen = HashSet::new();
                while !done.load(Ordering::Acquire) {
                    let state = cache.state();
                    let snapshot = state.snapshot();
                    let hash = ContentHasher::hash(snapshot.records());
                    if hash != state.hash() || !allowed.contains(&hash) {
                        torn += 1;
                    }
                    seen.insert(hash);
                    reads += 1;
                }
                (reads, torn, seen)
            })
        })
        .collect();

    for snapshot in committed {
        cache.set(snapshot);
        thread::yield_now();
    }
    done.store(true, Ordering::Release);

    let mut reads = 0;
    let mut torn_reads = 0;
    let mut observed = HashSet::new();
    for handle in readers {
        let (r, t, seen) = handle.join().expect("Reader thread panicked");
        reads += r;
        torn_reads += t;
        observed.extend(seen);
    }

    ReaderStressResult {
        reads,
        torn_reads,
        observed_hashes: observed.len(),
        duration: start.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stress_snapshots_differ() {
        let hashes: HashSet<_> = (0..10).map(|s| stress_snapshot(s, 8).hash()).collect();
        assert_eq!(hashes.len(), 10);
    }

    #[test]
    fn readers_never_observe_torn_state() {
        let result = run_reader_stress(&ReaderStressConfig {
            readers: 4,
            commits: 40,
            records_per_commit: 16,
        });
        assert!(result.is_clean(), "{result:?}");
        assert!(result.reads > 0);
        assert!(result.observed_hashes >= 1);
    }
}
