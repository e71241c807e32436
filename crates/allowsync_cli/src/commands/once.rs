//! Once command implementation.

use crate::sources::SourceArgs;
use allowsync_core::{Identity, LocalCache};
use allowsync_engine::{CycleOutcome, EngineConfig, RefreshScheduler};
use serde::Serialize;
use std::sync::Arc;

/// Result of a single load and merge.
#[derive(Debug, Serialize)]
pub struct OnceReport {
    /// Merge mode used.
    pub mode: String,
    /// Number of identities in the merged snapshot.
    pub records: usize,
    /// Snapshot hash (hex).
    pub hash: String,
    /// Merged identities.
    pub identities: Vec<Identity>,
}

/// Loads and merges the sources once, without lock or mirror.
pub fn run(sources: &SourceArgs) -> Result<OnceReport, Box<dyn std::error::Error>> {
    let cache = Arc::new(LocalCache::new());
    let builder = RefreshScheduler::builder(Arc::clone(&cache))
        .with_config(sources.apply(EngineConfig::new()));
    let scheduler = sources.install(builder)?.build();

    if let CycleOutcome::Retained { reason } = scheduler.run_cycle()? {
        return Err(format!("no usable source: {reason}").into());
    }

    let snapshot = cache.get();
    Ok(OnceReport {
        mode: sources.mode.to_string(),
        records: snapshot.len(),
        hash: snapshot.hash().to_hex(),
        identities: snapshot.records().to_vec(),
    })
}

/// Prints a report as text or JSON.
pub fn print(report: &OnceReport, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("mode:    {}", report.mode);
        println!("records: {}", report.records);
        println!("hash:    {}", report.hash);
    }
    Ok(())
}
