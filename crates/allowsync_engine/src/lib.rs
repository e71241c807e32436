//! # AllowSync Engine
//!
//! Refresh engine for AllowSync allowlist snapshots.
//!
//! This crate provides:
//! - Source loaders for a local JSON file and a remote HTTP endpoint
//! - The refresh scheduler state machine and its background thread
//! - Distributed locking with single-replica degradation
//! - Mirroring of committed snapshots with bounded retries
//! - A directory-backed lock and mirror store
//!
//! ## Architecture
//!
//! Each cycle runs **lock → load → merge → compare → commit → mirror**:
//! 1. Take the refresh lock, or skip the cycle if another replica holds it
//! 2. Load the sources the merge mode uses
//! 3. Merge them into a candidate snapshot
//! 4. Commit only if its hash differs from the served one
//! 5. Mirror the new snapshot for replicas that start later
//!
//! ## Key Invariants
//!
//! - Readers only ever see fully committed snapshots
//! - An unavailable source never empties the allowlist
//! - A failed, panicked or cancelled cycle never commits
//! - Mirror failures degrade health but never block commits

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod fs_store;
mod http;
mod lock;
mod mirror;
mod scheduler;
mod shutdown;
mod source;

pub use config::{
    EngineConfig, LocalSourceConfig, MissingFilePolicy, RemoteAuth, RemoteSourceConfig,
    RetryConfig, DEFAULT_REFRESH_INTERVAL, MIN_REFRESH_INTERVAL,
};
pub use error::{SyncError, SyncResult};
pub use fs_store::FsStore;
pub use http::{HttpClient, HttpRequest, HttpResponse, ReqwestClient};
pub use lock::{DistributedLock, LockAttempt, LockBackend, LockGuard, LockToken, MemoryLockBackend};
pub use mirror::{MemoryMirror, MirrorBackend, RetryingMirrorWriter};
pub use scheduler::{
    BootstrapOrigin, CycleOutcome, HealthReport, HealthStatus, MirrorWrite, RefreshScheduler,
    RefreshState, RefreshStats, SchedulerBuilder, SchedulerHandle,
};
pub use shutdown::ShutdownSignal;
pub use source::{LocalFileLoader, RemoteLoader, SourceLoader, StaticSource, UnconfiguredSource};
