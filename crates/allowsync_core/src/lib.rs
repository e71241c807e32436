//! # AllowSync Core
//!
//! Identity snapshots and the shared snapshot cache for AllowSync.
//!
//! This crate provides:
//! - The identity record and its `(phone, mail)` key
//! - Canonical, immutable snapshots
//! - Order-independent content hashing (SHA-256)
//! - Merge strategies for the local and remote sources
//! - The thread-safe `LocalCache` read by the serving layer
//! - Identity document (JSON) and mirror record (CBOR) formats
//!
//! ## Key Invariants
//!
//! - A committed snapshot is never mutated; updates replace it
//! - The snapshot hash depends only on content, never on record order
//! - Readers always see a snapshot paired with its own hash
//! - An unavailable source is never interpreted as "zero identities"

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod cache;
mod document;
mod error;
mod hasher;
mod identity;
mod merge;
mod snapshot;

pub use cache::{CacheState, LocalCache};
pub use document::{
    parse_identity_document, render_identity_document, MirrorRecord, MIRROR_RECORD_VERSION,
};
pub use error::{CoreError, CoreResult};
pub use hasher::{ContentHasher, SnapshotHash};
pub use identity::{Identity, IdentityKey};
pub use merge::{MergeMode, MergeOutcome, MergeStrategy, SourceKind, SourceResult};
pub use snapshot::{canonicalize, Snapshot};
