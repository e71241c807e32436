//! Content hashing for identity snapshots.
//!
//! The digest is SHA-256 over a length-prefixed encoding of the canonical
//! record list. Because canonicalization fixes both record order and scope
//! order, any two record collections with the same content hash to the same
//! value on every replica, which lets replicas agree on "did anything change"
//! without exchanging snapshots.

use crate::identity::Identity;
use crate::snapshot::canonicalize;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Domain separator mixed into every digest.
const HASH_DOMAIN: &[u8] = b"allowsync.snapshot.v1";

/// A fixed-length fingerprint of a canonical snapshot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotHash([u8; 32]);

impl SnapshotHash {
    /// Wraps raw digest bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the digest as lowercase hex.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Returns the first eight hex characters, for log lines.
    pub fn short(&self) -> String {
        self.0[..4].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for SnapshotHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for SnapshotHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SnapshotHash({})", self.short())
    }
}

/// Order-independent, content-deterministic snapshot hasher.
pub struct ContentHasher;

impl ContentHasher {
    /// Hashes a record collection in any order.
    ///
    /// The records are canonicalized first, so every permutation of the same
    /// records produces the same digest.
    pub fn hash(records: &[Identity]) -> SnapshotHash {
        Self::hash_canonical(&canonicalize(records.iter().cloned()))
    }

    /// Hashes records that are already in canonical form.
    pub(crate) fn hash_canonical(records: &[Identity]) -> SnapshotHash {
        let mut hasher = Sha256::new();
        hasher.update(HASH_DOMAIN);
        hasher.update((records.len() as u64).to_be_bytes());

        for record in records {
            write_field(&mut hasher, &record.phone);
            write_field(&mut hasher, &record.mail);
            write_field(&mut hasher, record.user_id.as_deref().unwrap_or(""));
            write_field(&mut hasher, &record.status);
            write_field(&mut hasher, &record.role);
            hasher.update((record.scope.len() as u64).to_be_bytes());
            for scope in &record.scope {
                write_field(&mut hasher, scope);
            }
        }

        SnapshotHash(hasher.finalize().into())
    }
}

fn write_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}
