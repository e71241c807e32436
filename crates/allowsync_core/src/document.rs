//! Wire formats: identity documents and mirror records.
//!
//! Identity documents are the JSON lists delivered by the local file and the
//! remote endpoint. Mirror records are the CBOR value a committing replica
//! writes to the shared mirror: the canonical records plus their hash.

use crate::error::{CoreError, CoreResult};
use crate::hasher::SnapshotHash;
use crate::identity::Identity;
use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current mirror record format version.
pub const MIRROR_RECORD_VERSION: u16 = 1;

#[derive(Deserialize)]
#[serde(untagged)]
enum IdentityDocument {
    List(Vec<Identity>),
    Wrapped {
        #[serde(alias = "data")]
        users: Vec<Identity>,
    },
}

/// Parses an identity document.
///
/// Accepts a bare JSON array of records or an object whose `users` (or
/// `data`) field holds the array. A document that is empty or only
/// whitespace parses to zero records.
///
/// # Errors
///
/// Returns [`CoreError::MalformedDocument`] for anything else.
pub fn parse_identity_document(bytes: &[u8]) -> CoreResult<Vec<Identity>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    match serde_json::from_slice::<IdentityDocument>(bytes) {
        Ok(IdentityDocument::List(records)) => Ok(records),
        Ok(IdentityDocument::Wrapped { users }) => Ok(users),
        Err(_) => {
            // Re-parse as a plain value for a useful error message.
            let value: serde_json::Value = serde_json::from_slice(bytes)?;
            Err(CoreError::MalformedDocument(format!(
                "expected an array of identities or an object with a `users` array, got {}",
                json_kind(&value)
            )))
        }
    }
}

/// Renders records as a pretty-printed JSON array.
pub fn render_identity_document(records: &[Identity]) -> CoreResult<String> {
    Ok(serde_json::to_string_pretty(records)?)
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array with invalid entries",
        serde_json::Value::Object(_) => "an object without a valid `users` array",
    }
}

/// The value stored under the mirror key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorRecord {
    /// Format version.
    pub version: u16,
    /// Hash of `records`.
    pub hash: SnapshotHash,
    /// Canonical records.
    pub records: Vec<Identity>,
    /// Commit time in Unix milliseconds.
    pub written_at_ms: u64,
}

impl MirrorRecord {
    /// Builds the mirror record for a committed snapshot.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let written_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        Self {
            version: MIRROR_RECORD_VERSION,
            hash: snapshot.hash(),
            records: snapshot.records().to_vec(),
            written_at_ms,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out)
            .map_err(|e| CoreError::MirrorCodec(e.to_string()))?;
        Ok(out)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let record: Self =
            ciborium::from_reader(bytes).map_err(|e| CoreError::MirrorCodec(e.to_string()))?;

        if record.version != MIRROR_RECORD_VERSION {
            return Err(CoreError::UnsupportedVersion {
                found: record.version,
                expected: MIRROR_RECORD_VERSION,
            });
        }
        Ok(record)
    }

    /// Rebuilds the snapshot, verifying the stored hash.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::HashMismatch`] if the records do not hash to the
    /// stored value.
    pub fn into_snapshot(self) -> CoreResult<Snapshot> {
        let stored = self.hash;
        let snapshot = Snapshot::new(self.records);
        if snapshot.hash() != stored {
            return Err(CoreError::HashMismatch {
                stored: stored.to_hex(),
                computed: snapshot.hash().to_hex(),
            });
        }
        Ok(snapshot)
    }
}
