//! Error types for AllowSync core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while decoding or encoding identity data.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An identity document could not be parsed.
    #[error("malformed identity document: {0}")]
    MalformedDocument(String),

    /// A mirror record could not be encoded or decoded.
    #[error("mirror record codec error: {0}")]
    MirrorCodec(String),

    /// A mirror record was written by an unsupported format version.
    #[error("unsupported mirror record version: {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version found in the record.
        found: u16,
        /// Version this build understands.
        expected: u16,
    },

    /// A mirror record's stored hash does not match its content.
    #[error("mirror record hash mismatch: stored {stored}, computed {computed}")]
    HashMismatch {
        /// Hash stored alongside the records.
        stored: String,
        /// Hash recomputed from the records.
        computed: String,
    },
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::MalformedDocument(err.to_string())
    }
}
