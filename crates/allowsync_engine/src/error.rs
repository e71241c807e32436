//! Error types for the refresh engine.

use allowsync_core::{CoreError, SourceKind};
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur inside a refresh cycle.
///
/// None of these ever reach the serving layer; readers of the cache only see
/// the last committed snapshot.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A source could not be read this cycle.
    #[error("{kind} source unavailable: {reason}")]
    SourceUnavailable {
        /// Which source failed.
        kind: SourceKind,
        /// Failure description.
        reason: String,
    },

    /// A source answered, but its payload could not be parsed.
    #[error("{kind} source returned a malformed payload: {reason}")]
    MalformedSourcePayload {
        /// Which source failed.
        kind: SourceKind,
        /// Parse failure description.
        reason: String,
    },

    /// The refresh lock is held elsewhere or the lock backend failed.
    #[error("refresh lock unavailable for key {key}")]
    LockUnavailable {
        /// Lock key.
        key: String,
    },

    /// The mirror write did not succeed within the retry budget.
    #[error("mirror write failed after {attempts} attempt(s): {reason}")]
    MirrorWriteFailed {
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        reason: String,
    },

    /// A refresh cycle panicked and was abandoned.
    #[error("refresh cycle panicked: {0}")]
    CyclePanic(String),

    /// A lock or mirror backend reported an error.
    #[error("backend error: {message}")]
    Backend {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Data encoding or decoding failed.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// The engine is shutting down.
    #[error("refresh cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a retryable backend error.
    pub fn backend_retryable(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable backend error.
    pub fn backend_fatal(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a source-unavailable error.
    pub fn source_unavailable(kind: SourceKind, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            kind,
            reason: reason.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Backend { retryable, .. } => *retryable,
            SyncError::SourceUnavailable { .. } => true,
            _ => false,
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::backend_retryable(err.to_string())
    }
}
