//! Source loaders.
//!
//! Every loader reports availability explicitly. Failures are logged and
//! folded into [`SourceResult::unavailable`]; they are never raised to the
//! caller and never turned into an empty record list.

use crate::config::{LocalSourceConfig, MissingFilePolicy, RemoteSourceConfig};
use crate::error::{SyncError, SyncResult};
use crate::http::{HttpClient, HttpRequest};
use allowsync_core::{parse_identity_document, Identity, SourceKind, SourceResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// A source of identity records.
pub trait SourceLoader: Send + Sync {
    /// Which source this is.
    fn kind(&self) -> SourceKind;

    /// Loads the source for one cycle.
    fn load(&self) -> SourceResult;

    /// Upper bound on one load, if the loader enforces one.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// Folds a fetch result into a tagged source result, logging failures.
fn settle(kind: SourceKind, fetched: SyncResult<Vec<Identity>>) -> SourceResult {
    match fetched {
        Ok(records) => {
            debug!(source = %kind, records = records.len(), "source loaded");
            SourceResult::available(kind, records)
        }
        Err(e) => {
            warn!(source = %kind, error = %e, "source unavailable this cycle");
            SourceResult::unavailable(kind)
        }
    }
}

/// Loads identities from a local JSON file.
#[derive(Debug, Clone)]
pub struct LocalFileLoader {
    path: PathBuf,
    missing: MissingFilePolicy,
}

impl LocalFileLoader {
    /// Creates a loader.
    pub fn new(config: LocalSourceConfig) -> Self {
        Self {
            path: config.path,
            missing: config.missing,
        }
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fetch(&self) -> SyncResult<Vec<Identity>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return match self.missing {
                    MissingFilePolicy::Empty => {
                        debug!(path = %self.path.display(), "identity file missing");
                        Ok(Vec::new())
                    }
                    MissingFilePolicy::Unavailable => Err(SyncError::source_unavailable(
                        SourceKind::Local,
                        format!("{} does not exist", self.path.display()),
                    )),
                };
            }
            Err(e) => {
                return Err(SyncError::source_unavailable(
                    SourceKind::Local,
                    format!("failed to read {}: {e}", self.path.display()),
                ))
            }
        };

        parse_identity_document(&bytes).map_err(|e| SyncError::MalformedSourcePayload {
            kind: SourceKind::Local,
            reason: e.to_string(),
        })
    }
}

impl SourceLoader for LocalFileLoader {
    fn kind(&self) -> SourceKind {
        SourceKind::Local
    }

    fn load(&self) -> SourceResult {
        settle(SourceKind::Local, self.fetch())
    }
}

/// Loads identities from a remote HTTP endpoint.
pub struct RemoteLoader<C: HttpClient> {
    config: RemoteSourceConfig,
    client: C,
}

impl<C: HttpClient> RemoteLoader<C> {
    /// Creates a loader.
    pub fn new(config: RemoteSourceConfig, client: C) -> Self {
        Self { config, client }
    }

    /// Returns the endpoint URL.
    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn request(&self) -> HttpRequest {
        let mut request = HttpRequest::get(&self.config.url, self.config.timeout);
        if let Some((name, value)) = self.config.auth.header() {
            request = request.with_header(name, value);
        }
        request.with_header("Accept", "application/json")
    }

    fn fetch(&self) -> SyncResult<Vec<Identity>> {
        let response = self
            .client
            .get(&self.request())
            .map_err(|e| SyncError::source_unavailable(SourceKind::Remote, e))?;

        if !response.is_success() {
            return Err(SyncError::source_unavailable(
                SourceKind::Remote,
                format!("HTTP {}", response.status),
            ));
        }

        parse_identity_document(&response.body).map_err(|e| SyncError::MalformedSourcePayload {
            kind: SourceKind::Remote,
            reason: e.to_string(),
        })
    }
}

impl<C: HttpClient> SourceLoader for RemoteLoader<C> {
    fn kind(&self) -> SourceKind {
        SourceKind::Remote
    }

    fn load(&self) -> SourceResult {
        settle(SourceKind::Remote, self.fetch())
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.config.timeout)
    }
}

/// A source that is not configured: always unavailable.
#[derive(Debug, Clone, Copy)]
pub struct UnconfiguredSource {
    kind: SourceKind,
}

impl UnconfiguredSource {
    /// Creates an unconfigured source of the given kind.
    pub fn new(kind: SourceKind) -> Self {
        Self { kind }
    }
}

impl SourceLoader for UnconfiguredSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn load(&self) -> SourceResult {
        SourceResult::unavailable(self.kind)
    }
}

/// A scripted source for testing.
///
/// Queued results are returned in order; once the queue is empty the
/// fallback result is returned on every call.
#[derive(Debug)]
pub struct StaticSource {
    kind: SourceKind,
    queued: Mutex<VecDeque<SourceResult>>,
    fallback: Mutex<SourceResult>,
    calls: Mutex<u64>,
}

impl StaticSource {
    /// A source that always delivers `records`.
    pub fn available(kind: SourceKind, records: Vec<Identity>) -> Self {
        Self::with_fallback(SourceResult::available(kind, records))
    }

    /// A source that is always unavailable.
    pub fn unavailable(kind: SourceKind) -> Self {
        Self::with_fallback(SourceResult::unavailable(kind))
    }

    fn with_fallback(fallback: SourceResult) -> Self {
        Self {
            kind: fallback.kind,
            queued: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            calls: Mutex::new(0),
        }
    }

    /// Queues a one-shot result.
    pub fn push(&self, result: SourceResult) {
        self.queued.lock().push_back(result);
    }

    /// Replaces the fallback result.
    pub fn set(&self, result: SourceResult) {
        *self.fallback.lock() = result;
    }

    /// Returns how many times the source was loaded.
    pub fn calls(&self) -> u64 {
        *self.calls.lock()
    }
}

impl SourceLoader for StaticSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn load(&self) -> SourceResult {
        *self.calls.lock() += 1;
        self.queued
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().clone())
    }
}
