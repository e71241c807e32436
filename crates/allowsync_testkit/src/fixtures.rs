//! Test fixtures: identity files, scripted HTTP clients and failing
//! backends.

use allowsync_core::{render_identity_document, Identity, SourceKind, SourceResult};
use allowsync_engine::{
    HttpClient, HttpRequest, HttpResponse, LockBackend, LockToken, MemoryMirror, MirrorBackend,
    SourceLoader, SyncError, SyncResult,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Returns `count` distinct identities.
pub fn sample_identities(count: usize) -> Vec<Identity> {
    (0..count)
        .map(|i| {
            Identity::new(format!("+1555{i:07}"), format!("user{i}@example.com"))
                .with_user_id(format!("u{i}"))
                .with_status("active")
                .with_role(if i % 5 == 0 { "admin" } else { "user" })
                .with_scope(["read"])
        })
        .collect()
}

/// Renders identities as a JSON document body.
pub fn identity_json(records: &[Identity]) -> String {
    render_identity_document(records).expect("Failed to render identities")
}

/// An identity file in a temporary directory.
pub struct IdentityFile {
    path: PathBuf,
    _temp_dir: TempDir,
}

impl IdentityFile {
    /// Creates a directory with no file in it yet.
    pub fn absent() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        Self {
            path: temp_dir.path().join("allowlist.json"),
            _temp_dir: temp_dir,
        }
    }

    /// Creates a file holding `records`.
    pub fn with_records(records: &[Identity]) -> Self {
        let file = Self::absent();
        file.write(records);
        file
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the file contents with `records`.
    pub fn write(&self, records: &[Identity]) {
        self.write_raw(&identity_json(records));
    }

    /// Replaces the file contents verbatim.
    pub fn write_raw(&self, contents: &str) {
        std::fs::write(&self.path, contents).expect("Failed to write identity file");
    }

    /// Deletes the file.
    pub fn remove(&self) {
        std::fs::remove_file(&self.path).expect("Failed to remove identity file");
    }
}

/// An HTTP client returning scripted responses.
///
/// Queued responses are returned in order; afterwards the fallback is
/// returned on every call.
pub struct ScriptedHttpClient {
    queued: Mutex<VecDeque<Result<HttpResponse, String>>>,
    fallback: Mutex<Result<HttpResponse, String>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    /// A client that always answers `status` with `body`.
    pub fn always(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self::with_fallback(Ok(HttpResponse::new(status, body)))
    }

    /// A client that always serves `records` as JSON.
    pub fn serving(records: &[Identity]) -> Self {
        Self::always(200, identity_json(records))
    }

    /// A client whose every request fails at the transport level.
    pub fn unreachable() -> Self {
        Self::with_fallback(Err("connection refused".into()))
    }

    fn with_fallback(fallback: Result<HttpResponse, String>) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queues a one-shot response.
    pub fn push(&self, response: Result<HttpResponse, String>) {
        self.queued.lock().push_back(response);
    }

    /// Replaces the fallback with `records` served as JSON.
    pub fn serve(&self, records: &[Identity]) {
        *self.fallback.lock() = Ok(HttpResponse::new(200, identity_json(records)));
    }

    /// Replaces the fallback response.
    pub fn set(&self, response: Result<HttpResponse, String>) {
        *self.fallback.lock() = response;
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }
}

impl HttpClient for ScriptedHttpClient {
    fn get(&self, request: &HttpRequest) -> Result<HttpResponse, String> {
        self.requests.lock().push(request.clone());
        self.queued
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().clone())
    }
}

/// A lock backend that always errors.
#[derive(Debug, Default)]
pub struct FailingLockBackend {
    attempts: AtomicU64,
}

impl FailingLockBackend {
    /// Creates the backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of acquisition attempts.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl LockBackend for FailingLockBackend {
    fn try_acquire(&self, _key: &str, _ttl: Duration) -> SyncResult<Option<LockToken>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SyncError::backend_retryable("lock backend unreachable"))
    }

    fn release(&self, _token: &LockToken) -> SyncResult<()> {
        Err(SyncError::backend_retryable("lock backend unreachable"))
    }
}

/// A mirror backend that is unreachable until [`FailingMirror::recover`] is
/// called, after which it behaves like a [`MemoryMirror`].
#[derive(Debug, Default)]
pub struct FailingMirror {
    writes: AtomicU64,
    recovered: AtomicBool,
    inner: MemoryMirror,
}

impl FailingMirror {
    /// Creates the backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of attempted writes, failed or not.
    pub fn attempts(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Makes the backend reachable.
    pub fn recover(&self) {
        self.recovered.store(true, Ordering::SeqCst);
    }

    /// Number of writes that landed after recovery.
    pub fn written(&self) -> u64 {
        self.inner.writes()
    }

    fn reachable(&self) -> SyncResult<()> {
        if self.recovered.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::backend_retryable("mirror unreachable"))
        }
    }
}

impl MirrorBackend for FailingMirror {
    fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>> {
        self.reachable()?;
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> SyncResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.reachable()?;
        self.inner.set(key, value, ttl)
    }
}

/// A source that panics on its first `panics` loads, then serves records.
pub struct PanickingSource {
    kind: SourceKind,
    records: Vec<Identity>,
    panics: AtomicU64,
}

impl PanickingSource {
    /// Creates a source that panics `panics` times before serving `records`.
    pub fn new(kind: SourceKind, panics: u64, records: Vec<Identity>) -> Self {
        Self {
            kind,
            records,
            panics: AtomicU64::new(panics),
        }
    }
}

impl SourceLoader for PanickingSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn load(&self) -> SourceResult {
        let remaining = self.panics.load(Ordering::SeqCst);
        if remaining > 0 {
            self.panics.store(remaining - 1, Ordering::SeqCst);
            panic!("{} loader panicked", self.kind);
        }
        SourceResult::available(self.kind, self.records.clone())
    }
}
