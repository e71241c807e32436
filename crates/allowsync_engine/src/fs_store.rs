//! Directory-backed lock and mirror store.
//!
//! Lets several processes on one host (or on a shared volume) coordinate
//! without an external key/value service:
//!
//! ```text
//! <root>/
//! ├─ STORE.lock              # Advisory guard serializing store operations
//! ├─ <key>.lock              # Refresh lock: "<token>\n<expires_ms>"
//! └─ <key>.mirror            # Mirror: 8-byte BE expires_ms + payload
//! ```
//!
//! Keys are escaped into file stems: ASCII alphanumerics and `-` are kept,
//! every other byte becomes `_` followed by two hex digits.
//!
//! Every operation runs under an exclusive advisory lock on `STORE.lock`,
//! which makes lock acquisition an atomic set-if-absent. Waiting for that
//! lock is bounded by the store's guard timeout. Mirror values are
//! written to a temporary file and renamed into place, so readers never see
//! a partial value.

use crate::error::{SyncError, SyncResult};
use crate::lock::{LockBackend, LockToken};
use crate::mirror::MirrorBackend;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const GUARD_FILE: &str = "STORE.lock";
const LOCK_SUFFIX: &str = "lock";
const MIRROR_SUFFIX: &str = "mirror";

/// Default bound on waiting for the store guard.
pub const DEFAULT_GUARD_TIMEOUT: Duration = Duration::from_secs(5);

const GUARD_POLL: Duration = Duration::from_millis(10);

/// Lock and mirror backend stored in a directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    guard_timeout: Duration,
}

impl FsStore {
    /// Opens a store, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or is not a
    /// directory.
    pub fn open(root: impl Into<PathBuf>) -> SyncResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        if !root.is_dir() {
            return Err(SyncError::backend_fatal(format!(
                "store path is not a directory: {}",
                root.display()
            )));
        }
        Ok(Self {
            root,
            guard_timeout: DEFAULT_GUARD_TIMEOUT,
        })
    }

    /// Sets how long an operation waits for the store guard before failing
    /// with a retryable error.
    pub fn with_guard_timeout(mut self, timeout: Duration) -> Self {
        self.guard_timeout = timeout;
        self
    }

    /// Returns the store directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str, suffix: &str) -> PathBuf {
        self.root.join(format!("{}.{suffix}", sanitize_key(key)))
    }

    /// Runs `f` while holding the store guard.
    fn guarded<T>(&self, f: impl FnOnce() -> SyncResult<T>) -> SyncResult<T> {
        let guard = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.root.join(GUARD_FILE))?;
        self.lock_guard(&guard)?;
        let result = f();
        // Closing the handle releases the lock as well.
        let _ = guard.unlock();
        result
    }

    fn lock_guard(&self, guard: &File) -> SyncResult<()> {
        let deadline = Instant::now() + self.guard_timeout;
        let contended = fs2::lock_contended_error().kind();
        loop {
            match guard.try_lock_exclusive() {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == contended => {
                    if Instant::now() >= deadline {
                        return Err(SyncError::backend_retryable(format!(
                            "store guard busy for {}ms: {}",
                            self.guard_timeout.as_millis(),
                            self.root.display()
                        )));
                    }
                    thread::sleep(GUARD_POLL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl LockBackend for FsStore {
    fn try_acquire(&self, key: &str, ttl: Duration) -> SyncResult<Option<LockToken>> {
        let path = self.entry_path(key, LOCK_SUFFIX);
        self.guarded(|| {
            if let Some((_, expires_ms)) = read_lock_file(&path)? {
                if expires_ms > now_ms() {
                    return Ok(None);
                }
            }

            let token = LockToken::generate(key);
            let contents = format!("{}\n{}", token.id, expiry_ms(ttl));
            write_atomic(&path, contents.as_bytes())?;
            Ok(Some(token))
        })
    }

    fn release(&self, token: &LockToken) -> SyncResult<()> {
        let path = self.entry_path(&token.key, LOCK_SUFFIX);
        self.guarded(|| {
            if let Some((id, _)) = read_lock_file(&path)? {
                if id == token.id {
                    remove_if_exists(&path)?;
                }
            }
            Ok(())
        })
    }
}

impl MirrorBackend for FsStore {
    fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>> {
        let path = self.entry_path(key, MIRROR_SUFFIX);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if bytes.len() < 8 {
            return Err(SyncError::backend_fatal(format!(
                "truncated mirror entry: {}",
                path.display()
            )));
        }
        let (header, payload) = bytes.split_at(8);
        let mut expires = [0u8; 8];
        expires.copy_from_slice(header);
        if u64::from_be_bytes(expires) <= now_ms() {
            return Ok(None);
        }
        Ok(Some(payload.to_vec()))
    }

    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> SyncResult<()> {
        let path = self.entry_path(key, MIRROR_SUFFIX);
        let mut contents = Vec::with_capacity(8 + value.len());
        contents.extend_from_slice(&expiry_ms(ttl).to_be_bytes());
        contents.extend_from_slice(value);
        self.guarded(|| write_atomic(&path, &contents))
    }
}

/// Escapes a key into a file stem. Distinct keys map to distinct stems.
fn sanitize_key(key: &str) -> String {
    let mut stem = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("_{byte:02x}"));
        }
    }
    stem
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn expiry_ms(ttl: Duration) -> u64 {
    now_ms().saturating_add(ttl.as_millis() as u64)
}

fn read_lock_file(path: &Path) -> SyncResult<Option<(String, u64)>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    // An unparseable lock file is treated as expired.
    let mut lines = contents.lines();
    let id = lines.next().unwrap_or_default().to_string();
    let expires_ms = lines
        .next()
        .and_then(|line| line.trim().parse().ok())
        .unwrap_or(0);
    Ok(Some((id, expires_ms)))
}

fn write_atomic(path: &Path, contents: &[u8]) -> SyncResult<()> {
    let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    let result = (|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> SyncResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
