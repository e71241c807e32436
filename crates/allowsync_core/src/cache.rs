//! The in-process snapshot cache.

use crate::hasher::SnapshotHash;
use crate::identity::Identity;
use crate::snapshot::Snapshot;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::SystemTime;

/// One committed cache state.
///
/// States are never modified after publication; a commit builds a new state
/// and swaps the pointer.
#[derive(Debug, Clone)]
pub struct CacheState {
    snapshot: Snapshot,
    generation: u64,
    committed_at: Option<SystemTime>,
}

impl CacheState {
    /// Returns the snapshot.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Returns the snapshot hash.
    pub fn hash(&self) -> SnapshotHash {
        self.snapshot.hash()
    }

    /// Returns how many commits preceded this state (0 for the boot state).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns when this state was committed (`None` for the boot state).
    pub fn committed_at(&self) -> Option<SystemTime> {
        self.committed_at
    }

    /// Returns true once any snapshot has been committed, including an
    /// empty one.
    pub fn is_loaded(&self) -> bool {
        self.generation > 0
    }
}

/// Thread-safe holder of the current identity snapshot.
///
/// Any number of threads may read concurrently; a read clones an `Arc` under
/// a briefly held read lock, so readers never wait on a refresh cycle, only
/// on the pointer swap inside [`LocalCache::set`]. Writers are expected to be
/// serialized by the caller (the refresh scheduler runs one cycle at a time).
///
/// # Example
///
/// ```rust
/// use allowsync_core::{Identity, LocalCache, Snapshot};
///
/// let cache = LocalCache::new();
/// assert_eq!(cache.len(), 0);
///
/// cache.set(Snapshot::new(vec![Identity::new("111", "a@x.com")]));
/// assert!(cache.get().is_allowed("111", "a@x.com"));
/// ```
#[derive(Debug)]
pub struct LocalCache {
    state: RwLock<Arc<CacheState>>,
}

impl LocalCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Arc::new(CacheState {
                snapshot: Snapshot::empty(),
                generation: 0,
                committed_at: None,
            })),
        }
    }

    /// Returns the current state (snapshot, hash and commit metadata together).
    pub fn state(&self) -> Arc<CacheState> {
        Arc::clone(&self.state.read())
    }

    /// Returns the current snapshot.
    pub fn get(&self) -> Snapshot {
        self.state.read().snapshot.clone()
    }

    /// Returns the number of identities in the current snapshot.
    pub fn len(&self) -> usize {
        self.state.read().snapshot.len()
    }

    /// Returns true if the current snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the hash of the current snapshot.
    pub fn current_hash(&self) -> SnapshotHash {
        self.state.read().snapshot.hash()
    }

    /// Returns true once any snapshot has been committed. An empty
    /// committed snapshot counts as loaded; see [`CacheState::is_loaded`].
    pub fn is_loaded(&self) -> bool {
        self.state.read().is_loaded()
    }

    /// Replaces the current snapshot.
    pub fn set(&self, snapshot: Snapshot) {
        let mut guard = self.state.write();
        let next = CacheState {
            snapshot,
            generation: guard.generation + 1,
            committed_at: Some(SystemTime::now()),
        };
        *guard = Arc::new(next);
    }

    /// Replaces the current snapshot only if its hash differs.
    ///
    /// Returns true if a commit happened.
    pub fn set_if_changed(&self, snapshot: Snapshot) -> bool {
        let mut guard = self.state.write();
        if guard.snapshot.hash() == snapshot.hash() {
            return false;
        }
        let next = CacheState {
            snapshot,
            generation: guard.generation + 1,
            committed_at: Some(SystemTime::now()),
        };
        *guard = Arc::new(next);
        true
    }

    /// Returns true if the `(phone, mail)` pair is currently allowed.
    pub fn is_allowed(&self, phone: &str, mail: &str) -> bool {
        self.state.read().snapshot.is_allowed(phone, mail)
    }

    /// Returns every currently allowed record with the given phone number.
    pub fn find_by_phone(&self, phone: &str) -> Vec<Identity> {
        let state = self.state();
        state
            .snapshot
            .find_by_phone(phone)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Returns every currently allowed record with the given mail address.
    pub fn find_by_mail(&self, mail: &str) -> Vec<Identity> {
        let state = self.state();
        state
            .snapshot
            .find_by_mail(mail)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Returns the currently allowed record carrying the given user id.
    pub fn find_by_user_id(&self, user_id: &str) -> Option<Identity> {
        self.state().snapshot.find_by_user_id(user_id).cloned()
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new()
    }
}
