//! Immutable identity snapshots.

use crate::hasher::{ContentHasher, SnapshotHash};
use crate::identity::{Identity, IdentityKey};
use std::sync::Arc;

/// Brings a record collection into canonical form.
///
/// Every record is canonicalized, the list is sorted by key then payload,
/// and duplicate identities collapse to the first record in that order.
/// The result depends only on the multiset of input records, never on the
/// order they arrived in. Callers that need a particular record to win a
/// duplicate (source precedence) must resolve duplicates before calling
/// this.
pub fn canonicalize<I>(records: I) -> Vec<Identity>
where
    I: IntoIterator<Item = Identity>,
{
    let mut records: Vec<Identity> = records.into_iter().map(Identity::canonical).collect();
    records.sort_by(Identity::canonical_cmp);
    records.dedup_by(|b, a| a.phone == b.phone && a.mail == b.mail);
    records
}

/// The full set of allowed identities at one point in time.
///
/// A snapshot is canonical and immutable once built; its hash is computed at
/// construction and always matches its records. Cloning is an `Arc` bump,
/// so snapshots can be handed to any number of readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    records: Arc<[Identity]>,
    hash: SnapshotHash,
}

impl Snapshot {
    /// Builds a snapshot from records in any order.
    pub fn new<I>(records: I) -> Self
    where
        I: IntoIterator<Item = Identity>,
    {
        let records = canonicalize(records);
        let hash = ContentHasher::hash_canonical(&records);
        Self {
            records: records.into(),
            hash,
        }
    }

    /// Returns the empty snapshot.
    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// Returns the content hash.
    pub fn hash(&self) -> SnapshotHash {
        self.hash
    }

    /// Returns the canonical records.
    pub fn records(&self) -> &[Identity] {
        &self.records
    }

    /// Returns the number of identities.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the snapshot holds no identities.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates over the records in canonical order.
    pub fn iter(&self) -> std::slice::Iter<'_, Identity> {
        self.records.iter()
    }

    /// Looks up an identity by its `(phone, mail)` key.
    pub fn get(&self, key: &IdentityKey) -> Option<&Identity> {
        self.records
            .binary_search_by(|r| {
                r.phone
                    .as_str()
                    .cmp(key.phone.as_str())
                    .then_with(|| r.mail.as_str().cmp(key.mail.as_str()))
            })
            .ok()
            .map(|idx| &self.records[idx])
    }

    /// Returns true if the `(phone, mail)` pair is allowed.
    pub fn is_allowed(&self, phone: &str, mail: &str) -> bool {
        self.get(&IdentityKey::new(phone, mail)).is_some()
    }

    /// Returns every record with the given phone number.
    pub fn find_by_phone(&self, phone: &str) -> Vec<&Identity> {
        let start = self.records.partition_point(|r| r.phone.as_str() < phone);
        self.records[start..]
            .iter()
            .take_while(|r| r.phone == phone)
            .collect()
    }

    /// Returns every record with the given mail address.
    pub fn find_by_mail(&self, mail: &str) -> Vec<&Identity> {
        self.records.iter().filter(|r| r.mail == mail).collect()
    }

    /// Returns the first record carrying the given user id.
    pub fn find_by_user_id(&self, user_id: &str) -> Option<&Identity> {
        self.records
            .iter()
            .find(|r| r.user_id.as_deref() == Some(user_id))
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Identity;
    type IntoIter = std::slice::Iter<'a, Identity>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
