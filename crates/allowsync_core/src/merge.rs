//! Merge strategies for combining the local and remote sources.
//!
//! Merging is a pure function of the two tagged source results. An
//! unavailable source is never read as "zero identities": when a mode cannot
//! be satisfied the outcome is [`MergeOutcome::Retain`] and the caller keeps
//! the previously committed snapshot. A source that is available but empty
//! does propagate.

use crate::identity::{Identity, IdentityKey};
use crate::snapshot::{canonicalize, Snapshot};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Identifies a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// The local identity file.
    Local,
    /// The remote HTTP endpoint.
    Remote,
}

impl SourceKind {
    /// Returns the other source.
    pub fn other(self) -> Self {
        match self {
            SourceKind::Local => SourceKind::Remote,
            SourceKind::Remote => SourceKind::Local,
        }
    }

    /// Returns a lowercase label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Local => "local",
            SourceKind::Remote => "remote",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(SourceKind::Local),
            "remote" => Ok(SourceKind::Remote),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// The result of loading one source for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceResult {
    /// Which source produced this result.
    pub kind: SourceKind,
    /// Loaded records (empty when unavailable).
    pub records: Vec<Identity>,
    /// Whether the source could be read this cycle.
    pub available: bool,
}

impl SourceResult {
    /// A successful load.
    pub fn available(kind: SourceKind, records: Vec<Identity>) -> Self {
        Self {
            kind,
            records,
            available: true,
        }
    }

    /// A failed or skipped load.
    pub fn unavailable(kind: SourceKind) -> Self {
        Self {
            kind,
            records: Vec::new(),
            available: false,
        }
    }

    /// Returns true if the source is available and delivered records.
    pub fn has_records(&self) -> bool {
        self.available && !self.records.is_empty()
    }
}

/// How the two sources combine into one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MergeMode {
    /// Remote if available, else local.
    #[default]
    RemoteFirst,
    /// Local if available, else remote.
    LocalFirst,
    /// Remote only; retain on remote failure.
    RemoteOnly,
    /// Local only; remote is ignored entirely.
    LocalOnly,
    /// Union of whichever sources are available.
    Union,
    /// Union of both sources; retain unless both are available.
    UnionStrict,
}

impl MergeMode {
    /// All modes, in declaration order.
    pub const ALL: [MergeMode; 6] = [
        MergeMode::RemoteFirst,
        MergeMode::LocalFirst,
        MergeMode::RemoteOnly,
        MergeMode::LocalOnly,
        MergeMode::Union,
        MergeMode::UnionStrict,
    ];

    /// Returns the configuration name (`REMOTE_FIRST` style).
    pub fn as_str(self) -> &'static str {
        match self {
            MergeMode::RemoteFirst => "REMOTE_FIRST",
            MergeMode::LocalFirst => "LOCAL_FIRST",
            MergeMode::RemoteOnly => "REMOTE_ONLY",
            MergeMode::LocalOnly => "LOCAL_ONLY",
            MergeMode::Union => "UNION",
            MergeMode::UnionStrict => "UNION_STRICT",
        }
    }

    /// Returns true if the mode ever reads the given source.
    pub fn uses(self, kind: SourceKind) -> bool {
        match self {
            MergeMode::RemoteOnly => kind == SourceKind::Remote,
            MergeMode::LocalOnly => kind == SourceKind::Local,
            _ => true,
        }
    }
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        MergeMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized)
            .or_else(|| (normalized == "MERGE").then_some(MergeMode::Union))
            .ok_or_else(|| format!("unknown merge mode: {s}"))
    }
}

/// Outcome of one merge.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// Replace the committed snapshot with this one (if its hash differs).
    Replace(Snapshot),
    /// Keep the committed snapshot.
    Retain {
        /// Why nothing could be merged.
        reason: String,
    },
}

impl MergeOutcome {
    fn retain(reason: impl Into<String>) -> Self {
        MergeOutcome::Retain {
            reason: reason.into(),
        }
    }

    /// Returns the snapshot for a `Replace` outcome.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            MergeOutcome::Replace(snapshot) => Some(snapshot),
            MergeOutcome::Retain { .. } => None,
        }
    }
}

/// A configured merge mode plus the source precedence used to break ties
/// between duplicate identities in the union modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeStrategy {
    mode: MergeMode,
    precedence: SourceKind,
}

impl MergeStrategy {
    /// Creates a strategy; union ties go to the remote source.
    pub fn new(mode: MergeMode) -> Self {
        Self {
            mode,
            precedence: SourceKind::Remote,
        }
    }

    /// Sets which source wins duplicate identities in the union modes.
    #[must_use]
    pub fn with_precedence(mut self, winner: SourceKind) -> Self {
        self.precedence = winner;
        self
    }

    /// Returns the mode.
    pub fn mode(&self) -> MergeMode {
        self.mode
    }

    /// Returns the source that wins union ties.
    pub fn precedence(&self) -> SourceKind {
        self.precedence
    }

    /// Combines the local and remote results.
    pub fn merge(&self, local: &SourceResult, remote: &SourceResult) -> MergeOutcome {
        debug_assert_eq!(local.kind, SourceKind::Local);
        debug_assert_eq!(remote.kind, SourceKind::Remote);

        match self.mode {
            MergeMode::RemoteFirst => first_available(remote, local),
            MergeMode::LocalFirst => first_available(local, remote),
            MergeMode::RemoteOnly => only(remote),
            MergeMode::LocalOnly => only(local),
            MergeMode::Union => {
                let (winner, loser) = self.ordered(local, remote);
                match (winner.available, loser.available) {
                    (true, true) => MergeOutcome::Replace(union(winner, loser)),
                    (true, false) => MergeOutcome::Replace(Snapshot::new(winner.records.clone())),
                    (false, true) => MergeOutcome::Replace(Snapshot::new(loser.records.clone())),
                    (false, false) => MergeOutcome::retain("both sources unavailable"),
                }
            }
            MergeMode::UnionStrict => {
                let (winner, loser) = self.ordered(local, remote);
                if winner.available && loser.available {
                    MergeOutcome::Replace(union(winner, loser))
                } else {
                    MergeOutcome::retain("strict union requires both sources")
                }
            }
        }
    }

    fn ordered<'a>(
        &self,
        local: &'a SourceResult,
        remote: &'a SourceResult,
    ) -> (&'a SourceResult, &'a SourceResult) {
        match self.precedence {
            SourceKind::Remote => (remote, local),
            SourceKind::Local => (local, remote),
        }
    }
}

impl Default for MergeStrategy {
    fn default() -> Self {
        Self::new(MergeMode::default())
    }
}

fn first_available(primary: &SourceResult, fallback: &SourceResult) -> MergeOutcome {
    if primary.available {
        MergeOutcome::Replace(Snapshot::new(primary.records.clone()))
    } else if fallback.available {
        MergeOutcome::Replace(Snapshot::new(fallback.records.clone()))
    } else {
        MergeOutcome::retain("both sources unavailable")
    }
}

fn only(source: &SourceResult) -> MergeOutcome {
    if source.available {
        MergeOutcome::Replace(Snapshot::new(source.records.clone()))
    } else {
        MergeOutcome::retain(format!("{} source unavailable", source.kind))
    }
}

/// Union with `winner` taking every duplicate identity.
///
/// Each source is canonicalized on its own first, so duplicates inside one
/// source resolve the same way regardless of order; across sources the
/// winner's record is kept.
fn union(winner: &SourceResult, loser: &SourceResult) -> Snapshot {
    let winner = canonicalize(winner.records.iter().cloned());
    let seen: HashSet<IdentityKey> = winner.iter().map(Identity::key).collect();
    let extra = canonicalize(loser.records.iter().cloned())
        .into_iter()
        .filter(|record| !seen.contains(&record.key()));

    Snapshot::new(winner.into_iter().chain(extra))
}
