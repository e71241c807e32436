//! Property-based test generators using proptest.
//!
//! Generated identities are already canonical (sorted, deduplicated scope)
//! so tests can compare them directly against snapshot contents.

use allowsync_core::Identity;
use proptest::prelude::*;

/// Strategy for phone numbers.
pub fn phone_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("\\+?[0-9]{3,12}").expect("Invalid regex")
}

/// Strategy for mail addresses.
pub fn mail_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9.]{0,11}@[a-z]{1,8}\\.(com|org|io)")
        .expect("Invalid regex")
}

/// Strategy for a single identity record.
pub fn identity_strategy() -> impl Strategy<Value = Identity> {
    (
        phone_strategy(),
        mail_strategy(),
        prop::option::of("[a-z0-9]{1,12}"),
        prop::sample::select(vec!["active", "suspended", ""]),
        prop::collection::vec("[a-z]{1,6}", 0..4),
        prop::sample::select(vec!["admin", "user", "viewer", ""]),
    )
        .prop_map(|(phone, mail, user_id, status, scope, role)| {
            let mut identity = Identity::new(phone, mail)
                .with_status(status)
                .with_role(role)
                .with_scope(scope);
            if let Some(user_id) = user_id {
                identity = identity.with_user_id(user_id);
            }
            identity.canonical()
        })
}

/// Strategy for identity lists with unique `(phone, mail)` keys.
pub fn identity_list_strategy(max_len: usize) -> impl Strategy<Value = Vec<Identity>> {
    prop::collection::vec(identity_strategy(), 0..=max_len).prop_map(|records| {
        let mut seen = std::collections::HashSet::new();
        records
            .into_iter()
            .filter(|identity| seen.insert(identity.key()))
            .collect()
    })
}

/// Strategy for a non-empty identity list together with a shuffled copy.
pub fn shuffled_identities_strategy(
    max_len: usize,
) -> impl Strategy<Value = (Vec<Identity>, Vec<Identity>)> {
    identity_list_strategy(max_len)
        .prop_filter("need records to shuffle", |records| !records.is_empty())
        .prop_flat_map(|records| {
            let shuffled = Just(records.clone()).prop_shuffle();
            (Just(records), shuffled)
        })
}

/// Proptest configuration presets.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use allowsync_core::{
        ContentHasher, MergeMode, MergeOutcome, MergeStrategy, Snapshot, SourceKind, SourceResult,
    };

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn hash_ignores_record_order((records, shuffled) in shuffled_identities_strategy(24)) {
            prop_assert_eq!(ContentHasher::hash(&records), ContentHasher::hash(&shuffled));
            prop_assert_eq!(Snapshot::new(records), Snapshot::new(shuffled));
        }

        #[test]
        fn distinct_content_has_distinct_hash(
            a in identity_list_strategy(12),
            b in identity_list_strategy(12),
        ) {
            let a = Snapshot::new(a);
            let b = Snapshot::new(b);
            prop_assert_eq!(a.records() == b.records(), a.hash() == b.hash());
        }

        #[test]
        fn any_field_change_changes_hash(identity in identity_strategy()) {
            let base = ContentHasher::hash(std::slice::from_ref(&identity));
            let role = format!("{}x", identity.role);
            let changed = identity.clone().with_role(role);
            prop_assert_ne!(base, ContentHasher::hash(&[changed]));
        }

        #[test]
        fn local_only_ignores_remote(
            local in identity_list_strategy(8),
            remote in identity_list_strategy(8),
            remote_available in any::<bool>(),
        ) {
            let local_result = SourceResult::available(SourceKind::Local, local.clone());
            let remote_result = if remote_available {
                SourceResult::available(SourceKind::Remote, remote)
            } else {
                SourceResult::unavailable(SourceKind::Remote)
            };

            let outcome =
                MergeStrategy::new(MergeMode::LocalOnly).merge(&local_result, &remote_result);
            prop_assert_eq!(outcome, MergeOutcome::Replace(Snapshot::new(local)));
        }

        #[test]
        fn remote_first_prefers_remote(
            local in identity_list_strategy(8),
            remote in identity_list_strategy(8),
        ) {
            let strategy = MergeStrategy::new(MergeMode::RemoteFirst);
            let local_result = SourceResult::available(SourceKind::Local, local.clone());

            let with_remote = strategy.merge(
                &local_result,
                &SourceResult::available(SourceKind::Remote, remote.clone()),
            );
            prop_assert_eq!(with_remote, MergeOutcome::Replace(Snapshot::new(remote)));

            let without_remote =
                strategy.merge(&local_result, &SourceResult::unavailable(SourceKind::Remote));
            prop_assert_eq!(without_remote, MergeOutcome::Replace(Snapshot::new(local)));
        }

        #[test]
        fn union_contains_every_key(
            local in identity_list_strategy(8),
            remote in identity_list_strategy(8),
        ) {
            let outcome = MergeStrategy::new(MergeMode::Union).merge(
                &SourceResult::available(SourceKind::Local, local.clone()),
                &SourceResult::available(SourceKind::Remote, remote.clone()),
            );
            let snapshot = outcome.snapshot().cloned().unwrap_or_default();
            for identity in local.iter().chain(remote.iter()) {
                prop_assert!(snapshot.get(&identity.key()).is_some());
            }
        }
    }

    #[test]
    fn both_unavailable_always_retains() {
        for mode in MergeMode::ALL {
            let outcome = MergeStrategy::new(mode).merge(
                &SourceResult::unavailable(SourceKind::Local),
                &SourceResult::unavailable(SourceKind::Remote),
            );
            assert!(matches!(outcome, MergeOutcome::Retain { .. }), "{mode}");
        }
    }
}
