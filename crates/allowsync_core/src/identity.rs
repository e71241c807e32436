//! The identity record and its keys.

use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A single allowed identity.
///
/// Two records describe the same identity when their `(phone, mail)` pair is
/// equal; every other field is payload. `user_id` is an optional secondary
/// key used for lookups only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Phone number, as delivered by the source.
    #[serde(default)]
    pub phone: String,
    /// Mail address, as delivered by the source.
    #[serde(default)]
    pub mail: String,
    /// Optional user id.
    #[serde(
        default,
        rename = "userId",
        alias = "user_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_id: Option<String>,
    /// Account status (free-form, e.g. `active`).
    #[serde(default)]
    pub status: String,
    /// Granted scopes.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub scope: Vec<String>,
    /// Role name.
    #[serde(default)]
    pub role: String,
}

impl Identity {
    /// Creates an identity with only its key fields set.
    pub fn new(phone: impl Into<String>, mail: impl Into<String>) -> Self {
        Self {
            phone: phone.into(),
            mail: mail.into(),
            ..Self::default()
        }
    }

    /// Sets the user id.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    /// Sets the role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Sets the scopes.
    #[must_use]
    pub fn with_scope<I, S>(mut self, scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = scope.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the identity key `(phone, mail)`.
    pub fn key(&self) -> IdentityKey {
        IdentityKey {
            phone: self.phone.clone(),
            mail: self.mail.clone(),
        }
    }

    /// Returns the canonical form of this record.
    ///
    /// Scopes are sorted and deduplicated and an empty `user_id` becomes
    /// `None`, so records that differ only in those representations compare
    /// equal afterwards.
    #[must_use]
    pub fn canonical(mut self) -> Self {
        self.scope.sort();
        self.scope.dedup();
        if self.user_id.as_deref() == Some("") {
            self.user_id = None;
        }
        self
    }

    /// Total order used for canonical snapshot layout: key fields first,
    /// then payload.
    pub(crate) fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.phone
            .cmp(&other.phone)
            .then_with(|| self.mail.cmp(&other.mail))
            .then_with(|| self.user_id.cmp(&other.user_id))
            .then_with(|| self.status.cmp(&other.status))
            .then_with(|| self.role.cmp(&other.role))
            .then_with(|| self.scope.cmp(&other.scope))
    }
}

/// Identity key: the `(phone, mail)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    /// Phone number.
    pub phone: String,
    /// Mail address.
    pub mail: String,
}

impl IdentityKey {
    /// Creates a key.
    pub fn new(phone: impl Into<String>, mail: impl Into<String>) -> Self {
        Self {
            phone: phone.into(),
            mail: mail.into(),
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.phone, self.mail)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}
