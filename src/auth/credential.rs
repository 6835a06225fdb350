use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::time::{self, RawInstant};

/// Identity of a stored credential: one per (user, provider).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CredentialKey {
    pub user_id: String,
    pub provider: String,
}

impl CredentialKey {
    pub fn new(user_id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            provider: provider.into(),
        }
    }

    /// Filesystem-safe name used by the file store.
    pub fn file_stem(&self) -> String {
        let sanitize = |value: &str| {
            value
                .chars()
                .map(|ch| {
                    if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '@') {
                        ch
                    } else {
                        '_'
                    }
                })
                .collect::<String>()
        };
        format!("{}--{}", sanitize(&self.provider), sanitize(&self.user_id))
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CredentialState {
    Valid,
    NearExpiry,
    Expired,
    Refreshing,
    Unrecoverable,
}

impl CredentialState {
    pub fn needs_refresh(self) -> bool {
        matches!(self, Self::NearExpiry | Self::Expired)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::NearExpiry => "near-expiry",
            Self::Expired => "expired",
            Self::Refreshing => "refreshing",
            Self::Unrecoverable => "unrecoverable",
        }
    }
}

/// Stored OAuth access/refresh pair. `expires_at` is always canonical
/// epoch seconds; every constructor and setter normalizes on the way in,
/// and stored records are read back verbatim.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub key: CredentialKey,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    pub scope: BTreeSet<String>,
}

impl Credential {
    pub fn new(
        key: CredentialKey,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: Option<&RawInstant>,
        scope: BTreeSet<String>,
    ) -> AppResult<Self> {
        let expires_at = expires_at.map(time::normalize_epoch_seconds).transpose()?;
        Ok(Self {
            key,
            access_token: access_token.into(),
            refresh_token,
            expires_at,
            scope,
        })
    }

    /// Builds a credential from an initial authorization grant.
    pub fn from_grant(key: CredentialKey, grant: TokenGrant, now: DateTime<Utc>) -> AppResult<Self> {
        let expires_at = grant.expiry_seconds(now)?;
        Ok(Self {
            key,
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at,
            scope: grant.scope.as_deref().map(parse_scope).unwrap_or_default(),
        })
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }

    pub fn set_expires_at(&mut self, raw: Option<&RawInstant>) -> AppResult<()> {
        self.expires_at = raw.map(time::normalize_epoch_seconds).transpose()?;
        Ok(())
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty())
    }

    pub fn expires_in_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        Some(self.expires_at? - now.timestamp())
    }

    /// Time-based state only; `Refreshing` and `Unrecoverable` are tracked by
    /// the manager.
    pub fn assess(&self, now: DateTime<Utc>, buffer: Duration) -> CredentialState {
        let Some(expires_at) = self.expires_at else {
            return CredentialState::Valid;
        };

        let now_secs = now.timestamp();
        if expires_at <= now_secs {
            CredentialState::Expired
        } else if expires_at <= now_secs.saturating_add(buffer.num_seconds()) {
            CredentialState::NearExpiry
        } else {
            CredentialState::Valid
        }
    }

    /// Returns the credential that results from a successful refresh. The
    /// receiver is untouched so a failed caller keeps the prior values.
    pub fn refreshed_with(&self, grant: TokenGrant, now: DateTime<Utc>) -> AppResult<Self> {
        let expires_at = grant.expiry_seconds(now)?;
        let mut next = self.clone();
        next.access_token = grant.access_token;
        next.expires_at = expires_at;
        if let Some(refresh_token) = grant.refresh_token.filter(|t| !t.trim().is_empty()) {
            next.refresh_token = Some(refresh_token);
        }
        if let Some(scope) = grant.scope.as_deref().map(parse_scope) {
            if !scope.is_empty() {
                next.scope = scope;
            }
        }
        Ok(next)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("key", &self.key)
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Token endpoint payload, shared by the initial grant and refresh responses.
#[derive(Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default, alias = "expiry", alias = "expiresAt")]
    pub expires_at: Option<RawInstant>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenGrant {
    /// An explicit `expires_at` wins over a relative `expires_in`.
    pub fn expiry_seconds(&self, now: DateTime<Utc>) -> AppResult<Option<i64>> {
        if let Some(raw) = &self.expires_at {
            return time::normalize_epoch_seconds(raw).map(Some);
        }

        Ok(self
            .expires_in
            .map(|expires_in| now.timestamp().saturating_add(expires_in)))
    }
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

pub fn parse_scope(raw: &str) -> BTreeSet<String> {
    raw.split(|ch: char| ch.is_whitespace() || ch == ',')
        .filter(|part| !part.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CredentialKey {
        CredentialKey::new("user-1", "google")
    }

    fn credential_expiring_in(now: DateTime<Utc>, minutes: i64) -> Credential {
        let expires = RawInstant::Integer((now + Duration::minutes(minutes)).timestamp());
        Credential::new(key(), "access", Some("refresh".into()), Some(&expires), BTreeSet::new())
            .expect("credential")
    }

    #[test]
    fn absent_expiry_is_valid() {
        let credential =
            Credential::new(key(), "access", None, None, BTreeSet::new()).expect("credential");
        assert_eq!(
            credential.assess(Utc::now(), Duration::minutes(10)),
            CredentialState::Valid
        );
    }

    #[test]
    fn inside_buffer_is_near_expiry() {
        let now = Utc::now();
        let credential = credential_expiring_in(now, 5);
        assert_eq!(
            credential.assess(now, Duration::minutes(10)),
            CredentialState::NearExpiry
        );
        assert_eq!(
            credential.assess(now, Duration::minutes(2)),
            CredentialState::Valid
        );
    }

    #[test]
    fn past_expiry_is_expired() {
        let now = Utc::now();
        let credential = credential_expiring_in(now, -1);
        assert_eq!(
            credential.assess(now, Duration::minutes(10)),
            CredentialState::Expired
        );
    }

    #[test]
    fn millisecond_expiry_is_stored_as_seconds() {
        let credential = Credential::new(
            key(),
            "access",
            None,
            Some(&RawInstant::Integer(1_700_000_000_000)),
            BTreeSet::new(),
        )
        .expect("credential");
        assert_eq!(credential.expires_at(), Some(1_700_000_000));
    }

    #[test]
    fn deserializing_normalizes_expiry() {
        let raw = r#"{
            "key": {"user_id": "u", "provider": "google"},
            "access_token": "a",
            "expires_at": "2023-11-14T22:13:20Z"
        }"#;
        let credential: Credential = serde_json::from_str(raw).expect("parse");
        assert_eq!(credential.expires_at(), Some(1_700_000_000));

        let round_trip = serde_json::to_value(&credential).expect("serialize");
        assert_eq!(round_trip["expires_at"], 1_700_000_000);
    }

    #[test]
    fn refresh_keeps_old_refresh_token_when_omitted() {
        let now = Utc::now();
        let credential = credential_expiring_in(now, -5);
        let grant = TokenGrant {
            access_token: "new-access".into(),
            refresh_token: None,
            expires_in: Some(3600),
            expires_at: None,
            scope: None,
        };

        let next = credential.refreshed_with(grant, now).expect("refresh");
        assert_eq!(next.access_token, "new-access");
        assert_eq!(next.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(next.expires_at(), Some(now.timestamp() + 3600));
        assert_eq!(credential.access_token, "access");
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let credential = credential_expiring_in(Utc::now(), 60);
        let printed = format!("{credential:?}");
        assert!(!printed.contains("\"access\""));
        assert!(printed.contains("<redacted>"));
    }
}
