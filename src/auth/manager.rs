use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::time::RawInstant;

use super::credential::{Credential, CredentialKey, CredentialState, TokenGrant};
use super::oauth::TokenRefresher;
use super::store::CredentialStore;

pub const DEFAULT_REFRESH_BUFFER_MINUTES: i64 = 10;

/// Access token that was valid (or freshly refreshed) at the time of the call.
#[derive(Clone, PartialEq, Eq)]
pub struct ValidAccessToken {
    pub access_token: String,
    pub expires_at: Option<i64>,
    pub refreshed: bool,
}

impl fmt::Debug for ValidAccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidAccessToken")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("refreshed", &self.refreshed)
            .finish()
    }
}

impl ValidAccessToken {
    fn from_credential(credential: &Credential, refreshed: bool) -> Self {
        Self {
            access_token: credential.access_token.clone(),
            expires_at: credential.expires_at(),
            refreshed,
        }
    }
}

/// Per-credential refresh bookkeeping. Holding the slot's lock is the
/// critical section for a refresh exchange.
#[derive(Debug, Default)]
struct RefreshSlot {
    last_attempt: Option<RefreshAttempt>,
    dead_end: Option<DeadEnd>,
}

#[derive(Debug)]
struct RefreshAttempt {
    finished_at: Instant,
    failure: Option<String>,
}

/// The provider rejected this refresh token (or there was none). Only a new
/// grant carrying a different refresh token gets out of this state.
#[derive(Debug)]
struct DeadEnd {
    refresh_token: Option<String>,
    reason: String,
}

impl DeadEnd {
    fn applies_to(&self, credential: &Credential) -> bool {
        self.refresh_token == credential.refresh_token
    }
}

pub struct CredentialManager<S, R> {
    store: S,
    refresher: R,
    buffer: Duration,
    slots: Mutex<HashMap<CredentialKey, Arc<AsyncMutex<RefreshSlot>>>>,
}

impl<S, R> CredentialManager<S, R>
where
    S: CredentialStore,
    R: TokenRefresher,
{
    pub fn new(store: S, refresher: R) -> Self {
        Self {
            store,
            refresher,
            buffer: Duration::minutes(DEFAULT_REFRESH_BUFFER_MINUTES),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_buffer_minutes(mut self, minutes: i64) -> Self {
        self.buffer = Duration::minutes(minutes.max(0));
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn load(&self, key: &CredentialKey) -> AppResult<Credential> {
        self.store.load(key)?.ok_or_else(|| {
            AppError::InvalidInput(format!(
                "no credential stored for {key}. import a grant first"
            ))
        })
    }

    /// Returns a usable access token, refreshing first when the credential is
    /// expired or inside the refresh buffer. Concurrent callers for the same
    /// key share one refresh exchange.
    pub async fn ensure_valid_access_token(
        &self,
        credential: &Credential,
    ) -> AppResult<ValidAccessToken> {
        let state = credential.assess(Utc::now(), self.buffer);
        if !state.needs_refresh() {
            return Ok(ValidAccessToken::from_credential(credential, false));
        }

        debug!(key = %credential.key, state = state.as_str(), "credential needs refresh");

        let waiting_since = Instant::now();
        let slot = self.slot(&credential.key)?;
        let mut slot = slot.lock().await;

        let current = self
            .store
            .load(&credential.key)?
            .unwrap_or_else(|| credential.clone());

        if !current.assess(Utc::now(), self.buffer).needs_refresh() {
            debug!(key = %current.key, "credential refreshed by concurrent request");
            return Ok(ValidAccessToken::from_credential(&current, true));
        }

        if let Some(attempt) = &slot.last_attempt {
            if attempt.finished_at >= waiting_since {
                if let Some(reason) = &attempt.failure {
                    return Err(AppError::CredentialExpired(format!(
                        "concurrent refresh for {} failed: {reason}",
                        current.key
                    )));
                }
            }
        }

        let refreshed = self.refresh_locked(&mut slot, current).await?;
        Ok(ValidAccessToken::from_credential(&refreshed, true))
    }

    /// Refreshes regardless of the current expiry.
    pub async fn force_refresh(&self, key: &CredentialKey) -> AppResult<Credential> {
        let slot = self.slot(key)?;
        let mut slot = slot.lock().await;
        let current = self.load(key)?;
        self.refresh_locked(&mut slot, current).await
    }

    /// Stores a fresh authorization grant, replacing any previous credential
    /// and leaving the unrecoverable state.
    pub async fn store_grant(&self, key: CredentialKey, grant: TokenGrant) -> AppResult<Credential> {
        let slot = self.slot(&key)?;
        let mut slot = slot.lock().await;

        let credential = Credential::from_grant(key, grant, Utc::now())?;
        self.store.save(&credential)?;
        slot.dead_end = None;
        slot.last_attempt = None;

        info!(key = %credential.key, "stored new credential grant");
        Ok(credential)
    }

    pub async fn override_expiry(
        &self,
        key: &CredentialKey,
        expires_at: Option<&RawInstant>,
    ) -> AppResult<Credential> {
        let slot = self.slot(key)?;
        let _slot = slot.lock().await;

        let mut credential = self.load(key)?;
        credential.set_expires_at(expires_at)?;
        self.store.save(&credential)?;

        debug!(key = %credential.key, expires_at = ?credential.expires_at(), "expiry overridden");
        Ok(credential)
    }

    /// Deletes the stored credential and any refresh bookkeeping for it.
    pub fn forget(&self, key: &CredentialKey) -> AppResult<()> {
        self.store.clear(key)?;
        if let Ok(mut slots) = self.slots.lock() {
            slots.remove(key);
        }
        info!(key = %key, "credential removed");
        Ok(())
    }

    pub fn state(&self, key: &CredentialKey) -> AppResult<CredentialState> {
        let credential = self.load(key)?;
        let slot = self.slot(key)?;

        let Ok(slot) = slot.try_lock() else {
            return Ok(CredentialState::Refreshing);
        };

        if slot
            .dead_end
            .as_ref()
            .is_some_and(|dead_end| dead_end.applies_to(&credential))
        {
            return Ok(CredentialState::Unrecoverable);
        }

        Ok(credential.assess(Utc::now(), self.buffer))
    }

    async fn refresh_locked(
        &self,
        slot: &mut RefreshSlot,
        current: Credential,
    ) -> AppResult<Credential> {
        if let Some(dead_end) = &slot.dead_end {
            if dead_end.applies_to(&current) {
                return Err(AppError::CredentialExpired(format!(
                    "{} is unrecoverable: {}",
                    current.key, dead_end.reason
                )));
            }
            slot.dead_end = None;
        }

        let Some(refresh_token) = current
            .refresh_token
            .clone()
            .filter(|token| !token.trim().is_empty())
        else {
            let reason = "access token expired and no refresh token is stored".to_string();
            warn!(key = %current.key, "{reason}");
            slot.dead_end = Some(DeadEnd {
                refresh_token: current.refresh_token.clone(),
                reason: reason.clone(),
            });
            slot.record_failure(&reason);
            return Err(AppError::CredentialExpired(reason));
        };

        info!(key = %current.key, "refreshing access token");

        let outcome = match self.refresher.refresh(&refresh_token).await {
            Ok(grant) => current.refreshed_with(grant, Utc::now()),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(next) => {
                self.store.save(&next)?;
                slot.dead_end = None;
                slot.last_attempt = Some(RefreshAttempt {
                    finished_at: Instant::now(),
                    failure: None,
                });
                info!(key = %next.key, expires_at = ?next.expires_at(), "access token refreshed");
                Ok(next)
            }
            Err(AppError::Auth(reason)) => {
                warn!(key = %current.key, %reason, "refresh rejected; credential unrecoverable");
                slot.dead_end = Some(DeadEnd {
                    refresh_token: current.refresh_token.clone(),
                    reason: reason.clone(),
                });
                slot.record_failure(&reason);
                Err(AppError::CredentialExpired(reason))
            }
            Err(err) => {
                let reason = format!("refresh failed: {err}");
                warn!(key = %current.key, %reason, "refresh failed; will retry on next access");
                slot.record_failure(&reason);
                Err(AppError::CredentialExpired(reason))
            }
        }
    }

    fn slot(&self, key: &CredentialKey) -> AppResult<Arc<AsyncMutex<RefreshSlot>>> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| AppError::RefreshRace(format!("refresh registry poisoned for {key}")))?;
        Ok(slots.entry(key.clone()).or_default().clone())
    }
}

impl RefreshSlot {
    fn record_failure(&mut self, reason: &str) {
        self.last_attempt = Some(RefreshAttempt {
            finished_at: Instant::now(),
            failure: Some(reason.to_string()),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::auth::store::MemoryCredentialStore;

    struct CountingRefresher {
        calls: AtomicUsize,
        reject: bool,
    }

    impl CountingRefresher {
        fn accepting() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                reject: false,
            }
        }

        fn rejecting() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                reject: true,
            }
        }
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, _refresh_token: &str) -> AppResult<TokenGrant> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            if self.reject {
                return Err(AppError::Auth("invalid_grant".to_string()));
            }
            Ok(TokenGrant {
                access_token: format!("access-{call}"),
                refresh_token: None,
                expires_in: None,
                expires_at: Some(RawInstant::Integer(
                    (Utc::now() + Duration::hours(1)).timestamp() * 1000,
                )),
                scope: None,
            })
        }
    }

    /// Throttled by the provider once, then accepts.
    struct ThrottledOnce {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenRefresher for ThrottledOnce {
        async fn refresh(&self, refresh_token: &str) -> AppResult<TokenGrant> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(AppError::Api(
                    "token endpoint unavailable (429 Too Many Requests)".to_string(),
                ));
            }
            CountingRefresher::accepting().refresh(refresh_token).await
        }
    }

    fn credential(minutes_left: i64, refresh_token: Option<&str>) -> Credential {
        let expires = RawInstant::Integer((Utc::now() + Duration::minutes(minutes_left)).timestamp());
        Credential::new(
            CredentialKey::new("user-1", "google"),
            "stale",
            refresh_token.map(ToOwned::to_owned),
            Some(&expires),
            BTreeSet::new(),
        )
        .expect("credential")
    }

    #[tokio::test]
    async fn near_expiry_triggers_refresh_and_normalizes_response() {
        let stale = credential(5, Some("refresh"));
        let manager = CredentialManager::new(
            MemoryCredentialStore::with(stale.clone()),
            CountingRefresher::accepting(),
        );

        let token = manager.ensure_valid_access_token(&stale).await.expect("token");
        assert!(token.refreshed);
        assert_eq!(token.access_token, "access-1");

        let stored = manager.load(&stale.key).expect("stored");
        let expires_at = stored.expires_at().expect("expiry");
        assert!(expires_at < 4_102_444_800, "expiry stored in seconds");
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh"));
    }

    #[tokio::test]
    async fn valid_credential_is_returned_untouched() {
        let fresh = credential(120, Some("refresh"));
        let manager = CredentialManager::new(
            MemoryCredentialStore::with(fresh.clone()),
            CountingRefresher::accepting(),
        );

        let token = manager.ensure_valid_access_token(&fresh).await.expect("token");
        assert!(!token.refreshed);
        assert_eq!(token.access_token, "stale");
        assert_eq!(manager.refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_refresh_token_is_unrecoverable() {
        let stale = credential(-1, None);
        let manager = CredentialManager::new(
            MemoryCredentialStore::with(stale.clone()),
            CountingRefresher::accepting(),
        );

        let err = manager
            .ensure_valid_access_token(&stale)
            .await
            .expect_err("should fail");
        assert!(matches!(err, AppError::CredentialExpired(_)));
        assert_eq!(
            manager.state(&stale.key).expect("state"),
            CredentialState::Unrecoverable
        );
        assert_eq!(manager.load(&stale.key).expect("stored"), stale);
    }

    #[tokio::test]
    async fn rejected_refresh_leaves_stored_credential_untouched() {
        let stale = credential(-30, Some("revoked"));
        let manager = CredentialManager::new(
            MemoryCredentialStore::with(stale.clone()),
            CountingRefresher::rejecting(),
        );

        let err = manager
            .ensure_valid_access_token(&stale)
            .await
            .expect_err("should fail");
        assert!(matches!(err, AppError::CredentialExpired(_)));
        assert_eq!(manager.load(&stale.key).expect("stored"), stale);

        // Terminal: no second exchange is attempted for the same refresh token.
        let _ = manager.ensure_valid_access_token(&stale).await;
        assert_eq!(manager.refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn new_grant_clears_unrecoverable_state() {
        let stale = credential(-30, Some("revoked"));
        let manager = CredentialManager::new(
            MemoryCredentialStore::with(stale.clone()),
            CountingRefresher::rejecting(),
        );
        let _ = manager.ensure_valid_access_token(&stale).await;

        let grant: TokenGrant = serde_json::from_str(
            r#"{"access_token":"granted","refresh_token":"fresh","expires_in":3600}"#,
        )
        .expect("grant");
        manager
            .store_grant(stale.key.clone(), grant)
            .await
            .expect("grant stored");

        assert_eq!(
            manager.state(&stale.key).expect("state"),
            CredentialState::Valid
        );
    }

    #[tokio::test]
    async fn throttled_refresh_is_retried_on_next_access() {
        let stale = credential(-1, Some("refresh"));
        let manager = CredentialManager::new(
            MemoryCredentialStore::with(stale.clone()),
            ThrottledOnce {
                calls: AtomicUsize::new(0),
            },
        );

        let err = manager
            .ensure_valid_access_token(&stale)
            .await
            .expect_err("throttled");
        assert!(matches!(err, AppError::CredentialExpired(_)));
        assert_ne!(
            manager.state(&stale.key).expect("state"),
            CredentialState::Unrecoverable
        );

        let token = manager
            .ensure_valid_access_token(&stale)
            .await
            .expect("retried");
        assert_eq!(token.access_token, "access-1");
        assert_eq!(manager.refresher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let stale = credential(2, Some("refresh"));
        let manager = Arc::new(CredentialManager::new(
            MemoryCredentialStore::with(stale.clone()),
            CountingRefresher::accepting(),
        ));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let manager = Arc::clone(&manager);
            let stale = stale.clone();
            handles.push(tokio::spawn(async move {
                manager.ensure_valid_access_token(&stale).await
            }));
        }

        for handle in handles {
            let token = handle.await.expect("join").expect("token");
            assert_eq!(token.access_token, "access-1");
        }
        assert_eq!(manager.refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn waiters_on_failed_refresh_get_credential_expired() {
        let stale = credential(-1, Some("revoked"));
        let manager = Arc::new(CredentialManager::new(
            MemoryCredentialStore::with(stale.clone()),
            CountingRefresher::rejecting(),
        ));

        let first = {
            let manager = Arc::clone(&manager);
            let stale = stale.clone();
            tokio::spawn(async move { manager.ensure_valid_access_token(&stale).await })
        };
        let second = {
            let manager = Arc::clone(&manager);
            let stale = stale.clone();
            tokio::spawn(async move { manager.ensure_valid_access_token(&stale).await })
        };

        for handle in [first, second] {
            let err = handle.await.expect("join").expect_err("should fail");
            assert!(matches!(err, AppError::CredentialExpired(_)));
        }
        assert_eq!(manager.refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn override_expiry_normalizes_iso_input() {
        let fresh = credential(120, Some("refresh"));
        let manager = CredentialManager::new(
            MemoryCredentialStore::with(fresh.clone()),
            CountingRefresher::accepting(),
        );

        let updated = manager
            .override_expiry(&fresh.key, Some(&RawInstant::from("2023-11-14T22:13:20Z")))
            .await
            .expect("override");
        assert_eq!(updated.expires_at(), Some(1_700_000_000));
        assert_eq!(
            manager.state(&fresh.key).expect("state"),
            CredentialState::Expired
        );
    }
}
