//! Valid bearer tokens on demand.
//!
//! [`TokenManager`] is the only writer of stored credentials. Reads and
//! refreshes for one subject are serialized on a per-subject async mutex, so
//! callers racing on an expiring token trigger a single refresh and then all
//! see the rotated token.

use crate::config::TokenConfig;
use crate::credentials::{Credential, CredentialStore, CredentialSummary};
use crate::error::GatewayError;
use crate::oauth::{OAuthError, TokenEndpoint, TokenGrant};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// An access token ready for an `Authorization: Bearer` header.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

pub struct TokenManager {
    store: Arc<dyn CredentialStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    skew: chrono::Duration,
    refresh_retry_delay: Duration,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TokenManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        endpoint: Arc<dyn TokenEndpoint>,
        config: &TokenConfig,
    ) -> Self {
        Self {
            store,
            endpoint,
            skew: chrono::Duration::seconds(config.refresh_skew_seconds),
            refresh_retry_delay: Duration::from_millis(config.refresh_retry_delay_ms),
            locks: DashMap::new(),
        }
    }

    /// Return a token that will not expire within the skew, refreshing first
    /// if necessary.
    pub async fn get_valid_token(&self, subject: &str) -> Result<BearerToken, GatewayError> {
        let lock = self.subject_lock(subject);
        let _guard = lock.lock().await;

        let credential = self.load(subject).await?;
        if credential.needs_refresh(Utc::now(), self.skew) {
            debug!(subject = %subject, expires_at = ?credential.expires_at, "Access token within refresh skew");
            let refreshed = self.refresh_locked(subject, credential).await?;
            return Ok(BearerToken(refreshed.access_token));
        }

        Ok(BearerToken(credential.access_token))
    }

    /// Unconditionally exchange the refresh token for a new access token.
    pub async fn refresh(&self, subject: &str) -> Result<BearerToken, GatewayError> {
        let lock = self.subject_lock(subject);
        let _guard = lock.lock().await;

        let credential = self.load(subject).await?;
        let refreshed = self.refresh_locked(subject, credential).await?;
        Ok(BearerToken(refreshed.access_token))
    }

    /// Refresh after the upstream rejected `rejected` with a 401.
    ///
    /// If the stored token already differs from `rejected`, another caller
    /// has rotated it and the stored one is returned without a new refresh.
    pub async fn refresh_rejected(
        &self,
        subject: &str,
        rejected: &BearerToken,
    ) -> Result<BearerToken, GatewayError> {
        let lock = self.subject_lock(subject);
        let _guard = lock.lock().await;

        let credential = self.load(subject).await?;
        if credential.access_token != rejected.as_str() {
            debug!(subject = %subject, "Token already rotated by a concurrent caller");
            return Ok(BearerToken(credential.access_token));
        }

        let refreshed = self.refresh_locked(subject, credential).await?;
        Ok(BearerToken(refreshed.access_token))
    }

    /// Store a freshly obtained grant (initial code exchange). Idempotent.
    pub async fn set_credential(
        &self,
        subject: &str,
        grant: TokenGrant,
    ) -> Result<CredentialSummary, GatewayError> {
        let lock = self.subject_lock(subject);
        let _guard = lock.lock().await;

        let owned = subject.to_string();
        let credential = self
            .with_store(move |store| {
                let previous = store.get(&owned)?;
                let credential = grant.into_credential(&owned, previous.as_ref());
                store.upsert(&credential)?;
                Ok(credential)
            })
            .await?;

        info!(
            subject = %subject,
            refreshable = credential.refresh_token.is_some(),
            "Stored OAuth credential"
        );
        Ok(credential.summary())
    }

    /// Forget the subject's credential. Returns whether one existed.
    pub async fn disconnect(&self, subject: &str) -> Result<bool, GatewayError> {
        let lock = self.subject_lock(subject);
        let _guard = lock.lock().await;

        let owned = subject.to_string();
        let existed = self.with_store(move |store| store.delete(&owned)).await?;
        info!(subject = %subject, existed, "Disconnected OAuth credential");
        Ok(existed)
    }

    /// Connection summary without secrets.
    pub async fn status(&self, subject: &str) -> Result<Option<CredentialSummary>, GatewayError> {
        let owned = subject.to_string();
        let credential = self.with_store(move |store| store.get(&owned)).await?;
        Ok(credential.map(|c| c.summary()))
    }

    fn subject_lock(&self, subject: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(subject.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load(&self, subject: &str) -> Result<Credential, GatewayError> {
        let owned = subject.to_string();
        self.with_store(move |store| store.get(&owned))
            .await?
            .ok_or_else(|| GatewayError::auth_expired(subject))
    }

    async fn invalidate(&self, subject: &str) -> Result<(), GatewayError> {
        let owned = subject.to_string();
        self.with_store(move |store| store.delete(&owned)).await?;
        Ok(())
    }

    /// Run a store call on the blocking pool; SQLite I/O must not stall the
    /// async workers.
    async fn with_store<T, F>(&self, op: F) -> Result<T, GatewayError>
    where
        F: FnOnce(&dyn CredentialStore) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| GatewayError::Storage(anyhow::anyhow!("credential store task failed: {}", e)))?;
        Ok(result?)
    }

    /// Caller must hold the subject's lock.
    async fn refresh_locked(
        &self,
        subject: &str,
        current: Credential,
    ) -> Result<Credential, GatewayError> {
        let Some(refresh_token) = current.refresh_token.clone() else {
            warn!(subject = %subject, "Access token expired and no refresh token stored");
            self.invalidate(subject).await?;
            return Err(GatewayError::auth_expired(subject));
        };

        info!(subject = %subject, "Refreshing OAuth token");

        let outcome = match self.endpoint.refresh(&refresh_token).await {
            Err(OAuthError::Transient(reason)) => {
                warn!(
                    subject = %subject,
                    reason = %reason,
                    delay_ms = self.refresh_retry_delay.as_millis() as u64,
                    "Token refresh failed transiently, retrying once"
                );
                tokio::time::sleep(self.refresh_retry_delay).await;
                self.endpoint.refresh(&refresh_token).await
            }
            other => other,
        };

        let grant = match outcome {
            Ok(grant) => grant,
            Err(e) if e.is_invalid_grant() => {
                warn!(
                    subject = %subject,
                    error = %e,
                    "Refresh token rejected, discarding credential"
                );
                self.invalidate(subject).await?;
                return Err(GatewayError::auth_expired(subject));
            }
            // invalid_client, unauthorized_client, ...: our side is misconfigured,
            // the user's grant is still good
            Err(OAuthError::Rejected { status, error }) => {
                error!(
                    subject = %subject,
                    status,
                    error = %error,
                    "Token endpoint rejected the client, keeping credential"
                );
                return Err(GatewayError::Config(format!(
                    "token endpoint rejected the client (status {}): {}",
                    status, error
                )));
            }
            Err(e) => {
                error!(subject = %subject, error = %e, "Token refresh failed");
                return Err(GatewayError::TransientUpstream {
                    status: None,
                    message: format!("Token refresh failed: {}", e),
                });
            }
        };

        let refreshed = grant.into_credential(subject, Some(&current));
        let stored = refreshed.clone();
        self.with_store(move |store| store.upsert(&stored)).await?;

        info!(
            subject = %subject,
            expires_at = ?refreshed.expires_at,
            "OAuth token refreshed successfully"
        );
        Ok(refreshed)
    }
}
