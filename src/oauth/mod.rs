//! OAuth 2.0 authorization-code flow against the upstream provider.
//!
//! 1. `GET /api/oauth/start` → [`CsrfStates::issue`] + redirect built by
//!    [`OAuthProviderConfig::build_auth_url`]
//! 2. Provider redirects back to `/api/oauth/callback`
//! 3. [`TokenEndpoint::exchange_code`] turns the code into a [`TokenGrant`]
//! 4. The token manager persists it; later [`TokenEndpoint::refresh`] keeps it alive

mod client;
mod provider;
mod state;

pub use client::HttpTokenEndpoint;
pub use provider::OAuthProviderConfig;
pub use state::{run_state_cleanup, CsrfStates, PendingAuthorization};

use crate::credentials::{parse_scopes, Credential};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Standard OAuth 2.0 token response
#[derive(Deserialize, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenGrant {
    /// Build the credential to persist for `subject_id`.
    ///
    /// Providers may omit the refresh token and scope on refresh; the values
    /// from `previous` are carried over in that case.
    pub fn into_credential(self, subject_id: &str, previous: Option<&Credential>) -> Credential {
        let expires_at = self.expires_in.map(|secs| Utc::now() + Duration::seconds(secs));

        let refresh_token = self
            .refresh_token
            .or_else(|| previous.and_then(|p| p.refresh_token.clone()));

        let scopes = match self.scope.as_deref() {
            Some(scope) => parse_scopes(scope),
            None => previous.map(|p| p.scopes.clone()).unwrap_or_default(),
        };

        Credential {
            subject_id: subject_id.to_string(),
            access_token: self.access_token,
            refresh_token,
            expires_at,
            scopes,
        }
    }
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum OAuthError {
    /// 4xx from the token endpoint: `invalid_grant`, `invalid_client`, ...
    /// The grant will not start working on its own.
    #[error("token endpoint rejected the grant (status {status}): {error}")]
    Rejected { status: u16, error: String },

    /// Transport failure or 5xx; worth one more try.
    #[error("token endpoint unavailable: {0}")]
    Transient(String),

    #[error("malformed token response: {0}")]
    Malformed(String),
}

impl OAuthError {
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, OAuthError::Rejected { error, .. } if error == "invalid_grant")
    }
}

/// The authorization server's token endpoint.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchange an authorization code (callback leg of the flow).
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant, OAuthError>;

    /// Mint a new access token from a refresh token.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, OAuthError>;
}
