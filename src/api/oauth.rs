//! OAuth 2.0 connect flow for subjects.
//!
//! 1. GET /api/oauth/start → CSRF state, redirect to the provider
//! 2. User consents on the provider's site
//! 3. Provider redirects to GET /api/oauth/callback
//! 4. Exchange code for tokens, hand them to the token manager
//! 5. GET /api/oauth/status and DELETE /api/oauth/connection manage it later

use super::{extract_subject, ApiError};
use crate::credentials::CredentialSummary;
use crate::gateway::Gateway;
use crate::oauth::{CsrfStates, OAuthProviderConfig, TokenEndpoint};
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{Json, Redirect},
    routing::{delete, get},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Shared state for the OAuth routes
#[derive(Clone)]
pub struct OAuthAppState {
    pub gateway: Gateway,
    pub endpoint: Arc<dyn TokenEndpoint>,
    pub provider: OAuthProviderConfig,
    pub states: CsrfStates,
    pub callback_base_url: String,
}

impl OAuthAppState {
    /// Must be identical in the start and callback legs.
    fn redirect_uri(&self) -> String {
        format!(
            "{}/api/oauth/callback",
            self.callback_base_url.trim_end_matches('/')
        )
    }
}

/// OAuth callback query parameters
#[derive(Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Serialize)]
pub struct OAuthSuccessResponse {
    success: bool,
    message: String,
    credential: CredentialSummary,
}

#[derive(Serialize)]
pub struct ConnectionStatus {
    connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    credential: Option<CredentialSummary>,
}

#[derive(Serialize)]
pub struct DisconnectResponse {
    disconnected: bool,
    cache_entries_removed: usize,
}

/// Create OAuth API router
pub fn create_oauth_router(state: OAuthAppState) -> Router {
    Router::new()
        .route("/api/oauth/start", get(oauth_start))
        .route("/api/oauth/callback", get(oauth_callback))
        .route("/api/oauth/status", get(oauth_status))
        .route("/api/oauth/connection", delete(oauth_disconnect))
        .with_state(Arc::new(state))
}

/// GET /api/oauth/start
///
/// Redirects the subject to the provider's consent page. The CSRF state is
/// single use and expires after the configured lifetime.
async fn oauth_start(
    State(state): State<Arc<OAuthAppState>>,
    headers: HeaderMap,
) -> Result<Redirect, ApiError> {
    let subject = extract_subject(&headers)?;

    let csrf_state = state.states.issue(&subject);
    let auth_url = state
        .provider
        .build_auth_url(&csrf_state, &state.redirect_uri());

    info!(subject = %subject, "Redirecting to OAuth provider");
    Ok(Redirect::temporary(&auth_url))
}

/// GET /api/oauth/callback
///
/// The subject is taken from the consumed CSRF state, never from the request.
async fn oauth_callback(
    State(state): State<Arc<OAuthAppState>>,
    Query(callback): Query<OAuthCallback>,
) -> Result<Json<OAuthSuccessResponse>, ApiError> {
    if let Some(error) = callback.error {
        let description = callback
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(error = %error, description = %description, "OAuth authorization failed");
        return Err(ApiError::BadRequest(format!(
            "OAuth authorization failed: {} - {}",
            error, description
        )));
    }

    let code = callback
        .code
        .ok_or_else(|| ApiError::BadRequest("Missing 'code' parameter".to_string()))?;
    let csrf_state = callback
        .state
        .ok_or_else(|| ApiError::BadRequest("Missing 'state' parameter".to_string()))?;

    let pending = state.states.consume(&csrf_state).ok_or_else(|| {
        warn!("Invalid or expired OAuth state");
        ApiError::Unauthorized("Invalid or expired OAuth state (possible CSRF attack)".to_string())
    })?;
    let subject = pending.subject_id;

    debug!(subject = %subject, "Exchanging authorization code for token");
    let grant = state
        .endpoint
        .exchange_code(&code, &state.redirect_uri())
        .await
        .map_err(|e| {
            error!(subject = %subject, error = %e, "Token exchange failed");
            ApiError::BadGateway(format!("Failed to exchange authorization code: {}", e))
        })?;

    let credential = state.gateway.tokens().set_credential(&subject, grant).await?;

    // Data cached under a previous connection may belong to another account
    state.gateway.invalidate_subject(&subject).await?;

    info!(
        subject = %subject,
        refreshable = credential.refreshable,
        "OAuth flow completed successfully"
    );

    Ok(Json(OAuthSuccessResponse {
        success: true,
        message: "Successfully connected".to_string(),
        credential,
    }))
}

/// GET /api/oauth/status
async fn oauth_status(
    State(state): State<Arc<OAuthAppState>>,
    headers: HeaderMap,
) -> Result<Json<ConnectionStatus>, ApiError> {
    let subject = extract_subject(&headers)?;
    let credential = state.gateway.tokens().status(&subject).await?;

    Ok(Json(ConnectionStatus {
        connected: credential.is_some(),
        credential,
    }))
}

/// DELETE /api/oauth/connection
///
/// Forgets the credential and everything cached for the subject.
async fn oauth_disconnect(
    State(state): State<Arc<OAuthAppState>>,
    headers: HeaderMap,
) -> Result<Json<DisconnectResponse>, ApiError> {
    let subject = extract_subject(&headers)?;

    let disconnected = state.gateway.tokens().disconnect(&subject).await?;
    let cache_entries_removed = state.gateway.invalidate_subject(&subject).await?;

    Ok(Json(DisconnectResponse {
        disconnected,
        cache_entries_removed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oauth_callback_deserialization() {
        let query = "code=auth_code_123&state=csrf_state_456";
        let callback: OAuthCallback = serde_urlencoded::from_str(query).unwrap();
        assert_eq!(callback.code, Some("auth_code_123".to_string()));
        assert_eq!(callback.state, Some("csrf_state_456".to_string()));
        assert_eq!(callback.error, None);

        let query = "error=access_denied&error_description=User+cancelled";
        let callback: OAuthCallback = serde_urlencoded::from_str(query).unwrap();
        assert_eq!(callback.error, Some("access_denied".to_string()));
        assert_eq!(callback.error_description, Some("User cancelled".to_string()));
        assert_eq!(callback.code, None);
    }

    #[test]
    fn test_connection_status_serialization() {
        let json = serde_json::to_value(ConnectionStatus {
            connected: false,
            credential: None,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"connected": false}));
    }
}
