//! Error taxonomy for the access layer.
//!
//! Every failure that crosses a component boundary is a [`GatewayError`]. The
//! variant is chosen once, where the upstream response (or local condition) is
//! first observed, and is never re-derived from message text afterwards.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Discriminant of a [`GatewayError`], for consumers that only branch on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthExpired,
    QuotaExceeded,
    RateLimitTimeout,
    Unauthorized,
    TransientUpstream,
    UpstreamRejected,
    Timeout,
    Storage,
    Config,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Stored credential is gone or permanently invalid. The consumer must
    /// send the user through the OAuth flow again.
    #[error("credentials for subject '{subject}' are no longer valid, re-authentication required")]
    AuthExpired { subject: String },

    /// Upstream quota is exhausted. Never retried here.
    #[error("upstream quota exceeded: {message}")]
    QuotaExceeded { message: String },

    /// The local rate limiter did not grant a slot before the caller's deadline.
    #[error("rate limit slot for subject '{subject}' not granted within {waited:?}")]
    RateLimitTimeout { subject: String, waited: Duration },

    /// Upstream rejected the access token (HTTP 401).
    #[error("upstream rejected the access token: {message}")]
    Unauthorized { message: String },

    /// Network failure, timeout or 5xx. Retried by the executor.
    #[error("transient upstream failure (status {status:?}): {message}")]
    TransientUpstream { status: Option<u16>, message: String },

    /// Permanent upstream rejection that is not an auth problem (bad request,
    /// not found, malformed payload).
    #[error("upstream rejected the request (status {status}): {message}")]
    UpstreamRejected { status: u16, message: String },

    /// The whole operation, retries included, exceeded its time budget.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::AuthExpired { .. } => ErrorKind::AuthExpired,
            GatewayError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            GatewayError::RateLimitTimeout { .. } => ErrorKind::RateLimitTimeout,
            GatewayError::Unauthorized { .. } => ErrorKind::Unauthorized,
            GatewayError::TransientUpstream { .. } => ErrorKind::TransientUpstream,
            GatewayError::UpstreamRejected { .. } => ErrorKind::UpstreamRejected,
            GatewayError::Timeout(_) => ErrorKind::Timeout,
            GatewayError::Storage(_) => ErrorKind::Storage,
            GatewayError::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether the retry executor may run the operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::TransientUpstream { .. })
    }

    pub fn auth_expired(subject: &str) -> Self {
        GatewayError::AuthExpired {
            subject: subject.to_string(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        GatewayError::TransientUpstream {
            status: None,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(err: anyhow::Error) -> Self {
        GatewayError::Storage(err)
    }
}
