// HTTP surface: OAuth connect routes and the error mapping shared by
// consumers' route handlers.

pub mod oauth;
mod subject;

pub use oauth::{create_oauth_router, OAuthAppState};
pub use subject::{extract_subject, SubjectError, SUBJECT_HEADER};

use crate::error::{ErrorKind, GatewayError};
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::error;

/// Seconds a client is told to wait after a local rate-limit rejection.
const RATE_LIMIT_RETRY_AFTER_SECS: &str = "60";

/// Upstream quotas reset on a daily boundary; an hour is a polite floor.
const QUOTA_RETRY_AFTER_SECS: &str = "3600";

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<ErrorKind>,
}

/// Errors returned by route handlers.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    BadGateway(String),
    ServerError(String),
    Gateway(GatewayError),
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError::Gateway(err)
    }
}

impl From<SubjectError> for ApiError {
    fn from(err: SubjectError) -> Self {
        ApiError::Unauthorized(format!("Invalid subject: {}", err))
    }
}

fn gateway_status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::AuthExpired | ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::QuotaExceeded | ErrorKind::RateLimitTimeout => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::TransientUpstream | ErrorKind::UpstreamRejected => StatusCode::BAD_GATEWAY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Storage | ErrorKind::Config => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, kind) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg, None),
            ApiError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, None),
            ApiError::Gateway(err) => {
                let kind = err.kind();
                let status = gateway_status(kind);
                if status.is_server_error() {
                    error!(kind = ?kind, error = %err, "Request failed");
                }
                (status, err.to_string(), Some(kind))
            }
        };

        let mut response = (status, Json(ErrorResponse { error, kind })).into_response();

        let retry_after = match kind {
            Some(ErrorKind::RateLimitTimeout) => Some(RATE_LIMIT_RETRY_AFTER_SECS),
            Some(ErrorKind::QuotaExceeded) => Some(QUOTA_RETRY_AFTER_SECS),
            _ => None,
        };
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static(secs));
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_gateway_error_status_mapping() {
        let cases = [
            (GatewayError::auth_expired("u1"), StatusCode::UNAUTHORIZED),
            (
                GatewayError::QuotaExceeded {
                    message: "quotaExceeded".to_string(),
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (GatewayError::transient("reset"), StatusCode::BAD_GATEWAY),
            (
                GatewayError::UpstreamRejected {
                    status: 404,
                    message: "videoNotFound".to_string(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (GatewayError::Timeout(Duration::from_secs(30)), StatusCode::GATEWAY_TIMEOUT),
            (
                GatewayError::Config("missing key".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }

    #[test]
    fn test_rate_limit_response_has_retry_after() {
        let response = ApiError::from(GatewayError::RateLimitTimeout {
            subject: "u1".to_string(),
            waited: Duration::ZERO,
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "60");
    }

    #[test]
    fn test_local_errors_have_no_retry_after() {
        let response = ApiError::BadRequest("missing code".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }
}
