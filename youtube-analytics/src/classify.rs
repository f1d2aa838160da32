//! Mapping of Google API failures onto [`GatewayError`].
//!
//! This is the only place upstream responses are inspected; everything above
//! it branches on the error kind.
//!
//! | Response                                          | Kind               |
//! |---------------------------------------------------|--------------------|
//! | reason `quotaExceeded` / `dailyLimitExceeded`     | QuotaExceeded      |
//! | HTTP 401                                          | Unauthorized       |
//! | reason `rateLimitExceeded`, `userRateLimitExceeded`, `backendError` | TransientUpstream |
//! | HTTP 429, any 5xx, transport failure              | TransientUpstream  |
//! | any other 4xx                                     | UpstreamRejected   |

use apigate::GatewayError;
use serde::Deserialize;

const QUOTA_REASONS: &[&str] = &["quotaExceeded", "dailyLimitExceeded"];
const TRANSIENT_REASONS: &[&str] = &["rateLimitExceeded", "userRateLimitExceeded", "backendError"];

/// `{"error": {"code": 403, "message": "...", "errors": [{"reason": "..."}]}}`
#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<GoogleErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorDetail {
    #[serde(default)]
    reason: String,
}

/// Classify a non-2xx response from its status and raw body.
pub fn classify_response(status: u16, body: &str) -> GatewayError {
    let parsed = serde_json::from_str::<GoogleErrorBody>(body).ok();
    let reasons: Vec<&str> = parsed
        .as_ref()
        .map(|b| b.error.errors.iter().map(|e| e.reason.as_str()).collect())
        .unwrap_or_default();
    let message = match parsed.as_ref() {
        Some(b) if !b.error.message.is_empty() => b.error.message.clone(),
        _ => truncate(body),
    };

    if reasons.iter().any(|r| QUOTA_REASONS.contains(r)) {
        return GatewayError::QuotaExceeded { message };
    }
    if status == 401 {
        return GatewayError::Unauthorized { message };
    }
    if status == 429 || status >= 500 || reasons.iter().any(|r| TRANSIENT_REASONS.contains(r)) {
        return GatewayError::TransientUpstream {
            status: Some(status),
            message,
        };
    }
    GatewayError::UpstreamRejected { status, message }
}

/// Classify a failure that produced no usable HTTP response.
pub fn classify_transport(err: &reqwest::Error) -> GatewayError {
    GatewayError::TransientUpstream {
        status: err.status().map(|s| s.as_u16()),
        message: format!("request failed: {}", err),
    }
}

/// A 2xx whose body does not match the expected schema.
pub fn malformed_body(status: u16, err: impl std::fmt::Display) -> GatewayError {
    GatewayError::UpstreamRejected {
        status,
        message: format!("unexpected response body: {}", err),
    }
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 200;
    match body.char_indices().nth(LIMIT) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigate::ErrorKind;

    fn google_error(code: u16, reason: &str) -> String {
        format!(
            r#"{{"error": {{"code": {code}, "message": "{reason} happened", "errors": [{{"domain": "youtube.quota", "reason": "{reason}", "message": "x"}}]}}}}"#
        )
    }

    #[test]
    fn test_quota_reasons() {
        for reason in ["quotaExceeded", "dailyLimitExceeded"] {
            let err = classify_response(403, &google_error(403, reason));
            assert_eq!(err.kind(), ErrorKind::QuotaExceeded, "reason {}", reason);
            assert!(err.to_string().contains("happened"));
        }
    }

    #[test]
    fn test_unauthorized() {
        let err = classify_response(401, &google_error(401, "authError"));
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn test_rate_limit_reason_is_transient() {
        let err = classify_response(403, &google_error(403, "rateLimitExceeded"));
        assert_eq!(err.kind(), ErrorKind::TransientUpstream);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_server_errors_are_transient() {
        for status in [429, 500, 503] {
            assert_eq!(
                classify_response(status, "oops").kind(),
                ErrorKind::TransientUpstream,
                "status {}",
                status
            );
        }
    }

    #[test]
    fn test_other_client_errors_are_rejected() {
        let err = classify_response(403, &google_error(403, "forbidden"));
        assert_eq!(err.kind(), ErrorKind::UpstreamRejected);

        match classify_response(404, "<html>not found</html>") {
            GatewayError::UpstreamRejected { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "<html>not found</html>");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "x".repeat(500);
        let err = classify_response(400, &body);
        assert!(err.to_string().len() < 300);
    }
}
