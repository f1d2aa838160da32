//! Form-encoded token endpoint client.

use super::{OAuthError, OAuthProviderConfig, TokenEndpoint, TokenGrant};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Error body defined by RFC 6749 §5.2
#[derive(Deserialize)]
struct TokenErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// [`TokenEndpoint`] speaking HTTP+JSON to the provider's token URL.
pub struct HttpTokenEndpoint {
    http_client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl HttpTokenEndpoint {
    pub fn new(provider: &OAuthProviderConfig) -> Self {
        Self::with_client(provider, reqwest::Client::new())
    }

    pub fn with_client(provider: &OAuthProviderConfig, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            token_url: provider.token_url.clone(),
            client_id: provider.client_id.clone(),
            client_secret: provider.client_secret.clone(),
        }
    }

    async fn post_form(&self, form: &[(&str, &str)]) -> Result<TokenGrant, OAuthError> {
        let response = self
            .http_client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .timeout(Duration::from_secs(15))
            .form(form)
            .send()
            .await
            .map_err(|e| OAuthError::Transient(format!("Failed to reach token endpoint: {}", e)))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthError::Transient(format!("status {}: {}", status, body)));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = match serde_json::from_str::<TokenErrorBody>(&body) {
                Ok(parsed) => {
                    debug!(
                        error = %parsed.error,
                        description = ?parsed.error_description,
                        "Token endpoint returned an OAuth error"
                    );
                    parsed.error
                }
                Err(_) => body,
            };
            return Err(OAuthError::Rejected {
                status: status.as_u16(),
                error,
            });
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|e| OAuthError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant, OAuthError> {
        debug!(token_url = %self.token_url, "Exchanging authorization code for token");
        let grant = self
            .post_form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .await?;
        debug!(
            has_refresh_token = grant.refresh_token.is_some(),
            expires_in = ?grant.expires_in,
            "Token exchange successful"
        );
        Ok(grant)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, OAuthError> {
        self.post_form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ])
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn endpoint(server: &mockito::ServerGuard) -> HttpTokenEndpoint {
        HttpTokenEndpoint::new(&OAuthProviderConfig {
            auth_url: format!("{}/auth", server.url()),
            token_url: format!("{}/token", server.url()),
            scopes: vec!["read".to_string()],
            client_id: "cid".to_string(),
            client_secret: "csecret".to_string(),
        })
    }

    #[tokio::test]
    async fn test_exchange_code_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "abc".into()),
                Matcher::UrlEncoded("client_id".into(), "cid".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"at","refresh_token":"rt","expires_in":3600}"#)
            .create_async()
            .await;

        let grant = endpoint(&server)
            .exchange_code("abc", "http://localhost/cb")
            .await
            .unwrap();
        assert_eq!(grant.access_token, "at");
        assert_eq!(grant.refresh_token.as_deref(), Some("rt"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_invalid_grant_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#)
            .create_async()
            .await;

        let err = endpoint(&server).refresh("stale").await.unwrap_err();
        assert!(err.is_invalid_grant(), "got {:?}", err);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(503)
            .with_body("backend unavailable")
            .create_async()
            .await;

        let err = endpoint(&server).refresh("rt").await.unwrap_err();
        assert!(matches!(err, OAuthError::Transient(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_refresh_garbage_body_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body("<html>not json</html>")
            .create_async()
            .await;

        let err = endpoint(&server).refresh("rt").await.unwrap_err();
        assert!(matches!(err, OAuthError::Malformed(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let endpoint = HttpTokenEndpoint::new(&OAuthProviderConfig {
            auth_url: "http://127.0.0.1:9/auth".to_string(),
            token_url: "http://127.0.0.1:9/token".to_string(),
            scopes: vec![],
            client_id: "cid".to_string(),
            client_secret: "cs".to_string(),
        });

        let err = endpoint.refresh("rt").await.unwrap_err();
        assert!(matches!(err, OAuthError::Transient(_)), "got {:?}", err);
    }
}
