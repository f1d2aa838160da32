//! OAuth provider configuration.

use crate::config::{OAuthConfig, Secrets};

/// Endpoints, scopes and client credentials for the upstream provider.
#[derive(Clone)]
pub struct OAuthProviderConfig {
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub client_id: String,
    pub client_secret: String,
}

impl OAuthProviderConfig {
    pub fn from_config(config: &OAuthConfig, secrets: &Secrets) -> Self {
        Self {
            auth_url: config.auth_url.clone(),
            token_url: config.token_url.clone(),
            scopes: config.scopes.clone(),
            client_id: secrets.oauth_client_id.clone(),
            client_secret: secrets.oauth_client_secret.clone(),
        }
    }

    /// Build the consent URL. Offline access with a forced consent prompt
    /// makes the provider issue a refresh token on every authorization.
    pub fn build_auth_url(&self, state: &str, redirect_uri: &str) -> String {
        let scopes = self.scopes.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&scope={}&state={}&response_type=code&access_type=offline&prompt=consent&include_granted_scopes=true",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(state)
        )
    }
}

impl std::fmt::Debug for OAuthProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthProviderConfig")
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("scopes", &self.scopes)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}
