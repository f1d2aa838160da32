use super::{AcquireMode, GatewayConfig};
use anyhow::{Context, Result};

/// Values that only ever come from the environment.
#[derive(Clone)]
pub struct Secrets {
    /// Base64-encoded 32-byte key for credential encryption
    pub encryption_key: String,
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
}

impl Secrets {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            encryption_key: std::env::var("APIGATE_ENCRYPTION_KEY")
                .context("APIGATE_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?,
            oauth_client_id: std::env::var("APIGATE_OAUTH_CLIENT_ID")
                .context("APIGATE_OAUTH_CLIENT_ID is required")?,
            oauth_client_secret: std::env::var("APIGATE_OAUTH_CLIENT_SECRET")
                .context("APIGATE_OAUTH_CLIENT_SECRET is required")?,
        })
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("oauth_client_id", &self.oauth_client_id)
            .finish_non_exhaustive()
    }
}

/// Apply `APIGATE_*` environment overrides on top of file/default values.
///
/// Unparseable values are ignored and the existing value kept.
pub fn apply_env_overrides(config: &mut GatewayConfig) {
    apply_overrides(config, |name| std::env::var(name).ok());
}

fn apply_overrides(config: &mut GatewayConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(n) = parsed(&var, "APIGATE_RATE_LIMIT_MAX_REQUESTS") {
        config.rate_limit.max_requests = n;
    }
    if let Some(n) = parsed(&var, "APIGATE_RATE_LIMIT_WINDOW_MS") {
        config.rate_limit.window_ms = n;
    }
    if let Some(v) = var("APIGATE_RATE_LIMIT_MODE") {
        match v.as_str() {
            "wait" => config.rate_limit.mode = AcquireMode::Wait,
            "fail_fast" => config.rate_limit.mode = AcquireMode::FailFast,
            other => tracing::warn!(value = %other, "Ignoring unknown APIGATE_RATE_LIMIT_MODE"),
        }
    }
    if let Some(n) = parsed(&var, "APIGATE_CACHE_TTL_SECONDS") {
        config.cache.ttl_seconds = n;
    }
    if let Some(b) = parsed(&var, "APIGATE_CACHE_DURABLE") {
        config.cache.durable = b;
    }
    if let Some(n) = parsed(&var, "APIGATE_RETRY_MAX_ATTEMPTS") {
        config.retry.max_attempts = n;
    }
    if let Some(v) = var("APIGATE_DATABASE_PATH") {
        config.storage.database_path = v.into();
    }
    if let Some(v) = var("APIGATE_BIND_ADDR") {
        config.server.bind_addr = v;
    }
    if let Some(v) = var("APIGATE_CALLBACK_BASE_URL") {
        config.server.callback_base_url = v;
    }
}

fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    var(name).and_then(|v| v.parse().ok())
}
