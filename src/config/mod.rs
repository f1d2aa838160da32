pub mod runtime;
pub use runtime::{apply_env_overrides, Secrets};

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Complete apigate configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
}

/// How the facade obtains a rate-limit slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquireMode {
    /// Suspend until a slot opens or `acquire_timeout_ms` elapses.
    Wait,
    /// Reject immediately when the window is exhausted.
    FailFast,
}

/// Fixed-window rate limit per subject
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_acquire_mode")]
    pub mode: AcquireMode,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

const MIN_POLL_INTERVAL_MS: u64 = 10;

fn default_max_requests() -> u64 {
    100
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_acquire_mode() -> AcquireMode {
    AcquireMode::Wait
}

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

impl GatewayConfig {
    /// Reject settings that would silently disable or spin a component.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.rate_limit.validate()
    }
}

impl RateLimitConfig {
    /// A zero window resets the counter on every call and a zero limit
    /// admits nothing; both are configuration mistakes.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_requests == 0 {
            anyhow::bail!("rate_limit.max_requests must be at least 1");
        }
        if self.window_ms == 0 {
            anyhow::bail!("rate_limit.window_ms must be at least 1");
        }
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            anyhow::bail!(
                "rate_limit.poll_interval_ms must be at least {}",
                MIN_POLL_INTERVAL_MS
            );
        }
        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Deadline handed to `wait_and_acquire`; zero in fail-fast mode.
    pub fn acquire_deadline(&self) -> Duration {
        match self.mode {
            AcquireMode::Wait => Duration::from_millis(self.acquire_timeout_ms),
            AcquireMode::FailFast => Duration::ZERO,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            mode: default_acquire_mode(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

/// Response cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    /// Upper bound on in-process entries
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Back the in-process tier with the SQLite tier
    #[serde(default = "default_durable")]
    pub durable: bool,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

fn default_ttl_seconds() -> u64 {
    300
}

fn default_max_entries() -> usize {
    10_000
}

fn default_durable() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    60
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
            max_entries: default_max_entries(),
            durable: default_durable(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

/// Token refresh configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// Refresh when the token expires within this many seconds
    #[serde(default = "default_refresh_skew")]
    pub refresh_skew_seconds: i64,
    /// Delay before the single retry of a transient refresh failure
    #[serde(default = "default_refresh_retry_delay")]
    pub refresh_retry_delay_ms: u64,
}

fn default_refresh_skew() -> i64 {
    60
}

fn default_refresh_retry_delay() -> u64 {
    500
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_skew_seconds: default_refresh_skew(),
            refresh_retry_delay_ms: default_refresh_retry_delay(),
        }
    }
}

/// Retry executor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Budget for the whole call including retries; 0 disables it
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    1_000
}

fn default_operation_timeout() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            operation_timeout_ms: default_operation_timeout(),
        }
    }
}

/// SQLite file holding credentials and the durable cache tier
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("apigate.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Public base URL used to build the OAuth redirect URI
    #[serde(default = "default_callback_base_url")]
    pub callback_base_url: String,
    /// Lifetime of an OAuth CSRF state (seconds)
    #[serde(default = "default_state_expiry")]
    pub oauth_state_expiry_seconds: i64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_callback_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_state_expiry() -> i64 {
    600
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            callback_base_url: default_callback_base_url(),
            oauth_state_expiry_seconds: default_state_expiry(),
        }
    }
}

/// OAuth endpoints and scopes. Client credentials come from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

fn default_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_scopes() -> Vec<String> {
    vec![
        "https://www.googleapis.com/auth/youtube.readonly".to_string(),
        "https://www.googleapis.com/auth/yt-analytics.readonly".to_string(),
    ]
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            scopes: default_scopes(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<GatewayConfig> {
    use anyhow::Context;

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: GatewayConfig = toml::from_str(&contents).context("Failed to parse config")?;
    Ok(config)
}
