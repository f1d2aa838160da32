//! The single entry point consumers use for upstream calls.
//!
//! ```text
//! fetch_with_cache(subject, key, op)
//!   │
//!   ├─ RateLimiter::wait_and_acquire   (every call, hit or miss)
//!   ├─ ResponseCache::get              → hit: return, no token needed
//!   ├─ TokenManager::get_valid_token
//!   ├─ RetryPolicy::execute(op(token))
//!   │     └─ Unauthorized → refresh_rejected → one more pass
//!   └─ ResponseCache::set              → return
//! ```

use crate::cache::{
    run_cache_sweeper, CacheKey, LogicalKey, MemoryCache, ResponseCache, SqliteCache, TieredCache,
};
use crate::config::GatewayConfig;
use crate::credentials::CredentialStore;
use crate::error::GatewayError;
use crate::oauth::TokenEndpoint;
use crate::rate_limit::{run_window_sweeper, RateLimiter};
use crate::retry::RetryPolicy;
use crate::token::{BearerToken, TokenManager};
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Rate-limited, cached, token-managed access to the upstream API.
///
/// Cheap to clone; all components are shared.
#[derive(Clone)]
pub struct Gateway {
    limiter: Arc<RateLimiter>,
    cache: Arc<dyn ResponseCache>,
    tokens: Arc<TokenManager>,
    retry: RetryPolicy,
    /// `Some(ZERO)` in fail-fast mode
    acquire_deadline: Option<Duration>,
}

impl Gateway {
    pub fn new(
        limiter: Arc<RateLimiter>,
        cache: Arc<dyn ResponseCache>,
        tokens: Arc<TokenManager>,
        retry: RetryPolicy,
        acquire_deadline: Option<Duration>,
    ) -> Self {
        Self {
            limiter,
            cache,
            tokens,
            retry,
            acquire_deadline,
        }
    }

    /// Wire every component from configuration.
    ///
    /// With `cache.durable` the in-process tier is backed by a SQLite tier in
    /// `storage.database_path`.
    pub fn from_config(
        config: &GatewayConfig,
        store: Arc<dyn CredentialStore>,
        endpoint: Arc<dyn TokenEndpoint>,
    ) -> anyhow::Result<Self> {
        let ttl = config.cache.ttl();
        let fast: Arc<dyn ResponseCache> = Arc::new(MemoryCache::new(ttl, config.cache.max_entries));
        let cache: Arc<dyn ResponseCache> = if config.cache.durable {
            let durable = SqliteCache::open(&config.storage.database_path, ttl)
                .context("Failed to open durable cache tier")?;
            Arc::new(TieredCache::new(fast, Arc::new(durable)))
        } else {
            fast
        };

        let acquire_deadline = Some(config.rate_limit.acquire_deadline());

        info!(
            max_requests = config.rate_limit.max_requests,
            window_ms = config.rate_limit.window_ms,
            mode = ?config.rate_limit.mode,
            cache_ttl_seconds = config.cache.ttl_seconds,
            durable_cache = config.cache.durable,
            max_attempts = config.retry.max_attempts,
            "Gateway configured"
        );

        Ok(Self::new(
            Arc::new(RateLimiter::from_config(&config.rate_limit)),
            cache,
            Arc::new(TokenManager::new(store, endpoint, &config.token)),
            RetryPolicy::from_config(&config.retry),
            acquire_deadline,
        ))
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Fetch `logical` for `subject`, serving from cache when possible.
    ///
    /// `operation` is the upstream call. It receives a valid bearer token and
    /// must classify its own failures; they are propagated unchanged except
    /// that a repeated `Unauthorized` becomes `AuthExpired`.
    pub async fn fetch_with_cache<T, F, Fut>(
        &self,
        subject: &str,
        logical: &LogicalKey,
        operation: F,
    ) -> Result<T, GatewayError>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(BearerToken) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        self.limiter
            .wait_and_acquire(subject, self.acquire_deadline)
            .await?;

        let key = CacheKey::new(subject, logical);
        if let Some(value) = self.cached(&key).await {
            return Ok(value);
        }

        let token = self.tokens.get_valid_token(subject).await?;
        let value = match self.call_upstream(&token, &operation).await {
            Err(GatewayError::Unauthorized { message }) => {
                warn!(
                    subject = %subject,
                    endpoint = %logical.endpoint(),
                    reason = %message,
                    "Upstream rejected access token, refreshing"
                );
                let rotated = self.tokens.refresh_rejected(subject, &token).await?;
                match self.call_upstream(&rotated, &operation).await {
                    Err(GatewayError::Unauthorized { message }) => {
                        warn!(
                            subject = %subject,
                            reason = %message,
                            "Refreshed token rejected as well, discarding credential"
                        );
                        self.tokens.disconnect(subject).await?;
                        return Err(GatewayError::auth_expired(subject));
                    }
                    other => other?,
                }
            }
            other => other?,
        };

        self.store(&key, &value).await;
        Ok(value)
    }

    /// Drop one cached query for `subject`.
    pub async fn invalidate(&self, subject: &str, logical: &LogicalKey) -> Result<(), GatewayError> {
        self.cache.invalidate(&CacheKey::new(subject, logical)).await?;
        Ok(())
    }

    /// Drop every cached query for `subject`.
    pub async fn invalidate_subject(&self, subject: &str) -> Result<usize, GatewayError> {
        let removed = self.cache.invalidate_subject(subject).await?;
        debug!(subject = %subject, removed, "Invalidated cached responses");
        Ok(removed)
    }

    /// Start the cache and rate-window sweepers.
    pub fn spawn_sweepers(
        &self,
        cache_interval: Duration,
        window_interval: Duration,
    ) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(run_cache_sweeper(self.cache.clone(), cache_interval)),
            tokio::spawn(run_window_sweeper(self.limiter.clone(), window_interval)),
        ]
    }

    async fn call_upstream<T, F, Fut>(
        &self,
        token: &BearerToken,
        operation: &F,
    ) -> Result<T, GatewayError>
    where
        F: Fn(BearerToken) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        self.retry.execute(|_| operation(token.clone())).await
    }

    /// Cache problems never fail a request; they read as a miss.
    async fn cached<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        match self.cache.get(key).await {
            Ok(Some(hit)) => match serde_json::from_value(hit.value) {
                Ok(value) => {
                    debug!(key = %key, age_ms = hit.age.as_millis() as u64, "Cache hit");
                    Some(value)
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Cached payload has unexpected shape, refetching");
                    None
                }
            },
            Ok(None) => {
                debug!(key = %key, "Cache miss");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn store<T: Serialize>(&self, key: &CacheKey, value: &T) {
        let json = match serde_json::to_value(value) {
            Ok(json) => json,
            Err(e) => {
                warn!(key = %key, error = %e, "Response not cacheable");
                return;
            }
        };
        if let Err(e) = self.cache.set(key, json).await {
            warn!(key = %key, error = %e, "Cache write failed");
        }
    }
}
