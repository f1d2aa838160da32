//! Bounded retries with linear backoff.

use crate::config::RetryConfig;
use crate::error::GatewayError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy for one upstream operation.
///
/// Holds no mutable state: every [`RetryPolicy::execute`] call is independent.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Budget for the whole call, attempts and backoff included
    pub operation_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            operation_timeout: None,
        }
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        let policy = Self::new(config.max_attempts, Duration::from_millis(config.base_delay_ms));
        match config.operation_timeout_ms {
            0 => policy,
            ms => policy.with_operation_timeout(Duration::from_millis(ms)),
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or `max_attempts` is used up.
    ///
    /// `operation` receives the 1-based attempt number. After the last
    /// attempt its error is returned as is. When the overall timeout expires
    /// first the call fails with [`GatewayError::Timeout`].
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, GatewayError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        match self.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, self.run(&mut operation))
                .await
                .map_err(|_| {
                    warn!(timeout_ms = limit.as_millis() as u64, "Operation timed out");
                    GatewayError::Timeout(limit)
                })?,
            None => self.run(&mut operation).await,
        }
    }

    async fn run<T, F, Fut>(&self, operation: &mut F) -> Result<T, GatewayError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let last_error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !last_error.is_retryable() {
                debug!(attempt, error = %last_error, "Non-retryable failure");
                return Err(last_error);
            }

            if attempt >= max_attempts {
                warn!(
                    attempts = attempt,
                    error = %last_error,
                    "Retries exhausted"
                );
                return Err(last_error);
            }

            let delay = self.backoff(attempt);
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "Transient failure, will retry"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
