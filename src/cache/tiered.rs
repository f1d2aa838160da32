use super::{CacheHit, CacheKey, ResponseCache};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Fast tier in front of a durable tier.
///
/// Reads try the fast tier, then the durable tier; a durable hit is copied
/// into the fast tier with its original age. Writes go to both. A failing
/// fast tier is logged and bypassed; durable-tier errors propagate.
pub struct TieredCache {
    fast: Arc<dyn ResponseCache>,
    durable: Arc<dyn ResponseCache>,
}

impl TieredCache {
    pub fn new(fast: Arc<dyn ResponseCache>, durable: Arc<dyn ResponseCache>) -> Self {
        Self { fast, durable }
    }
}

#[async_trait]
impl ResponseCache for TieredCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheHit>> {
        match self.fast.get(key).await {
            Ok(Some(hit)) => return Ok(Some(hit)),
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "Fast cache tier read failed"),
        }

        let Some(hit) = self.durable.get(key).await? else {
            return Ok(None);
        };

        debug!(key = %key, "Durable cache hit, populating fast tier");
        if let Err(e) = self.fast.backfill(key, hit.value.clone(), hit.age).await {
            warn!(key = %key, error = %e, "Fast cache tier backfill failed");
        }
        Ok(Some(hit))
    }

    async fn set(&self, key: &CacheKey, value: Value) -> Result<()> {
        if let Err(e) = self.fast.set(key, value.clone()).await {
            warn!(key = %key, error = %e, "Fast cache tier write failed");
        }
        self.durable.set(key, value).await
    }

    async fn backfill(&self, key: &CacheKey, value: Value, age: Duration) -> Result<()> {
        if let Err(e) = self.fast.backfill(key, value.clone(), age).await {
            warn!(key = %key, error = %e, "Fast cache tier write failed");
        }
        self.durable.backfill(key, value, age).await
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<()> {
        self.fast.invalidate(key).await?;
        self.durable.invalidate(key).await
    }

    async fn invalidate_subject(&self, subject: &str) -> Result<usize> {
        let fast = self.fast.invalidate_subject(subject).await?;
        let durable = self.durable.invalidate_subject(subject).await?;
        Ok(fast.max(durable))
    }

    async fn sweep_expired(&self) -> Result<usize> {
        let fast = self.fast.sweep_expired().await?;
        let durable = self.durable.sweep_expired().await?;
        Ok(fast + durable)
    }
}
