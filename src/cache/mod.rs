//! Response cache with TTL.
//!
//! ```text
//!   Gateway ──get/set──▶ TieredCache
//!                          │  fast tier first
//!                          ▼
//!                       MemoryCache  (bounded, per process)
//!                          │  miss
//!                          ▼
//!                       SqliteCache  (durable, shared across processes)
//! ```
//!
//! An entry is served strictly while `now - stored_at < ttl`. Expired entries
//! read as missing and are evicted lazily or by [`run_cache_sweeper`].

mod memory;
mod sqlite;
mod tiered;

pub use memory::MemoryCache;
pub use sqlite::SqliteCache;
pub use tiered::TieredCache;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A logical upstream query: endpoint name plus parameters.
///
/// Parameters live in a sorted map, so insertion order never changes the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalKey {
    endpoint: String,
    params: BTreeMap<String, String>,
}

impl LogicalKey {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Fully qualified cache key for one subject's logical query.
///
/// Rendered as `subject:endpoint:k=v&k=v` with every component
/// percent-encoded, so separators inside a component cannot make two
/// distinct queries collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    subject: String,
    rendered: String,
}

impl CacheKey {
    pub fn new(subject: &str, logical: &LogicalKey) -> Self {
        let params = logical
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        Self {
            subject: subject.to_string(),
            rendered: format!(
                "{}:{}:{}",
                urlencoding::encode(subject),
                urlencoding::encode(&logical.endpoint),
                params
            ),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

/// A cache hit and how long ago it was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub value: Value,
    pub age: Duration,
}

/// Key → JSON payload store with a TTL.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Live entry for `key`; expired entries are reported as missing.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheHit>>;

    /// Unconditional upsert with `stored_at = now`.
    async fn set(&self, key: &CacheKey, value: Value) -> Result<()>;

    /// Upsert an entry that is already `age` old. Used when one tier fills
    /// another so the copy does not outlive the original.
    async fn backfill(&self, key: &CacheKey, value: Value, age: Duration) -> Result<()> {
        let _ = age;
        self.set(key, value).await
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<()>;

    /// Drop every entry belonging to `subject`. Returns the number removed.
    async fn invalidate_subject(&self, subject: &str) -> Result<usize>;

    /// Evict expired entries. Returns the number removed.
    async fn sweep_expired(&self) -> Result<usize>;
}

/// Background task that evicts expired entries every `interval`.
pub async fn run_cache_sweeper(cache: Arc<dyn ResponseCache>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;
        match cache.sweep_expired().await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "Swept expired cache entries"),
            Err(e) => tracing::warn!(error = %e, "Cache sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_order_does_not_matter() {
        let a = LogicalKey::new("videos").param("maxResults", 10).param("order", "date");
        let b = LogicalKey::new("videos").param("order", "date").param("maxResults", 10);
        assert_eq!(CacheKey::new("u1", &a), CacheKey::new("u1", &b));
    }

    #[test]
    fn test_subjects_and_queries_do_not_collide() {
        let videos = LogicalKey::new("videos");
        assert_ne!(CacheKey::new("u1", &videos), CacheKey::new("u2", &videos));
        assert_ne!(
            CacheKey::new("u1", &videos),
            CacheKey::new("u1", &LogicalKey::new("channel"))
        );
        assert_ne!(
            CacheKey::new("u1", &videos.clone().param("max", 5)),
            CacheKey::new("u1", &videos.param("max", 50))
        );
    }

    #[test]
    fn test_separators_inside_components_are_escaped() {
        // "a:b" + "c" must not equal "a" + "b:c"
        let left = CacheKey::new("a:b", &LogicalKey::new("c"));
        let right = CacheKey::new("a", &LogicalKey::new("b:c"));
        assert_ne!(left, right);

        let left = CacheKey::new("u", &LogicalKey::new("e").param("k", "1&j=2"));
        let right = CacheKey::new("u", &LogicalKey::new("e").param("k", "1").param("j", "2"));
        assert_ne!(left, right);
    }

    #[test]
    fn test_rendered_form() {
        let key = CacheKey::new("user 1", &LogicalKey::new("analytics").param("end", "2024-01-31").param("start", "2024-01-01"));
        assert_eq!(key.as_str(), "user%201:analytics:end=2024-01-31&start=2024-01-01");
        assert_eq!(key.subject(), "user 1");
    }
}
