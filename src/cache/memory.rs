use super::{CacheHit, CacheKey, ResponseCache};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

struct MemoryEntry {
    subject: String,
    value: Value,
    stored_at: Instant,
}

/// Bounded in-process cache tier.
///
/// At capacity, expired entries are swept first; if the map is still full the
/// oldest entry is evicted.
pub struct MemoryCache {
    entries: DashMap<String, MemoryEntry>,
    ttl: Duration,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_live(&self, entry: &MemoryEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.stored_at) < self.ttl
    }

    fn insert(&self, key: &CacheKey, value: Value, stored_at: Instant) {
        if !self.entries.contains_key(key.as_str()) && self.entries.len() >= self.max_entries {
            self.make_room();
        }
        self.entries.insert(
            key.as_str().to_string(),
            MemoryEntry {
                subject: key.subject().to_string(),
                value,
                stored_at,
            },
        );
    }

    fn make_room(&self) {
        let now = Instant::now();
        self.entries.retain(|_, e| self.is_live(e, now));
        if self.entries.len() < self.max_entries {
            return;
        }

        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.stored_at)
            .map(|e| e.key().clone());
        if let Some(oldest) = oldest {
            self.entries.remove(&oldest);
        }
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheHit>> {
        let now = Instant::now();
        let hit = match self.entries.get(key.as_str()) {
            Some(entry) if self.is_live(&entry, now) => Some(CacheHit {
                value: entry.value.clone(),
                age: now.saturating_duration_since(entry.stored_at),
            }),
            Some(_) => None,
            None => return Ok(None),
        };

        if hit.is_none() {
            // Lazy eviction, unless a writer replaced it in the meantime
            self.entries
                .remove_if(key.as_str(), |_, e| !self.is_live(e, now));
        }
        Ok(hit)
    }

    async fn set(&self, key: &CacheKey, value: Value) -> Result<()> {
        self.insert(key, value, Instant::now());
        Ok(())
    }

    async fn backfill(&self, key: &CacheKey, value: Value, age: Duration) -> Result<()> {
        let now = Instant::now();
        let stored_at = now.checked_sub(age).unwrap_or(now);
        self.insert(key, value, stored_at);
        Ok(())
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<()> {
        self.entries.remove(key.as_str());
        Ok(())
    }

    async fn invalidate_subject(&self, subject: &str) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.subject != subject);
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn sweep_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| self.is_live(e, now));
        Ok(before.saturating_sub(self.entries.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LogicalKey;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(300);

    fn key(subject: &str, endpoint: &str) -> CacheKey {
        CacheKey::new(subject, &LogicalKey::new(endpoint))
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_returns_value_until_ttl_elapses() {
        let cache = MemoryCache::new(TTL, 100);
        let k = key("u1", "videos");
        cache.set(&k, json!({"items": [1, 2]})).await.unwrap();

        tokio::time::advance(TTL - Duration::from_millis(1)).await;
        let hit = cache.get(&k).await.unwrap().unwrap();
        assert_eq!(hit.value, json!({"items": [1, 2]}));
        assert_eq!(hit.age, TTL - Duration::from_millis(1));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.get(&k).await.unwrap().is_none());
        // Lazily evicted on read
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_overwrites_and_restarts_ttl() {
        let cache = MemoryCache::new(TTL, 100);
        let k = key("u1", "channel");
        cache.set(&k, json!(1)).await.unwrap();

        tokio::time::advance(TTL / 2).await;
        cache.set(&k, json!(2)).await.unwrap();
        tokio::time::advance(TTL / 2).await;

        let hit = cache.get(&k).await.unwrap().unwrap();
        assert_eq!(hit.value, json!(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest() {
        let cache = MemoryCache::new(TTL, 2);
        cache.set(&key("u1", "a"), json!("a")).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.set(&key("u1", "b"), json!("b")).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.set(&key("u1", "c"), json!("c")).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("u1", "a")).await.unwrap().is_none());
        assert!(cache.get(&key("u1", "b")).await.unwrap().is_some());
        assert!(cache.get(&key("u1", "c")).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_prefers_sweeping_expired() {
        let cache = MemoryCache::new(Duration::from_secs(10), 2);
        cache.set(&key("u1", "stale"), json!(0)).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.set(&key("u1", "young"), json!(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;

        cache.set(&key("u1", "new"), json!(2)).await.unwrap();
        assert!(cache.get(&key("u1", "young")).await.unwrap().is_some());
        assert!(cache.get(&key("u1", "new")).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backfill_keeps_original_age() {
        let cache = MemoryCache::new(Duration::from_secs(10), 10);
        let k = key("u1", "videos");
        cache
            .backfill(&k, json!("v"), Duration::from_secs(9))
            .await
            .unwrap();
        assert!(cache.get(&k).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(&k).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_subject() {
        let cache = MemoryCache::new(TTL, 10);
        cache.set(&key("u1", "a"), json!(1)).await.unwrap();
        cache.set(&key("u1", "b"), json!(2)).await.unwrap();
        cache.set(&key("u2", "a"), json!(3)).await.unwrap();

        assert_eq!(cache.invalidate_subject("u1").await.unwrap(), 2);
        assert!(cache.get(&key("u2", "a")).await.unwrap().is_some());

        cache.invalidate(&key("u2", "a")).await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expired() {
        let cache = MemoryCache::new(Duration::from_secs(5), 10);
        cache.set(&key("u1", "a"), json!(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        cache.set(&key("u1", "b"), json!(2)).await.unwrap();

        assert_eq!(cache.sweep_expired().await.unwrap(), 1);
        assert_eq!(cache.len(), 1);
    }
}
