use super::{CacheHit, CacheKey, ResponseCache};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Durable cache tier in SQLite.
///
/// Timestamps are wall-clock milliseconds so entries stay meaningful across
/// restarts and across processes sharing the file. Statements run on the
/// blocking pool.
pub struct SqliteCache {
    conn: Arc<Mutex<Connection>>,
    ttl: Duration,
}

impl SqliteCache {
    pub fn open<P: AsRef<Path>>(db_path: P, ttl: Duration) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open cache database")?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS response_cache (
                cache_key TEXT PRIMARY KEY,
                subject_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                stored_at_ms INTEGER NOT NULL
            )
            "#,
            [],
        )
        .context("Failed to create response_cache table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_response_cache_subject ON response_cache(subject_id)",
            [],
        )
        .context("Failed to create index")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            ttl,
        })
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| anyhow!("Cache database lock poisoned"))?;
            op(&conn)
        })
        .await
        .context("Cache database task failed")?
    }

    fn ttl_ms(&self) -> i64 {
        i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX)
    }

    async fn upsert(&self, key: &CacheKey, value: &Value, stored_at_ms: i64) -> Result<()> {
        let payload = serde_json::to_string(value).context("Failed to serialize cache payload")?;
        let cache_key = key.as_str().to_string();
        let subject = key.subject().to_string();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO response_cache (cache_key, subject_id, payload, stored_at_ms)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(cache_key) DO UPDATE SET
                    subject_id = excluded.subject_id,
                    payload = excluded.payload,
                    stored_at_ms = excluded.stored_at_ms
                "#,
                params![cache_key, subject, payload, stored_at_ms],
            )
            .context("Failed to store cache entry")?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ResponseCache for SqliteCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheHit>> {
        let cache_key = key.as_str().to_string();
        let row: Option<(String, i64)> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT payload, stored_at_ms FROM response_cache WHERE cache_key = ?1",
                    params![cache_key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .context("Failed to read cache entry")
            })
            .await?;

        let Some((payload, stored_at_ms)) = row else {
            return Ok(None);
        };

        let age_ms = (Utc::now().timestamp_millis() - stored_at_ms).max(0);
        if age_ms >= self.ttl_ms() {
            return Ok(None);
        }

        let value = serde_json::from_str(&payload).context("Corrupt cache payload")?;
        Ok(Some(CacheHit {
            value,
            age: Duration::from_millis(age_ms as u64),
        }))
    }

    async fn set(&self, key: &CacheKey, value: Value) -> Result<()> {
        self.upsert(key, &value, Utc::now().timestamp_millis()).await
    }

    async fn backfill(&self, key: &CacheKey, value: Value, age: Duration) -> Result<()> {
        let age_ms = i64::try_from(age.as_millis()).unwrap_or(i64::MAX);
        let stored_at_ms = Utc::now().timestamp_millis().saturating_sub(age_ms);
        self.upsert(key, &value, stored_at_ms).await
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<()> {
        let cache_key = key.as_str().to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM response_cache WHERE cache_key = ?1",
                params![cache_key],
            )
            .context("Failed to delete cache entry")?;
            Ok(())
        })
        .await
    }

    async fn invalidate_subject(&self, subject: &str) -> Result<usize> {
        let subject = subject.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM response_cache WHERE subject_id = ?1",
                params![subject],
            )
            .context("Failed to delete subject cache entries")
        })
        .await
    }

    async fn sweep_expired(&self) -> Result<usize> {
        let cutoff = Utc::now().timestamp_millis().saturating_sub(self.ttl_ms());
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM response_cache WHERE stored_at_ms <= ?1",
                params![cutoff],
            )
            .context("Failed to sweep cache entries")
        })
        .await
    }
}
