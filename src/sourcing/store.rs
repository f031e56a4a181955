//! Key/value stores backing the cache and quota ledger

use crate::error::{Result, ValuationError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::info;

/// Persistent string store with optional per-key expiry.
/// `increment` must be atomic per key.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Add `by` to an integer value (missing or expired counts as 0).
    /// `ttl` only applies when the key is created.
    async fn increment(&self, key: &str, by: i64, ttl: Option<Duration>) -> Result<i64>;

    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredValue {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process store, for single-instance deployments and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;

        match entries.get(key) {
            Some(stored) if stored.is_live(now) => Ok(Some(stored.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|t| Utc::now() + t);
        self.entries.lock().await.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn increment(&self, key: &str, by: i64, ttl: Option<Duration>) -> Result<i64> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;

        let (current, expires_at) = match entries.get(key) {
            Some(stored) if stored.is_live(now) => {
                let current = stored.value.parse::<i64>().map_err(|_| {
                    ValuationError::Store(format!("{} holds a non-integer value", key))
                })?;
                (current, stored.expires_at)
            }
            _ => (0, ttl.map(|t| now + t)),
        };

        let next = current + by;
        entries.insert(
            key.to_string(),
            StoredValue {
                value: next.to_string(),
                expires_at,
            },
        );

        Ok(next)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// PostgreSQL-backed store shared across server instances
#[derive(Debug, Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create the backing table if it doesn't exist yet
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        info!("kv_store table ready");
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for PgStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(
            r#"
            SELECT value FROM kv_store
            WHERE key = $1 AND (expires_at IS NULL OR expires_at > NOW())
            "#,
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await?;

        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|t| Utc::now() + t);

        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn increment(&self, key: &str, by: i64, ttl: Option<Duration>) -> Result<i64> {
        let expires_at = ttl.map(|t| Utc::now() + t);

        // Single statement, so concurrent increments never lose updates.
        // An expired row restarts from zero with a fresh expiry.
        let value = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO kv_store (key, value, expires_at)
            VALUES ($1, ($2::BIGINT)::TEXT, $3)
            ON CONFLICT (key) DO UPDATE SET
                value = (
                    CASE WHEN kv_store.expires_at IS NOT NULL AND kv_store.expires_at <= NOW()
                         THEN 0
                         ELSE kv_store.value::BIGINT
                    END + $2::BIGINT
                )::TEXT,
                expires_at = CASE
                    WHEN kv_store.expires_at IS NOT NULL AND kv_store.expires_at <= NOW()
                        THEN EXCLUDED.expires_at
                    ELSE COALESCE(kv_store.expires_at, EXCLUDED.expires_at)
                END
            RETURNING value::BIGINT
            "#,
        )
        .bind(key)
        .bind(by)
        .bind(expires_at)
        .fetch_one(&self.db)
        .await?;

        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = $1")
            .bind(key)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}
