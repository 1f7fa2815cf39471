//! TTL'd dedup cache on PostgreSQL.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use depscope_core::{DedupCache, Error, Result};

/// PostgreSQL implementation of [`DedupCache`].
///
/// Expiry is a read-side filter (`expires_at > now()`); stale rows are
/// swept opportunistically via [`purge_expired`](Self::purge_expired)
/// rather than eagerly, since correctness never depends on their absence.
#[derive(Clone)]
pub struct PgDedupCache {
    pool: PgPool,
}

impl PgDedupCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Remove expired entries; returns how many were swept.
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM dedup_cache WHERE expires_at <= $1")
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DedupCache for PgDedupCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar(
            "SELECT value FROM dedup_cache WHERE cache_key = $1 AND expires_at > $2",
        )
        .bind(key)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|e| Error::InvalidInput(format!("TTL out of range: {e}")))?;

        sqlx::query(
            "INSERT INTO dedup_cache (cache_key, value, expires_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (cache_key)
             DO UPDATE SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}
