//! At-least-once work queue on PostgreSQL.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use depscope_core::{Error, QueuedMessage, Result, WorkQueue};

/// PostgreSQL implementation of [`WorkQueue`].
///
/// All logical queues share one `work_queue` table, keyed by queue name,
/// so "creating" a queue is idempotent by construction. A receive claims
/// the oldest visible row with `FOR UPDATE SKIP LOCKED` and pushes its
/// `visible_at` past the visibility timeout in the same statement, which
/// is what lets multiple workers share a queue safely.
#[derive(Clone)]
pub struct PgWorkQueue {
    pool: PgPool,
    name: String,
}

impl PgWorkQueue {
    pub fn new(pool: PgPool, name: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
        }
    }

    /// The logical queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of messages currently visible on this queue.
    pub async fn visible_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM work_queue WHERE queue = $1 AND visible_at <= $2",
        )
        .bind(&self.name)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count)
    }
}

#[async_trait]
impl WorkQueue for PgWorkQueue {
    async fn send(&self, body: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO work_queue (id, queue, body, visible_at, enqueued_at)
             VALUES ($1, $2, $3, $4, $4)",
        )
        .bind(id)
        .bind(&self.name)
        .bind(body)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(id)
    }

    async fn receive_one(&self, visibility_timeout: Duration) -> Result<Option<QueuedMessage>> {
        let now = Utc::now();
        let hidden_until = now
            + chrono::Duration::from_std(visibility_timeout)
                .map_err(|e| Error::InvalidInput(format!("Visibility timeout out of range: {e}")))?;

        let row = sqlx::query(
            "UPDATE work_queue
             SET visible_at = $2, dequeue_count = dequeue_count + 1
             WHERE id = (
                 SELECT id FROM work_queue
                 WHERE queue = $1 AND visible_at <= $3
                 ORDER BY enqueued_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, body, dequeue_count",
        )
        .bind(&self.name)
        .bind(hidden_until)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| QueuedMessage {
            id: row.get("id"),
            body: row.get("body"),
            dequeue_count: row.get("dequeue_count"),
        }))
    }

    async fn delete(&self, message: &QueuedMessage) -> Result<()> {
        let result = sqlx::query("DELETE FROM work_queue WHERE id = $1")
            .bind(message.id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            // Already acknowledged by an earlier success in the same pass.
            debug!(
                subsystem = "queue",
                message_id = %message.id,
                queue = %self.name,
                "Delete was a no-op; message already removed"
            );
        }
        Ok(())
    }
}
