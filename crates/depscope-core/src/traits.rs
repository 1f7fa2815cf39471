//! Trait seams between the pipeline loops and their external resources.
//!
//! The loops in `depscope-jobs` depend only on these traits; the Postgres
//! implementations live in `depscope-db`, and tests substitute in-memory
//! versions.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::component::Component;
use crate::error::Result;
use crate::metadata::MetadataTier;

/// A message received from a work queue.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    /// Opaque handle used to delete the message.
    pub id: Uuid,
    /// UTF-8 JSON payload.
    pub body: String,
    /// Number of times the message has been received, this receipt included.
    pub dequeue_count: i32,
}

/// At-least-once delivery work queue.
///
/// A received-but-undeleted message becomes visible again once its
/// visibility timeout lapses, and its dequeue count increments on each
/// redelivery. Delete is idempotent: deleting an already-deleted message
/// is a logged no-op, not an error.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Enqueue a message body; returns its opaque handle.
    async fn send(&self, body: &str) -> Result<Uuid>;

    /// Receive at most one message, hiding it from other consumers for
    /// `visibility_timeout`. `Ok(None)` means the queue is empty.
    async fn receive_one(&self, visibility_timeout: Duration) -> Result<Option<QueuedMessage>>;

    /// Acknowledge (remove) a previously received message.
    async fn delete(&self, message: &QueuedMessage) -> Result<()>;
}

/// Store of tracked components and their tiered metadata.
///
/// This is also the metadata read/write API exposed to collaborators
/// outside the pipeline (web views, REST endpoints).
#[async_trait]
pub trait ComponentRepository: Send + Sync {
    /// Fetch a component by its coordinate.
    async fn get(&self, purl: &str) -> Result<Option<Component>>;

    /// Fetch-or-create a component by its coordinate (idempotent).
    async fn ensure(&self, purl: &str) -> Result<Component>;

    /// Coordinates of every tracked component.
    async fn list_purls(&self) -> Result<Vec<String>>;

    /// Precedence-resolved metadata value (any tier when `tier` is `None`).
    async fn get_metadata(
        &self,
        purl: &str,
        key: &str,
        tier: Option<MetadataTier>,
    ) -> Result<Option<JsonValue>>;

    /// Expiration of the record at (tier, key), if any.
    async fn get_expiration(
        &self,
        purl: &str,
        key: &str,
        tier: Option<MetadataTier>,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Atomically replace the record at (tier, key).
    ///
    /// Returns `false` without writing when `value` is JSON `null`
    /// (a null write is a no-op, never a delete).
    async fn set_metadata(
        &self,
        purl: &str,
        tier: MetadataTier,
        key: &str,
        value: JsonValue,
        lifetime: Option<chrono::Duration>,
    ) -> Result<bool>;
}

/// Best-effort TTL'd marker cache for in-flight (component, job) pairs.
///
/// Not transactionally linked to the queue: treat it as an optimization
/// that bounds duplicate requests, never as an exactly-once guarantee.
#[async_trait]
pub trait DedupCache: Send + Sync {
    /// The live (unexpired) value for a key, if any.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a key with a TTL, replacing any prior entry.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}
