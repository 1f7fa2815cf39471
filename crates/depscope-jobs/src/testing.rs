//! In-memory trait implementations for exercising the pipeline loops
//! without Postgres. Visibility timeouts and dequeue counts behave like
//! the real queue so redelivery paths are testable.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use uuid::Uuid;

use depscope_core::{
    Component, ComponentRepository, DedupCache, Error, MetadataTier, PackageUrl, QueuedMessage,
    Result, WorkQueue,
};

struct StoredMessage {
    id: Uuid,
    body: String,
    dequeue_count: i32,
    visible_at: Instant,
}

/// In-memory [`WorkQueue`] with real visibility semantics.
#[derive(Default)]
pub struct InMemoryQueue {
    messages: Mutex<Vec<StoredMessage>>,
    fail_sends_containing: Mutex<Option<String>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn bodies(&self) -> Vec<String> {
        self.messages
            .lock()
            .await
            .iter()
            .map(|m| m.body.clone())
            .collect()
    }

    /// Collapse all pending visibility timeouts, as if they had elapsed.
    pub async fn make_all_visible(&self) {
        let now = Instant::now();
        for message in self.messages.lock().await.iter_mut() {
            message.visible_at = now;
        }
    }

    /// Inject a send failure for bodies containing `needle`.
    pub async fn fail_sends_containing(&self, needle: &str) {
        *self.fail_sends_containing.lock().await = Some(needle.to_string());
    }
}

#[async_trait]
impl WorkQueue for InMemoryQueue {
    async fn send(&self, body: &str) -> Result<Uuid> {
        if let Some(needle) = self.fail_sends_containing.lock().await.as_deref() {
            if body.contains(needle) {
                return Err(Error::Queue("injected send failure".to_string()));
            }
        }
        let id = Uuid::new_v4();
        self.messages.lock().await.push(StoredMessage {
            id,
            body: body.to_string(),
            dequeue_count: 0,
            visible_at: Instant::now(),
        });
        Ok(id)
    }

    async fn receive_one(&self, visibility_timeout: Duration) -> Result<Option<QueuedMessage>> {
        let now = Instant::now();
        let mut messages = self.messages.lock().await;
        let Some(message) = messages.iter_mut().find(|m| m.visible_at <= now) else {
            return Ok(None);
        };
        message.visible_at = now + visibility_timeout;
        message.dequeue_count += 1;
        Ok(Some(QueuedMessage {
            id: message.id,
            body: message.body.clone(),
            dequeue_count: message.dequeue_count,
        }))
    }

    async fn delete(&self, message: &QueuedMessage) -> Result<()> {
        self.messages.lock().await.retain(|m| m.id != message.id);
        Ok(())
    }
}

/// In-memory [`ComponentRepository`] with injectable write failures.
#[derive(Default)]
pub struct InMemoryComponents {
    components: Mutex<BTreeMap<String, Component>>,
    fail_writes: AtomicBool,
}

impl InMemoryComponents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `set_metadata` calls fail (simulated store outage).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ComponentRepository for InMemoryComponents {
    async fn get(&self, purl: &str) -> Result<Option<Component>> {
        Ok(self.components.lock().await.get(purl).cloned())
    }

    async fn ensure(&self, purl: &str) -> Result<Component> {
        let coordinate: PackageUrl = purl.parse()?;
        let canonical = coordinate.to_string();
        let mut components = self.components.lock().await;
        let component = components.entry(canonical.clone()).or_insert_with(|| Component {
            id: Uuid::new_v4(),
            purl: canonical,
            name: coordinate.display_name(),
            metadata: Default::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        Ok(component.clone())
    }

    async fn list_purls(&self) -> Result<Vec<String>> {
        Ok(self.components.lock().await.keys().cloned().collect())
    }

    async fn get_metadata(
        &self,
        purl: &str,
        key: &str,
        tier: Option<MetadataTier>,
    ) -> Result<Option<JsonValue>> {
        Ok(self
            .components
            .lock()
            .await
            .get(purl)
            .and_then(|c| c.metadata.get(key, tier).cloned()))
    }

    async fn get_expiration(
        &self,
        purl: &str,
        key: &str,
        tier: Option<MetadataTier>,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .components
            .lock()
            .await
            .get(purl)
            .and_then(|c| c.metadata.expiration(key, tier)))
    }

    async fn set_metadata(
        &self,
        purl: &str,
        tier: MetadataTier,
        key: &str,
        value: JsonValue,
        lifetime: Option<chrono::Duration>,
    ) -> Result<bool> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Internal("injected store failure".to_string()));
        }
        let mut components = self.components.lock().await;
        let component = components
            .get_mut(purl)
            .ok_or_else(|| Error::ComponentNotFound(purl.to_string()))?;
        let written = component.metadata.set_with(tier, key, value, lifetime, None);
        if written {
            component.updated_at = Utc::now();
        }
        Ok(written)
    }
}

/// In-memory [`DedupCache`] with real TTL expiry.
#[derive(Default)]
pub struct InMemoryDedup {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemoryDedup {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupCache for InMemoryDedup {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .await
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value.clone()))
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }
}
