//! The result importer: merges job responses into component metadata.
//!
//! Responses are written under the (tier, key) the catalog configures for
//! the job, at most one record per (component, tier, key). A message is
//! deleted only after its write lands, so transient store failures fall
//! back on the queue's redelivery for a retry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use depscope_core::defaults::{IMPORTER_POLL_INTERVAL_SECS, VISIBILITY_TIMEOUT_SECS};
use depscope_core::{
    ComponentRepository, JobCatalog, JobMessage, MetadataTarget, Result, WorkQueue,
};

/// Configuration for the result importer.
#[derive(Debug, Clone)]
pub struct ImporterConfig {
    /// Sleep between receive attempts, in seconds.
    pub poll_interval_secs: u64,
    /// Visibility timeout applied to received responses, in seconds.
    pub visibility_timeout_secs: u64,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: IMPORTER_POLL_INTERVAL_SECS,
            visibility_timeout_secs: VISIBILITY_TIMEOUT_SECS,
        }
    }
}

impl ImporterConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `IMPORTER_POLL_INTERVAL_SECS` | `3` | Sleep between receive attempts |
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("IMPORTER_POLL_INTERVAL_SECS") {
            if let Ok(secs) = value.parse() {
                config.poll_interval_secs = secs;
            }
        }
        config
    }

    /// Set the poll interval in seconds.
    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

/// Terminal disposition of one receive attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// Nothing on the queue.
    Empty,
    /// The message was not a job-response; left undeleted.
    Ignored,
    /// The response could never be applied; deleted with a warning.
    Dropped,
    /// Metadata written and the message acknowledged.
    Imported,
    /// The store write failed; left for redelivery.
    Retained,
}

/// Handle for controlling a running importer.
pub struct ImporterHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl ImporterHandle {
    /// Signal the loop to shut down after its current message.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// The consumer loop over the work-complete queue.
pub struct ResultImporter {
    queue: Arc<dyn WorkQueue>,
    components: Arc<dyn ComponentRepository>,
    catalog: Arc<JobCatalog>,
    config: ImporterConfig,
}

impl ResultImporter {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        components: Arc<dyn ComponentRepository>,
        catalog: Arc<JobCatalog>,
        config: ImporterConfig,
    ) -> Self {
        Self {
            queue,
            components,
            catalog,
            config,
        }
    }

    /// Start the polling loop and return a shutdown handle.
    pub fn start(self) -> ImporterHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });
        ImporterHandle { shutdown_tx }
    }

    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        info!(
            subsystem = "importer",
            poll_interval_secs = self.config.poll_interval_secs,
            "Result importer started"
        );

        let poll_interval = Duration::from_secs(self.config.poll_interval_secs);
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            if let Err(e) = self.process_one().await {
                warn!(subsystem = "importer", error = %e, "Error processing message");
            }
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = sleep(poll_interval) => {}
            }
        }

        info!(subsystem = "importer", "Result importer stopped");
    }

    /// Receive and fully process at most one job response.
    pub async fn process_one(&self) -> Result<ImportOutcome> {
        let message = match self.queue.receive_one(self.config.visibility_timeout()).await {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(ImportOutcome::Empty),
            Err(e) => {
                warn!(subsystem = "importer", op = "receive", error = %e, "Receive failed");
                return Ok(ImportOutcome::Empty);
            }
        };

        let (job_name, target, result) = match JobMessage::decode(&message.body) {
            Ok(JobMessage::JobResponse {
                job_name,
                target,
                result,
                ..
            }) => (job_name, target, result),
            Ok(_) => {
                debug!(
                    subsystem = "importer",
                    message_id = %message.id,
                    "Message is not a job-response; leaving for other consumers"
                );
                return Ok(ImportOutcome::Ignored);
            }
            Err(e) => {
                debug!(
                    subsystem = "importer",
                    message_id = %message.id,
                    error = %e,
                    "Message body was not a job message; leaving for other consumers"
                );
                return Ok(ImportOutcome::Ignored);
            }
        };

        // Everything below is a response we recognize but may be unable to
        // apply; unapplicable ones are deleted so they don't loop forever.
        let Some(definition) = self.catalog.find_enabled(&job_name) else {
            warn!(
                subsystem = "importer",
                job_name = %job_name,
                "Response for unknown or disabled job; dropping"
            );
            self.queue.delete(&message).await?;
            return Ok(ImportOutcome::Dropped);
        };

        let (tier, key) = match definition.metadata_target() {
            Ok(MetadataTarget::Subtree { tier, key }) => (tier, key),
            Ok(MetadataTarget::Special) => {
                debug!(
                    subsystem = "importer",
                    job_name = %job_name,
                    "Job is handled out-of-band; dropping response"
                );
                self.queue.delete(&message).await?;
                return Ok(ImportOutcome::Dropped);
            }
            Err(e) => {
                warn!(
                    subsystem = "importer",
                    job_name = %job_name,
                    error = %e,
                    "Catalog entry has an invalid metadata-subtree; dropping response"
                );
                self.queue.delete(&message).await?;
                return Ok(ImportOutcome::Dropped);
            }
        };

        // Collectors may nest their primary output under the key name.
        let value = match result.get(key.as_str()).cloned() {
            Some(inner) => inner,
            None => result,
        };

        if self.components.get(&target).await?.is_none() {
            // Entities are created by the import pipeline, never from a
            // response; a response for an untracked component is stray.
            warn!(
                subsystem = "importer",
                job_name = %job_name,
                target = %target,
                "Response targets an untracked component; dropping"
            );
            self.queue.delete(&message).await?;
            return Ok(ImportOutcome::Dropped);
        }

        match self
            .components
            .set_metadata(&target, tier, &key, value, None)
            .await
        {
            Ok(true) => {
                info!(
                    subsystem = "importer",
                    job_name = %job_name,
                    target = %target,
                    key = %key,
                    tier = %tier,
                    "Metadata updated"
                );
                self.queue.delete(&message).await?;
                Ok(ImportOutcome::Imported)
            }
            Ok(false) => {
                // Null result: a write would be a no-op forever.
                warn!(
                    subsystem = "importer",
                    job_name = %job_name,
                    target = %target,
                    "Response carried a null result; dropping"
                );
                self.queue.delete(&message).await?;
                Ok(ImportOutcome::Dropped)
            }
            Err(e) => {
                // Transient store failure: keep the message; the queue
                // redelivers it after the visibility timeout.
                warn!(
                    subsystem = "importer",
                    job_name = %job_name,
                    target = %target,
                    error = %e,
                    "Metadata write failed; leaving message for redelivery"
                );
                Ok(ImportOutcome::Retained)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryComponents, InMemoryQueue};
    use depscope_core::defaults::JOB_TIMEOUT_SECS;
    use depscope_core::{JobDefinition, MetadataTier};
    use serde_json::{json, Value as JsonValue};

    fn definition(name: &str, subtree: Option<&str>) -> JobDefinition {
        JobDefinition {
            job_name: name.to_string(),
            exec_environment: "docker-scanner".to_string(),
            cmd: vec!["collector".to_string(), "$TARGET".to_string()],
            requires: vec![],
            timeout_secs: JOB_TIMEOUT_SECS,
            ordering: 0,
            enabled: true,
            metadata_subtree: subtree.map(str::to_string),
        }
    }

    struct Fixture {
        importer: ResultImporter,
        components: Arc<InMemoryComponents>,
        queue: Arc<InMemoryQueue>,
    }

    fn fixture(definitions: Vec<JobDefinition>) -> Fixture {
        let components = Arc::new(InMemoryComponents::new());
        let queue = Arc::new(InMemoryQueue::new());
        let importer = ResultImporter::new(
            queue.clone(),
            components.clone(),
            Arc::new(JobCatalog::from_jobs(definitions)),
            ImporterConfig::default(),
        );
        Fixture {
            importer,
            components,
            queue,
        }
    }

    async fn send_response(queue: &InMemoryQueue, job_name: &str, target: &str, result: JsonValue) {
        let body = JobMessage::response(job_name, target, Some("cid-1".to_string()), result)
            .encode()
            .unwrap();
        queue.send(&body).await.unwrap();
    }

    #[tokio::test]
    async fn empty_queue_yields_empty() {
        let f = fixture(vec![]);
        assert_eq!(f.importer.process_one().await.unwrap(), ImportOutcome::Empty);
    }

    #[tokio::test]
    async fn round_trip_unwraps_the_keyed_field() {
        let f = fixture(vec![definition("scorecard", Some("SOURCE.foo"))]);
        f.components.ensure("pkg:npm/chalk").await.unwrap();
        send_response(&f.queue, "scorecard", "pkg:npm/chalk", json!({"foo": 42})).await;

        assert_eq!(
            f.importer.process_one().await.unwrap(),
            ImportOutcome::Imported
        );
        assert_eq!(
            f.components
                .get_metadata("pkg:npm/chalk", "foo", None)
                .await
                .unwrap(),
            Some(json!(42))
        );
        // The response is removed from the work-complete queue.
        assert_eq!(f.queue.len().await, 0);
    }

    #[tokio::test]
    async fn whole_result_is_stored_when_key_is_absent() {
        let f = fixture(vec![definition("scorecard", Some("SOURCE.scorecard"))]);
        f.components.ensure("pkg:npm/chalk").await.unwrap();
        send_response(
            &f.queue,
            "scorecard",
            "pkg:npm/chalk",
            json!({"score": 7.2, "checks": []}),
        )
        .await;

        assert_eq!(
            f.importer.process_one().await.unwrap(),
            ImportOutcome::Imported
        );
        assert_eq!(
            f.components
                .get_metadata("pkg:npm/chalk", "scorecard", Some(MetadataTier::Source))
                .await
                .unwrap(),
            Some(json!({"score": 7.2, "checks": []}))
        );
    }

    #[tokio::test]
    async fn writes_to_the_configured_tier() {
        let f = fixture(vec![definition("typosquatting", Some("DERIVED.typo"))]);
        f.components.ensure("pkg:npm/chalk").await.unwrap();
        send_response(
            &f.queue,
            "typosquatting",
            "pkg:npm/chalk",
            json!({"typo": ["chalkk"]}),
        )
        .await;

        f.importer.process_one().await.unwrap();
        assert_eq!(
            f.components
                .get_metadata("pkg:npm/chalk", "typo", Some(MetadataTier::Derived))
                .await
                .unwrap(),
            Some(json!(["chalkk"]))
        );
        assert_eq!(
            f.components
                .get_metadata("pkg:npm/chalk", "typo", Some(MetadataTier::Source))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn requests_are_left_alone() {
        let f = fixture(vec![definition("scorecard", None)]);
        let request = JobMessage::request("scorecard", "pkg:npm/chalk", "cid");
        f.queue.send(&request.encode().unwrap()).await.unwrap();

        assert_eq!(
            f.importer.process_one().await.unwrap(),
            ImportOutcome::Ignored
        );
        assert_eq!(f.queue.len().await, 1);
    }

    #[tokio::test]
    async fn non_json_is_left_alone() {
        let f = fixture(vec![]);
        f.queue.send("garbage").await.unwrap();
        assert_eq!(
            f.importer.process_one().await.unwrap(),
            ImportOutcome::Ignored
        );
        assert_eq!(f.queue.len().await, 1);
    }

    #[tokio::test]
    async fn unknown_job_name_is_dropped() {
        let f = fixture(vec![]);
        send_response(&f.queue, "mystery", "pkg:npm/chalk", json!({})).await;

        assert_eq!(
            f.importer.process_one().await.unwrap(),
            ImportOutcome::Dropped
        );
        assert_eq!(f.queue.len().await, 0);
    }

    #[tokio::test]
    async fn special_subtree_response_is_dropped() {
        let f = fixture(vec![definition("characteristics", Some("$special"))]);
        f.components.ensure("pkg:npm/chalk").await.unwrap();
        send_response(&f.queue, "characteristics", "pkg:npm/chalk", json!({"x": 1})).await;

        assert_eq!(
            f.importer.process_one().await.unwrap(),
            ImportOutcome::Dropped
        );
        assert_eq!(f.queue.len().await, 0);
        assert!(f
            .components
            .get_metadata("pkg:npm/chalk", "characteristics", None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn untracked_component_is_dropped_not_created() {
        let f = fixture(vec![definition("scorecard", None)]);
        send_response(&f.queue, "scorecard", "pkg:npm/unknown", json!({"score": 1})).await;

        assert_eq!(
            f.importer.process_one().await.unwrap(),
            ImportOutcome::Dropped
        );
        assert_eq!(f.queue.len().await, 0);
        assert!(f.components.get("pkg:npm/unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn null_result_is_dropped_without_a_write() {
        let f = fixture(vec![definition("scorecard", Some("SOURCE.foo"))]);
        f.components.ensure("pkg:npm/chalk").await.unwrap();
        send_response(&f.queue, "scorecard", "pkg:npm/chalk", json!({"foo": null})).await;

        assert_eq!(
            f.importer.process_one().await.unwrap(),
            ImportOutcome::Dropped
        );
        assert_eq!(
            f.components
                .get_metadata("pkg:npm/chalk", "foo", None)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn store_failure_leaves_the_message_for_redelivery() {
        let f = fixture(vec![definition("scorecard", Some("SOURCE.foo"))]);
        f.components.ensure("pkg:npm/chalk").await.unwrap();
        f.components.fail_writes(true);
        send_response(&f.queue, "scorecard", "pkg:npm/chalk", json!({"foo": 1})).await;

        assert_eq!(
            f.importer.process_one().await.unwrap(),
            ImportOutcome::Retained
        );
        assert_eq!(f.queue.len().await, 1);

        // Once the store recovers, redelivery succeeds.
        f.components.fail_writes(false);
        f.queue.make_all_visible().await;
        assert_eq!(
            f.importer.process_one().await.unwrap(),
            ImportOutcome::Imported
        );
        assert_eq!(f.queue.len().await, 0);
    }

    #[tokio::test]
    async fn existing_record_is_replaced_on_refresh() {
        let f = fixture(vec![definition("scorecard", Some("SOURCE.foo"))]);
        f.components.ensure("pkg:npm/chalk").await.unwrap();

        send_response(&f.queue, "scorecard", "pkg:npm/chalk", json!({"foo": 1})).await;
        f.importer.process_one().await.unwrap();
        send_response(&f.queue, "scorecard", "pkg:npm/chalk", json!({"foo": 2})).await;
        f.importer.process_one().await.unwrap();

        assert_eq!(
            f.components
                .get_metadata("pkg:npm/chalk", "foo", None)
                .await
                .unwrap(),
            Some(json!(2))
        );
    }
}
