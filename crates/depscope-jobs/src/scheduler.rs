//! The scheduler/producer: decides which (component, job) pairs are due
//! for refresh and enqueues job requests.
//!
//! A pair is due when its target metadata record has no expiration or an
//! expiration in the past, and no dedup-cache entry marks a request as
//! already in flight. The dedup cache is best-effort only: it bounds
//! duplicate work, it does not guarantee exactly-once (the queue send and
//! the cache write are not one atomic unit), so everything downstream
//! tolerates duplicate requests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use depscope_core::defaults::{DEDUP_TTL_SECS, SCHEDULER_CYCLE_INTERVAL_SECS};
use depscope_core::{
    ComponentRepository, DedupCache, JobCatalog, JobDefinition, JobMessage, MetadataTarget,
    MetadataTier, PackageUrl, Result, WorkQueue,
};

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between refresh cycles, in seconds.
    pub cycle_interval_secs: u64,
    /// Lifetime of dedup-cache entries, in seconds.
    pub dedup_ttl_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: SCHEDULER_CYCLE_INTERVAL_SECS,
            dedup_ttl_secs: DEDUP_TTL_SECS,
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `SCHEDULER_CYCLE_INTERVAL_SECS` | `60` | Time between refresh cycles |
    /// | `SCHEDULER_DEDUP_TTL_SECS` | `604800` | Dedup-cache entry lifetime |
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("SCHEDULER_CYCLE_INTERVAL_SECS") {
            if let Ok(secs) = value.parse() {
                config.cycle_interval_secs = secs;
            }
        }
        if let Ok(value) = std::env::var("SCHEDULER_DEDUP_TTL_SECS") {
            if let Ok(secs) = value.parse() {
                config.dedup_ttl_secs = secs;
            }
        }

        config
    }

    /// Set the cycle interval in seconds.
    pub fn with_cycle_interval(mut self, secs: u64) -> Self {
        self.cycle_interval_secs = secs;
        self
    }

    /// Set the dedup TTL in seconds.
    pub fn with_dedup_ttl(mut self, secs: u64) -> Self {
        self.dedup_ttl_secs = secs;
        self
    }
}

/// Counters from one scheduler cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleStats {
    /// (component, job) pairs examined.
    pub examined: usize,
    /// Requests enqueued this cycle.
    pub enqueued: usize,
    /// Pairs skipped because their metadata is still fresh.
    pub skipped_fresh: usize,
    /// Pairs skipped because a request is already in flight.
    pub skipped_in_flight: usize,
    /// Pairs skipped because the job is handled out-of-band (`$special`).
    pub skipped_special: usize,
    /// Per-pair failures (enqueue errors, store errors, bad catalog entries).
    pub failures: usize,
}

/// The dedup-cache key for one (component, job) pair.
pub fn dedup_key(target: &str, job_name: &str) -> String {
    format!("job::{}::{}", target, job_name)
}

/// Handle for controlling a running scheduler.
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl SchedulerHandle {
    /// Signal the loop to shut down after its current cycle.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// The producer loop: scans components × catalog and enqueues due work.
pub struct Scheduler {
    components: Arc<dyn ComponentRepository>,
    queue: Arc<dyn WorkQueue>,
    dedup: Arc<dyn DedupCache>,
    catalog: Arc<JobCatalog>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        components: Arc<dyn ComponentRepository>,
        queue: Arc<dyn WorkQueue>,
        dedup: Arc<dyn DedupCache>,
        catalog: Arc<JobCatalog>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            components,
            queue,
            dedup,
            catalog,
            config,
        }
    }

    /// Start the cycle loop and return a shutdown handle.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });
        SchedulerHandle { shutdown_tx }
    }

    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        info!(
            subsystem = "scheduler",
            cycle_interval_secs = self.config.cycle_interval_secs,
            jobs = self.catalog.len(),
            "Scheduler started"
        );

        let interval = Duration::from_secs(self.config.cycle_interval_secs);
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            match self.run_cycle().await {
                Ok(stats) => {
                    info!(
                        subsystem = "scheduler",
                        op = "run_cycle",
                        examined = stats.examined,
                        enqueued = stats.enqueued,
                        failures = stats.failures,
                        "Cycle complete"
                    );
                }
                Err(e) => {
                    // Transient infra failure; the next cycle retries.
                    warn!(subsystem = "scheduler", error = %e, "Cycle failed");
                }
            }
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = sleep(interval) => {}
            }
        }

        info!(subsystem = "scheduler", "Scheduler stopped");
    }

    /// One full refresh cycle over every tracked component.
    pub async fn run_cycle(&self) -> Result<CycleStats> {
        let purls = self.components.list_purls().await?;
        self.schedule(&purls).await
    }

    /// Targeted/manual mode: one cycle over a single named component.
    pub async fn run_cycle_for(&self, target: &str) -> Result<CycleStats> {
        let purl: PackageUrl = target.parse()?;
        let canonical = [purl.to_string()];
        self.schedule(&canonical).await
    }

    async fn schedule(&self, purls: &[String]) -> Result<CycleStats> {
        let mut stats = CycleStats::default();

        for definition in self.catalog.enabled() {
            let target = match definition.metadata_target() {
                Ok(target) => target,
                Err(e) => {
                    warn!(
                        subsystem = "scheduler",
                        job_name = %definition.job_name,
                        error = %e,
                        "Skipping catalog entry with invalid metadata-subtree"
                    );
                    stats.failures += 1;
                    continue;
                }
            };

            let (tier, key) = match target {
                MetadataTarget::Special => {
                    debug!(
                        subsystem = "scheduler",
                        job_name = %definition.job_name,
                        "Ignoring special configuration directive"
                    );
                    stats.skipped_special += purls.len();
                    stats.examined += purls.len();
                    continue;
                }
                MetadataTarget::Subtree { tier, key } => (tier, key),
            };

            for purl in purls {
                stats.examined += 1;
                if let Err(e) = self
                    .schedule_pair(definition, purl, tier, &key, &mut stats)
                    .await
                {
                    // A single pair must never abort the cycle.
                    warn!(
                        subsystem = "scheduler",
                        job_name = %definition.job_name,
                        target = %purl,
                        error = %e,
                        "Error scheduling pair"
                    );
                    stats.failures += 1;
                }
            }
        }

        Ok(stats)
    }

    async fn schedule_pair(
        &self,
        definition: &JobDefinition,
        purl: &str,
        tier: MetadataTier,
        key: &str,
        stats: &mut CycleStats,
    ) -> Result<()> {
        let expiration = self
            .components
            .get_expiration(purl, key, Some(tier))
            .await?;
        if let Some(expiration) = expiration {
            if expiration >= chrono::Utc::now() {
                stats.skipped_fresh += 1;
                return Ok(());
            }
        }

        let cache_key = dedup_key(purl, &definition.job_name);
        if self.dedup.get(&cache_key).await?.is_some() {
            // Already in the queue (or was recently).
            stats.skipped_in_flight += 1;
            return Ok(());
        }

        let correlation_id = Uuid::new_v4().to_string();
        let request = JobMessage::request(&definition.job_name, purl, correlation_id.clone());
        self.queue.send(&request.encode()?).await?;
        stats.enqueued += 1;

        debug!(
            subsystem = "scheduler",
            job_name = %definition.job_name,
            target = %purl,
            correlation_id = %correlation_id,
            "Enqueued job request"
        );

        // Best-effort: a failed cache write just means a possible duplicate
        // request next cycle, which downstream tolerates.
        if let Err(e) = self
            .dedup
            .put(
                &cache_key,
                &correlation_id,
                Duration::from_secs(self.config.dedup_ttl_secs),
            )
            .await
        {
            warn!(
                subsystem = "scheduler",
                cache_key = %cache_key,
                error = %e,
                "Failed to write dedup-cache entry"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryComponents, InMemoryDedup, InMemoryQueue};
    use depscope_core::defaults::JOB_TIMEOUT_SECS;
    use depscope_core::{JobDefinition, MetadataTier};
    use serde_json::json;

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
        scheduler: Scheduler,
        components: Arc<InMemoryComponents>,
        queue: Arc<InMemoryQueue>,
        dedup: Arc<InMemoryDedup>,
    }

    fn fixture(definitions: Vec<JobDefinition>) -> Fixture {
        let components = Arc::new(InMemoryComponents::new());
        let queue = Arc::new(InMemoryQueue::new());
        let dedup = Arc::new(InMemoryDedup::new());
        let scheduler = Scheduler::new(
            components.clone(),
            queue.clone(),
            dedup.clone(),
            Arc::new(JobCatalog::from_jobs(definitions)),
            SchedulerConfig::default(),
        );
        Fixture {
            scheduler,
            components,
            queue,
            dedup,
        }
    }

    #[tokio::test]
    async fn stale_metadata_enqueues_a_request_and_caches_it() {
        let f = fixture(vec![definition("scorecard", Some("SOURCE.scorecard"))]);
        f.components.ensure("pkg:npm/chalk").await.unwrap();

        let stats = f.scheduler.run_cycle().await.unwrap();
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.examined, 1);

        let bodies = f.queue.bodies().await;
        assert_eq!(bodies.len(), 1);
        match JobMessage::decode(&bodies[0]).unwrap() {
            JobMessage::JobRequest {
                job_name,
                target,
                correlation_id,
            } => {
                assert_eq!(job_name, "scorecard");
                assert_eq!(target, "pkg:npm/chalk");
                let cid = correlation_id.expect("correlation id set");
                // The dedup entry holds the same correlation id.
                let cached = f
                    .dedup
                    .get(&dedup_key("pkg:npm/chalk", "scorecard"))
                    .await
                    .unwrap();
                assert_eq!(cached, Some(cid));
            }
            _ => panic!("Expected a job-request"),
        }
    }

    #[tokio::test]
    async fn second_cycle_is_deduplicated() {
        let f = fixture(vec![definition("scorecard", Some("SOURCE.scorecard"))]);
        f.components.ensure("pkg:npm/chalk").await.unwrap();

        let first = f.scheduler.run_cycle().await.unwrap();
        assert_eq!(first.enqueued, 1);

        let second = f.scheduler.run_cycle().await.unwrap();
        assert_eq!(second.enqueued, 0);
        assert_eq!(second.skipped_in_flight, 1);
        assert_eq!(f.queue.len().await, 1);
    }

    #[tokio::test]
    async fn fresh_metadata_is_not_rescheduled() {
        let f = fixture(vec![definition("scorecard", Some("SOURCE.scorecard"))]);
        f.components.ensure("pkg:npm/chalk").await.unwrap();
        f.components
            .set_metadata(
                "pkg:npm/chalk",
                MetadataTier::Source,
                "scorecard",
                json!(7),
                Some(chrono::Duration::hours(1)),
            )
            .await
            .unwrap();

        let stats = f.scheduler.run_cycle().await.unwrap();
        assert_eq!(stats.enqueued, 0);
        assert_eq!(stats.skipped_fresh, 1);
        assert_eq!(f.queue.len().await, 0);
    }

    #[tokio::test]
    async fn expired_metadata_is_rescheduled() {
        let f = fixture(vec![definition("scorecard", Some("SOURCE.scorecard"))]);
        f.components.ensure("pkg:npm/chalk").await.unwrap();
        f.components
            .set_metadata(
                "pkg:npm/chalk",
                MetadataTier::Source,
                "scorecard",
                json!(7),
                Some(chrono::Duration::hours(-1)),
            )
            .await
            .unwrap();

        let stats = f.scheduler.run_cycle().await.unwrap();
        assert_eq!(stats.enqueued, 1);
    }

    #[tokio::test]
    async fn special_subtree_is_skipped() {
        let f = fixture(vec![definition("characteristics", Some("$special"))]);
        f.components.ensure("pkg:npm/chalk").await.unwrap();

        let stats = f.scheduler.run_cycle().await.unwrap();
        assert_eq!(stats.enqueued, 0);
        assert_eq!(stats.skipped_special, 1);
        assert_eq!(f.queue.len().await, 0);
    }

    #[tokio::test]
    async fn disabled_jobs_are_not_scheduled() {
        let mut def = definition("scorecard", Some("SOURCE.scorecard"));
        def.enabled = false;
        let f = fixture(vec![def]);
        f.components.ensure("pkg:npm/chalk").await.unwrap();

        let stats = f.scheduler.run_cycle().await.unwrap();
        assert_eq!(stats.examined, 0);
        assert_eq!(f.queue.len().await, 0);
    }

    #[tokio::test]
    async fn enqueue_failure_does_not_abort_the_cycle() {
        let f = fixture(vec![definition("scorecard", Some("SOURCE.scorecard"))]);
        f.components.ensure("pkg:npm/aaa-fails").await.unwrap();
        f.components.ensure("pkg:npm/bbb-works").await.unwrap();
        f.queue.fail_sends_containing("aaa-fails").await;

        let stats = f.scheduler.run_cycle().await.unwrap();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.enqueued, 1);

        let bodies = f.queue.bodies().await;
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].contains("bbb-works"));
    }

    #[tokio::test]
    async fn invalid_catalog_subtree_counts_as_failure() {
        let f = fixture(vec![definition("weird", Some("MYSTERY.key"))]);
        f.components.ensure("pkg:npm/chalk").await.unwrap();

        let stats = f.scheduler.run_cycle().await.unwrap();
        assert_eq!(stats.failures, 1);
        assert_eq!(f.queue.len().await, 0);
    }

    #[tokio::test]
    async fn targeted_mode_schedules_one_component() {
        let f = fixture(vec![definition("scorecard", Some("SOURCE.scorecard"))]);
        f.components.ensure("pkg:npm/chalk").await.unwrap();
        f.components.ensure("pkg:npm/lodash").await.unwrap();

        let stats = f.scheduler.run_cycle_for("pkg:npm/chalk").await.unwrap();
        assert_eq!(stats.examined, 1);
        assert_eq!(stats.enqueued, 1);

        let bodies = f.queue.bodies().await;
        assert!(bodies[0].contains("pkg:npm/chalk"));
    }

    #[tokio::test]
    async fn targeted_mode_rejects_invalid_coordinates() {
        let f = fixture(vec![definition("scorecard", Some("SOURCE.scorecard"))]);
        assert!(f.scheduler.run_cycle_for("not a purl").await.is_err());
    }

    #[test]
    fn dedup_key_format() {
        assert_eq!(
            dedup_key("pkg:npm/chalk", "scorecard"),
            "job::pkg:npm/chalk::scorecard"
        );
    }

    #[test]
    fn config_builders() {
        let config = SchedulerConfig::default()
            .with_cycle_interval(5)
            .with_dedup_ttl(60);
        assert_eq!(config.cycle_interval_secs, 5);
        assert_eq!(config.dedup_ttl_secs, 60);
    }
}
