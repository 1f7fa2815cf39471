//! The worker/orchestrator: consumes job requests and runs collectors.
//!
//! State machine per received message:
//! `RECEIVED → MATCHED → EXECUTING → {SUCCEEDED | FAILED}` and finally
//! `ACKED` (deleted), `RETAINED` (left for redelivery), or `DROPPED`
//! (deleted after the retry budget is spent). The first definition to
//! succeed wins: its response is published, the request acknowledged, and
//! remaining matched definitions are skipped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use depscope_core::defaults::{
    EXEC_ENVIRONMENT, QUEUE_SECRET_ENV_VARS, RETRY_BUDGET, VISIBILITY_TIMEOUT_SECS,
    WORKER_POLL_INTERVAL_SECS,
};
use depscope_core::{JobCatalog, JobMessage, PackageUrl, Result, WorkQueue};

use crate::executor::{self, ExecOutcome};

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Which catalog `exec-environment` this worker pool serves.
    pub exec_environment: String,
    /// Sleep between receive attempts, in seconds.
    pub poll_interval_secs: u64,
    /// Visibility timeout applied to received requests, in seconds.
    pub visibility_timeout_secs: u64,
    /// A request redelivered more than this many times is dropped.
    pub retry_budget: i32,
    /// Environment variables withheld from collector child processes.
    pub env_denylist: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            exec_environment: EXEC_ENVIRONMENT.to_string(),
            poll_interval_secs: WORKER_POLL_INTERVAL_SECS,
            visibility_timeout_secs: VISIBILITY_TIMEOUT_SECS,
            retry_budget: RETRY_BUDGET,
            env_denylist: QUEUE_SECRET_ENV_VARS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl OrchestratorConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WORKER_EXEC_ENVIRONMENT` | `default` | Catalog pool served by this worker |
    /// | `WORKER_POLL_INTERVAL_SECS` | `3` | Sleep between receive attempts |
    /// | `WORKER_RETRY_BUDGET` | `2` | Redeliveries before a request is dropped |
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("WORKER_EXEC_ENVIRONMENT") {
            if !value.is_empty() {
                config.exec_environment = value;
            }
        }
        if let Ok(value) = std::env::var("WORKER_POLL_INTERVAL_SECS") {
            if let Ok(secs) = value.parse() {
                config.poll_interval_secs = secs;
            }
        }
        if let Ok(value) = std::env::var("WORKER_RETRY_BUDGET") {
            if let Ok(budget) = value.parse() {
                config.retry_budget = budget;
            }
        }

        config
    }

    /// Set the exec environment this worker serves.
    pub fn with_exec_environment(mut self, env: impl Into<String>) -> Self {
        self.exec_environment = env.into();
        self
    }

    /// Set the poll interval in seconds.
    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    /// Set the retry budget.
    pub fn with_retry_budget(mut self, budget: i32) -> Self {
        self.retry_budget = budget;
        self
    }

    fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

/// Terminal disposition of one receive attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Nothing on the queue.
    Empty,
    /// The message was not a job-request for us; left undeleted.
    Ignored,
    /// The request was deleted without a response (invalid, or budget spent).
    Dropped,
    /// A definition succeeded; response published and request acknowledged.
    Completed,
    /// Execution failed or no definition could run; left for redelivery.
    Retained,
}

/// Handle for controlling a running orchestrator.
pub struct OrchestratorHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl OrchestratorHandle {
    /// Signal the loop to shut down after its current message.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// The worker loop: dequeues job requests and executes matching collectors.
pub struct Orchestrator {
    inbound: Arc<dyn WorkQueue>,
    outbound: Arc<dyn WorkQueue>,
    catalog: Arc<JobCatalog>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        inbound: Arc<dyn WorkQueue>,
        outbound: Arc<dyn WorkQueue>,
        catalog: Arc<JobCatalog>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            inbound,
            outbound,
            catalog,
            config,
        }
    }

    /// Start the polling loop and return a shutdown handle.
    pub fn start(self) -> OrchestratorHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });
        OrchestratorHandle { shutdown_tx }
    }

    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        info!(
            subsystem = "worker",
            exec_environment = %self.config.exec_environment,
            poll_interval_secs = self.config.poll_interval_secs,
            retry_budget = self.config.retry_budget,
            "Worker started"
        );

        let poll_interval = Duration::from_secs(self.config.poll_interval_secs);
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            if let Err(e) = self.process_one().await {
                warn!(subsystem = "worker", error = %e, "Error processing message");
            }
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = sleep(poll_interval) => {}
            }
        }

        info!(subsystem = "worker", "Worker stopped");
    }

    /// Receive and fully process at most one job request.
    pub async fn process_one(&self) -> Result<ProcessOutcome> {
        let message = match self.inbound.receive_one(self.config.visibility_timeout()).await {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(ProcessOutcome::Empty),
            Err(e) => {
                // Transient infra failure; indistinguishable from "no work".
                warn!(subsystem = "worker", op = "receive", error = %e, "Receive failed");
                return Ok(ProcessOutcome::Empty);
            }
        };

        let (job_name, target, correlation_id) = match JobMessage::decode(&message.body) {
            Ok(JobMessage::JobRequest {
                job_name,
                target,
                correlation_id,
            }) => (job_name, target, correlation_id),
            Ok(_) => {
                debug!(
                    subsystem = "worker",
                    message_id = %message.id,
                    "Message is not a job-request; leaving for other consumers"
                );
                return Ok(ProcessOutcome::Ignored);
            }
            Err(e) => {
                debug!(
                    subsystem = "worker",
                    message_id = %message.id,
                    error = %e,
                    "Message body was not a job message; leaving for other consumers"
                );
                return Ok(ProcessOutcome::Ignored);
            }
        };

        // A recognized request with an unusable target can never succeed;
        // delete it rather than letting it loop as a poison message.
        if target.parse::<PackageUrl>().is_err() {
            warn!(
                subsystem = "worker",
                message_id = %message.id,
                job_name = %job_name,
                target = %target,
                "Request target is not a valid coordinate; dropping"
            );
            self.inbound.delete(&message).await?;
            return Ok(ProcessOutcome::Dropped);
        }

        let matched = self.catalog.matching(&self.config.exec_environment, &job_name);
        if matched.is_empty() {
            // Possibly a definition served by another worker pool.
            debug!(
                subsystem = "worker",
                job_name = %job_name,
                exec_environment = %self.config.exec_environment,
                "No matching job definitions; leaving message"
            );
            return Ok(ProcessOutcome::Retained);
        }

        let env = executor::filtered_env(&self.config.env_denylist);

        for definition in &matched {
            let argv = definition.build_command(&target);
            debug!(
                subsystem = "worker",
                job_name = %job_name,
                target = %target,
                command = %argv.join(" "),
                "Assembled command"
            );

            let unmet = definition.unmet_requirements(|name| std::env::var_os(name).is_some());
            if !unmet.is_empty() {
                // Will not change without redeployment; skip, don't fail.
                warn!(
                    subsystem = "worker",
                    job_name = %job_name,
                    missing = %unmet.join(", "),
                    "Missing required environment variables; skipping definition"
                );
                continue;
            }

            let timeout = Duration::from_secs(definition.timeout_secs);
            match executor::execute(&argv, &env, timeout).await {
                ExecOutcome::Succeeded(result) => {
                    let response = JobMessage::response(
                        job_name.clone(),
                        target.clone(),
                        correlation_id.clone(),
                        result,
                    );
                    self.outbound.send(&response.encode()?).await?;
                    self.inbound.delete(&message).await?;
                    info!(
                        subsystem = "worker",
                        job_name = %job_name,
                        target = %target,
                        correlation_id = correlation_id.as_deref().unwrap_or(""),
                        "Job succeeded; response published"
                    );
                    // First success wins; remaining definitions are skipped.
                    return Ok(ProcessOutcome::Completed);
                }
                ExecOutcome::Failed(failure) => {
                    warn!(
                        subsystem = "worker",
                        job_name = %job_name,
                        target = %target,
                        dequeue_count = message.dequeue_count,
                        error = %failure,
                        "Job execution failed"
                    );
                    if message.dequeue_count > self.config.retry_budget {
                        info!(
                            subsystem = "worker",
                            job_name = %job_name,
                            target = %target,
                            "Retry budget spent; dropping request"
                        );
                        self.inbound.delete(&message).await?;
                        return Ok(ProcessOutcome::Dropped);
                    }
                    // Leave undeleted; try the next matched definition now,
                    // and the queue redelivers after the visibility timeout.
                }
            }
        }

        if message.dequeue_count > self.config.retry_budget {
            // Every matched definition was skipped for unmet requirements;
            // that won't change without redeployment, so stop redelivering.
            info!(
                subsystem = "worker",
                job_name = %job_name,
                target = %target,
                "No executable definition after retry budget; dropping request"
            );
            self.inbound.delete(&message).await?;
            return Ok(ProcessOutcome::Dropped);
        }

        Ok(ProcessOutcome::Retained)
    }
}
