//! # depscope-jobs
//!
//! The job orchestration pipeline: the three polling loops that keep
//! component metadata fresh.
//!
//! - [`Scheduler`] scans components × catalog and enqueues `job-request`
//!   messages for stale (component, job) pairs, deduplicated by a TTL'd
//!   cache.
//! - [`Orchestrator`] dequeues requests, runs the matching collector
//!   executables with a filtered environment and a hard timeout, and
//!   publishes `job-response` messages on success.
//! - [`ResultImporter`] dequeues responses and merges them into each
//!   component's tiered metadata.
//!
//! The loops communicate only through the work queues and the metadata
//! store; each is an independent single-threaded poller that isolates
//! per-message failures and never dies on one.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use depscope_jobs::{Orchestrator, OrchestratorConfig};
//! use depscope_core::JobCatalog;
//! use depscope_db::Database;
//!
//! let db = Database::connect("postgres://...").await?;
//! let catalog = Arc::new(JobCatalog::load("jobs.json")?);
//!
//! let worker = Orchestrator::new(
//!     Arc::new(db.work_queue("work-to-do")),
//!     Arc::new(db.work_queue("work-complete")),
//!     catalog,
//!     OrchestratorConfig::from_env(),
//! );
//! let handle = worker.start();
//! // ...
//! handle.shutdown().await;
//! ```

pub mod executor;
pub mod importer;
pub mod orchestrator;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

// Re-export core types
pub use depscope_core::*;

pub use executor::{execute, filtered_env, ExecFailure, ExecOutcome};
pub use importer::{ImportOutcome, ImporterConfig, ImporterHandle, ResultImporter};
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorHandle, ProcessOutcome};
pub use scheduler::{dedup_key, CycleStats, Scheduler, SchedulerConfig, SchedulerHandle};
