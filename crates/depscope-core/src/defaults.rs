//! Centralized default constants for the depscope pipeline.
//!
//! **This module is the single source of truth** for all shared default
//! values. The scheduler, orchestrator, importer, and CLI reference these
//! constants instead of defining their own magic numbers.

// =============================================================================
// POLLING
// =============================================================================

/// Sleep between orchestrator receive attempts when the queue is empty (seconds).
pub const WORKER_POLL_INTERVAL_SECS: u64 = 3;

/// Sleep between importer receive attempts when the queue is empty (seconds).
pub const IMPORTER_POLL_INTERVAL_SECS: u64 = 3;

/// Interval between scheduler refresh cycles (seconds).
pub const SCHEDULER_CYCLE_INTERVAL_SECS: u64 = 60;

// =============================================================================
// JOB EXECUTION
// =============================================================================

/// Default per-job external process timeout when the catalog omits one (seconds).
pub const JOB_TIMEOUT_SECS: u64 = 60;

/// Redelivery budget: a request whose dequeue count exceeds this is dropped.
pub const RETRY_BUDGET: i32 = 2;

/// Placeholder substituted with the component coordinate in command templates.
pub const TARGET_PLACEHOLDER: &str = "$TARGET";

/// Environment variables never passed through to collector child processes.
///
/// `DATABASE_URL` carries the queue connection secret; a collector that
/// could read it could tamper with the queues directly.
pub const QUEUE_SECRET_ENV_VARS: &[&str] = &["DATABASE_URL"];

// =============================================================================
// QUEUES
// =============================================================================

/// Default logical name of the work-to-do queue.
pub const QUEUE_WORK_TO_DO: &str = "work-to-do";

/// Default logical name of the work-complete queue.
pub const QUEUE_WORK_COMPLETE: &str = "work-complete";

/// Default visibility timeout for received-but-unacknowledged messages
/// (seconds). Longer than any catalog job timeout so a healthy worker
/// always finishes (or fails) before its message reappears.
pub const VISIBILITY_TIMEOUT_SECS: u64 = 300;

// =============================================================================
// SCHEDULING
// =============================================================================

/// Lifetime of a dedup-cache entry: one week.
///
/// Because imported metadata carries no expiration, this TTL is what
/// actually paces how often a (component, job) pair is re-collected.
pub const DEDUP_TTL_SECS: u64 = 60 * 60 * 24 * 7;

// =============================================================================
// CATALOG
// =============================================================================

/// Sentinel `metadata-subtree` value meaning "handled out-of-band".
pub const SPECIAL_SUBTREE: &str = "$special";

/// Default exec-environment a worker serves when none is configured.
pub const EXEC_ENVIRONMENT: &str = "default";
