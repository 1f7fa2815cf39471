//! Structured logging schema and field name constants for depscope.
//!
//! All crates use these field names for consistent structured logging so
//! log aggregation tools can query by standardized names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied (dropped message, skipped definition) |
//! | INFO  | Lifecycle events (startup, shutdown), cycle completions |
//! | DEBUG | Decision points (skip reasons, assembled commands, cache hits) |
//! | TRACE | Per-item iteration over components and catalog entries |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "scheduler", "worker", "importer", "queue", "db"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "executor", "pool", "dedup"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "run_cycle", "receive", "execute", "import"
pub const OPERATION: &str = "op";

/// Correlation ID propagated from request to response for tracing.
pub const CORRELATION_ID: &str = "correlation_id";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Package coordinate of the component being operated on.
pub const TARGET: &str = "target";

/// Catalog job name.
pub const JOB_NAME: &str = "job_name";

/// Queue message row id.
pub const MESSAGE_ID: &str = "message_id";

/// Times a message has been received (redelivery counter).
pub const DEQUEUE_COUNT: &str = "dequeue_count";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of requests enqueued by a scheduler cycle.
pub const ENQUEUED: &str = "enqueued";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
