//! Structured logging schema and field name constants for docflow.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query a document's whole trip through the graph
//! by `document_id`.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Dispatcher could not record an outcome or submit a job |
//! | WARN  | Job failure, stale cell, duplicate completion |
//! | INFO  | Document lifecycle (created, finished, erroneous), worker start/stop |
//! | DEBUG | Per-edge decisions, submissions |
//! | TRACE | Per-item loop expansion |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "core", "db", "jobs", "cli"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "dispatcher", "transitions", "worker", "watchdog", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "on_job_finished", "record_outcome", "submit", "sweep"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Document UUID being operated on.
pub const DOCUMENT_ID: &str = "document_id";

/// Project UUID owning the document.
pub const PROJECT_ID: &str = "project_id";

/// Folder UUID grouping the document.
pub const FOLDER_ID: &str = "folder_id";

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Job type enum variant.
pub const JOB_TYPE: &str = "job_type";

/// Document type (text, image, audio, video).
pub const DOCTYPE: &str = "doctype";

// ─── Graph fields ──────────────────────────────────────────────────────────

/// Number of jobs produced by one completion.
pub const FAN_OUT: &str = "fan_out";

/// Kind of edge evaluated ("direct", "switch", "loop").
pub const EDGE: &str = "edge";

/// Key selected by a switch edge.
pub const SWITCH_KEY: &str = "switch_key";

/// Aggregate status after a recording.
pub const AGGREGATE_STATUS: &str = "aggregate_status";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Retry attempt number.
pub const ATTEMPT: &str = "attempt";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
