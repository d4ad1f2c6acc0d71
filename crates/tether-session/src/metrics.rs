//! Metric names recorded through the `metrics` facade.
//!
//! No recorder is installed here; the embedding application picks one.

// Metric name constants to avoid typos across modules.

/// Sessions created total (counter).
pub const SESSIONS_CREATED_TOTAL: &str = "sessions_created_total";
/// Sessions currently registered with a service (gauge).
pub const SESSIONS_ACTIVE: &str = "sessions_active";
/// Session lifetime seconds, created to closed (histogram).
pub const SESSION_DURATION_SECONDS: &str = "session_duration_seconds";
/// Bytes read total (counter).
pub const BYTES_READ_TOTAL: &str = "bytes_read_total";
/// Bytes written total (counter).
pub const BYTES_WRITTEN_TOTAL: &str = "bytes_written_total";
/// Writes rejected because the session was closing (counter, labels: state).
pub const WRITES_REJECTED_TOTAL: &str = "writes_rejected_total";
/// Stage or handler failures (counter, labels: event, origin).
pub const STAGE_FAILURES_TOTAL: &str = "stage_failures_total";
/// Handler tasks submitted to an executor (counter).
pub const DISPATCH_TASKS_TOTAL: &str = "dispatch_tasks_total";
