//! Errors raised while assembling a service.
//!
//! Runtime failures inside a session never surface here; they go through
//! the session's exception path as [`StageFailure`](tether_core::StageFailure).

use thiserror::Error;

/// Service and pipeline construction errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// A stage with this name is already in the pipeline.
    #[error("filter '{0}' is already in the chain")]
    DuplicateFilter(String),

    /// Positional insert referenced a stage that does not exist.
    #[error("no filter named '{0}' in the chain")]
    UnknownFilter(String),

    /// Executor dispatch was requested without an executor or tokio runtime.
    #[error("executor dispatch needs an executor or a running tokio runtime")]
    NoExecutor,
}
