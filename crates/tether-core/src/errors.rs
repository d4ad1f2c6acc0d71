//! Error hierarchy for the session core.
//!
//! Built on [`thiserror`]:
//!
//! - [`TransitionError`]: a state change outside the allowed transition table
//! - [`AttributeError`]: attribute value type does not match its key
//! - [`StageFailure`]: a filter stage or the application handler failed while
//!   processing an event
//! - [`WriteError`]: why a write completion did not resolve successfully
//! - [`TetherError`]: umbrella enum with `#[from]` conversions
//!
//! Stage and handler hooks return [`BoxError`] so implementations can use any
//! error type; the pipeline wraps those in a [`StageFailure`] at the traversal
//! boundary.

use std::fmt;

use thiserror::Error;

use crate::state::SessionState;

/// Type-erased error returned by filter stages and handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a filter stage or handler hook.
pub type HookResult = std::result::Result<(), BoxError>;

// ─────────────────────────────────────────────────────────────────────────────
// TetherError
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level error type for the session core.
#[derive(Debug, Error)]
pub enum TetherError {
    /// Illegal state change.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Attribute type mismatch.
    #[error(transparent)]
    Attribute(#[from] AttributeError),

    /// Stage or handler failure.
    #[error(transparent)]
    Stage(#[from] StageFailure),

    /// Write did not complete.
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Result alias using [`TetherError`].
pub type Result<T> = std::result::Result<T, TetherError>;

// ─────────────────────────────────────────────────────────────────────────────
// TransitionError
// ─────────────────────────────────────────────────────────────────────────────

/// Attempted state change that is not in the allowed transition table.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("illegal session state transition from {from} to {to}")]
pub struct TransitionError {
    /// State at the time of the attempt.
    pub from: SessionState,
    /// Requested target state.
    pub to: SessionState,
}

// ─────────────────────────────────────────────────────────────────────────────
// AttributeError
// ─────────────────────────────────────────────────────────────────────────────

/// Attribute store failures.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AttributeError {
    /// The value's runtime type does not match the type declared by the key.
    #[error("attribute '{key}' expects a value of type {expected}, got {actual}")]
    TypeMismatch {
        /// Key name.
        key: String,
        /// Type bound to the key.
        expected: &'static str,
        /// Type of the offered value.
        actual: &'static str,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// StageFailure
// ─────────────────────────────────────────────────────────────────────────────

/// Where a [`StageFailure`] originated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureOrigin {
    /// A named filter stage.
    Stage(String),
    /// The application handler.
    Handler,
    /// Building or submitting a dispatch task.
    Dispatch,
}

impl fmt::Display for FailureOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stage(name) => write!(f, "stage '{name}'"),
            Self::Handler => write!(f, "handler"),
            Self::Dispatch => write!(f, "dispatch"),
        }
    }
}

/// Failure raised while processing one event.
///
/// Caught at the traversal boundary and handed to the session's exception
/// path; never propagated to the event loop.
#[derive(Debug, Error)]
#[error("{event} failed in {origin}: {message}")]
pub struct StageFailure {
    /// Event being processed (`message_received`, `session_opened`, ...).
    pub event: &'static str,
    /// Component that failed.
    pub origin: FailureOrigin,
    /// Human-readable message.
    pub message: String,
    /// Whether the failure was a panic rather than a returned error.
    pub panicked: bool,
    /// Original cause, when the failure was a returned error.
    #[source]
    pub source: Option<BoxError>,
}

impl StageFailure {
    /// Wrap an error returned by a hook.
    #[must_use]
    pub fn from_error(event: &'static str, origin: FailureOrigin, source: BoxError) -> Self {
        Self {
            event,
            origin,
            message: source.to_string(),
            panicked: false,
            source: Some(source),
        }
    }

    /// Build a failure from a caught panic payload.
    #[must_use]
    pub fn from_panic(
        event: &'static str,
        origin: FailureOrigin,
        payload: &(dyn std::any::Any + Send),
    ) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Self {
            event,
            origin,
            message,
            panicked: true,
            source: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WriteError
// ─────────────────────────────────────────────────────────────────────────────

/// Why a write future did not resolve successfully.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WriteError {
    /// The session was closing or closed when the write was attempted.
    #[error("write rejected: session is {state}")]
    Rejected {
        /// State observed by the rejection check.
        state: SessionState,
    },

    /// The completion was dropped before the transport resolved it.
    #[error("write dropped before reaching the transport")]
    Dropped,

    /// The transport reported a failure.
    #[error("write failed: {0}")]
    Failed(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
