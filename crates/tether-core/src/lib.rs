//! # tether-core
//!
//! Foundation types for the tether connection-session core.
//!
//! - **State**: [`SessionState`] and the thread-safe [`StateMachine`] that
//!   enforces the allowed transition table
//! - **Ids**: process-wide [`SessionId`] allocation
//! - **Messages**: [`Message`], which borrows the I/O loop's buffer until it
//!   is detached for asynchronous hand-off
//! - **Attributes**: typed per-session [`AttributeStore`]
//! - **Writes**: [`WriteRequest`] and its completion [`WriteFuture`]
//! - **Stats**: per-session byte counters and activity times
//! - **Errors**: [`TetherError`] hierarchy via `thiserror`
//! - **Logging**: `tracing` subscriber setup and test capture

#![deny(unsafe_code)]

pub mod attributes;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod message;
pub mod state;
pub mod stats;
pub mod write;

pub use attributes::{AttributeKey, AttributeStore, AttributeValue};
pub use errors::{
    AttributeError, BoxError, FailureOrigin, HookResult, StageFailure, TetherError,
    TransitionError, WriteError,
};
pub use ids::SessionId;
pub use message::Message;
pub use state::{IdleStatus, SessionState, StateMachine};
pub use stats::{IoStats, now_millis};
pub use write::{WriteCompletion, WriteFuture, WriteRequest};
