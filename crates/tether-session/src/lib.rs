//! # tether-session
//!
//! The per-connection half of the tether session core.
//!
//! - **Service**: [`IoService`] owns the shared pipeline, handler and
//!   dispatch policy, and registers the sessions it creates
//! - **Session**: [`Session`] tracks state, stats and attributes, and turns
//!   I/O events into pipeline traversals
//! - **Filters**: [`IoFilter`] stages assembled into an immutable
//!   [`FilterChain`]
//! - **Handler**: the application's [`IoHandler`] at the inbound tail
//! - **Dispatch**: inline or executor delivery of handler events, with
//!   optional per-session ordering via [`OrderedExecutor`]
//! - **Sink**: the [`TransportSink`] at the outbound tail
//! - **Harness**: [`FilterHarness`] for driving stages without a network
//!
//! ```text
//!  I/O loop ──► stage 0 ──► stage 1 ──► … ──► dispatch ──► IoHandler
//!  sink ◄───── stage 0 ◄── stage 1 ◄── … ◄── Session::write
//! ```

#![deny(unsafe_code)]

pub mod dispatch;
pub mod errors;
pub mod filter;
pub mod handler;
pub mod harness;
pub mod metrics;
pub mod service;
pub mod session;
pub mod sink;

pub use dispatch::{
    DispatchPolicy, ExecutorDispatch, HandlerExecutor, InlineDispatch, OrderedExecutor,
    QueuedExecutor, Task, TokioExecutor,
};
pub use errors::ServiceError;
pub use filter::{FilterChain, FilterChainBuilder, IoFilter, LoggingFilter, ReadNext, WriteNext};
pub use handler::{HandlerEvent, IoHandler};
pub use harness::FilterHarness;
pub use service::{IoService, IoServiceBuilder};
pub use session::Session;
pub use sink::{ChannelSink, TransportSink};
