//! Filter stages and the pipeline they form.
//!
//! A pipeline is an ordered, immutable list of [`IoFilter`] stages shared by
//! every session of a service. Inbound events travel from index 0 toward
//! the tail (the handler); outbound writes travel from the last index toward
//! 0 and then to the transport sink.
//!
//! Message hooks use a push model: a stage receives the message and a
//! continuation ([`ReadNext`] / [`WriteNext`]) and calls it zero, one or
//! many times. A decoder that buffers a partial frame calls it zero times;
//! one that finds three frames in a read calls it three times. Lifecycle
//! hooks are plain notifications; every stage sees them.
//!
//! Stages are shared across sessions and called from many I/O threads, so
//! they hold no per-connection state of their own. Per-connection state goes
//! in the session's attribute store.

mod chain;
mod logging;

use std::sync::Arc;

use tether_core::{HookResult, IdleStatus, Message, WriteRequest};

use crate::session::Session;

pub(crate) use chain::into_failure;
pub use chain::{FilterChain, FilterChainBuilder, ReadNext, WriteNext};
pub use logging::LoggingFilter;

/// One stage of a filter pipeline.
///
/// Every hook defaults to pass-through. Errors returned from a hook, and
/// panics raised inside one, are caught at the traversal boundary and
/// reported once to the session's exception path.
pub trait IoFilter: Send + Sync {
    /// Name of the stage, unique within a pipeline.
    fn name(&self) -> &str;

    /// Connection became usable.
    fn session_opened(&self, _session: &Arc<Session>) -> HookResult {
        Ok(())
    }

    /// Connection closed.
    fn session_closed(&self, _session: &Arc<Session>) -> HookResult {
        Ok(())
    }

    /// No traffic in one or both directions.
    fn session_idle(&self, _session: &Arc<Session>, _status: IdleStatus) -> HookResult {
        Ok(())
    }

    /// Inbound message. Forward with `next.call(..)`.
    ///
    /// A [`Message::Borrowed`] view is only valid for this call; anything
    /// kept past it must be copied or [`Message::detach`]ed.
    fn message_received(
        &self,
        _session: &Arc<Session>,
        message: Message<'_>,
        next: &ReadNext<'_>,
    ) -> HookResult {
        next.call(message)
    }

    /// Outbound write on its way to the transport. Forward with `next.call(..)`.
    fn message_writing(
        &self,
        _session: &Arc<Session>,
        request: WriteRequest,
        next: &WriteNext<'_>,
    ) -> HookResult {
        next.call(request)
    }

    /// The transport finished writing `message`.
    fn message_sent(&self, _session: &Arc<Session>, _message: &Message<'static>) -> HookResult {
        Ok(())
    }
}
