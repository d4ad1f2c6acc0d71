//! The application handler and the events delivered to it.

use std::fmt;
use std::sync::Arc;

use tether_core::{HookResult, IdleStatus, Message, StageFailure};

use crate::session::Session;

/// Event names used in logs, metrics labels and [`StageFailure::event`].
pub mod event {
    /// Session registered with its service.
    pub const SESSION_CREATED: &str = "session_created";
    /// Session became usable.
    pub const SESSION_OPENED: &str = "session_opened";
    /// Session closed.
    pub const SESSION_CLOSED: &str = "session_closed";
    /// Session idle.
    pub const SESSION_IDLE: &str = "session_idle";
    /// Inbound message.
    pub const MESSAGE_RECEIVED: &str = "message_received";
    /// Outbound write traversal.
    pub const MESSAGE_WRITING: &str = "message_writing";
    /// Outbound write completed by the transport.
    pub const MESSAGE_SENT: &str = "message_sent";
    /// Failure delivered to the handler.
    pub const EXCEPTION_CAUGHT: &str = "exception_caught";
}

/// Application callbacks for one service's sessions.
///
/// Depending on the service's dispatch policy these run on the I/O thread
/// or on executor workers. Errors and panics are reported to
/// [`exception_caught`](IoHandler::exception_caught); a failure inside
/// `exception_caught` itself is only logged.
pub trait IoHandler: Send + Sync {
    /// Session registered. Always runs inline on the creating thread.
    fn session_created(&self, _session: &Arc<Session>) -> HookResult {
        Ok(())
    }

    /// Session opened.
    fn session_opened(&self, _session: &Arc<Session>) -> HookResult {
        Ok(())
    }

    /// Session closed.
    fn session_closed(&self, _session: &Arc<Session>) -> HookResult {
        Ok(())
    }

    /// Session idle.
    fn session_idle(&self, _session: &Arc<Session>, _status: IdleStatus) -> HookResult {
        Ok(())
    }

    /// Message that passed the whole inbound pipeline.
    fn message_received(&self, _session: &Arc<Session>, _message: Message<'_>) -> HookResult {
        Ok(())
    }

    /// Message the transport finished writing.
    fn message_sent(&self, _session: &Arc<Session>, _message: Message<'static>) -> HookResult {
        Ok(())
    }

    /// A stage or handler callback failed.
    fn exception_caught(&self, _session: &Arc<Session>, _failure: &StageFailure) -> HookResult {
        Ok(())
    }
}

/// One handler-bound event.
pub enum HandlerEvent<'a> {
    /// See [`IoHandler::session_opened`].
    Opened,
    /// See [`IoHandler::session_closed`].
    Closed,
    /// See [`IoHandler::session_idle`].
    Idle(IdleStatus),
    /// See [`IoHandler::message_received`].
    Received(Message<'a>),
    /// See [`IoHandler::message_sent`].
    Sent(Message<'static>),
    /// See [`IoHandler::exception_caught`].
    Exception(StageFailure),
}

impl<'a> HandlerEvent<'a> {
    /// Event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Opened => event::SESSION_OPENED,
            Self::Closed => event::SESSION_CLOSED,
            Self::Idle(_) => event::SESSION_IDLE,
            Self::Received(_) => event::MESSAGE_RECEIVED,
            Self::Sent(_) => event::MESSAGE_SENT,
            Self::Exception(_) => event::EXCEPTION_CAUGHT,
        }
    }

    /// Whether this is an exception delivery.
    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception(_))
    }

    /// Own everything, copying a received message that still borrows the
    /// I/O loop's buffer.
    pub fn detach(self) -> HandlerEvent<'static> {
        match self {
            Self::Opened => HandlerEvent::Opened,
            Self::Closed => HandlerEvent::Closed,
            Self::Idle(status) => HandlerEvent::Idle(status),
            Self::Received(message) => HandlerEvent::Received(message.detach()),
            Self::Sent(message) => HandlerEvent::Sent(message),
            Self::Exception(failure) => HandlerEvent::Exception(failure),
        }
    }

    /// Call the matching handler method.
    pub fn deliver(self, handler: &dyn IoHandler, session: &Arc<Session>) -> HookResult {
        match self {
            Self::Opened => handler.session_opened(session),
            Self::Closed => handler.session_closed(session),
            Self::Idle(status) => handler.session_idle(session, status),
            Self::Received(message) => handler.message_received(session, message),
            Self::Sent(message) => handler.message_sent(session, message),
            Self::Exception(failure) => handler.exception_caught(session, &failure),
        }
    }
}

impl fmt::Debug for HandlerEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle(status) => f.debug_tuple("Idle").field(status).finish(),
            Self::Received(message) => f.debug_tuple("Received").field(message).finish(),
            Self::Sent(message) => f.debug_tuple("Sent").field(message).finish(),
            Self::Exception(failure) => f.debug_tuple("Exception").field(&failure.message).finish(),
            other => f.write_str(other.name()),
        }
    }
}
