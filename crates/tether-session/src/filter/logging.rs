//! Stage that logs every event passing through it.

use std::sync::Arc;

use tether_core::{HookResult, IdleStatus, Message, WriteRequest};
use tracing::Level;

use super::{IoFilter, ReadNext, WriteNext};
use crate::handler::event;
use crate::session::Session;

/// Logs each event at a fixed level and forwards it unchanged.
#[derive(Clone, Debug)]
pub struct LoggingFilter {
    name: String,
    level: Level,
}

impl LoggingFilter {
    /// Filter named `name`, logging at `DEBUG`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: Level::DEBUG,
        }
    }

    /// Log at `level` instead.
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Configured level.
    pub fn level(&self) -> Level {
        self.level
    }

    fn log(&self, session: &Session, event: &str, detail: &str) {
        macro_rules! emit {
            ($lvl:expr) => {
                tracing::event!(
                    $lvl,
                    stage = %self.name,
                    session_id = %session.id(),
                    event,
                    detail,
                    "session event"
                )
            };
        }
        match self.level {
            Level::ERROR => emit!(Level::ERROR),
            Level::WARN => emit!(Level::WARN),
            Level::INFO => emit!(Level::INFO),
            Level::DEBUG => emit!(Level::DEBUG),
            _ => emit!(Level::TRACE),
        }
    }
}

fn describe(message: &Message<'_>) -> String {
    match message.byte_len() {
        Some(len) => format!("{len} bytes"),
        None => "object".to_string(),
    }
}

impl IoFilter for LoggingFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn session_opened(&self, session: &Arc<Session>) -> HookResult {
        self.log(session, event::SESSION_OPENED, "");
        Ok(())
    }

    fn session_closed(&self, session: &Arc<Session>) -> HookResult {
        self.log(session, event::SESSION_CLOSED, "");
        Ok(())
    }

    fn session_idle(&self, session: &Arc<Session>, status: IdleStatus) -> HookResult {
        self.log(session, event::SESSION_IDLE, &status.to_string());
        Ok(())
    }

    fn message_received(
        &self,
        session: &Arc<Session>,
        message: Message<'_>,
        next: &ReadNext<'_>,
    ) -> HookResult {
        self.log(session, event::MESSAGE_RECEIVED, &describe(&message));
        next.call(message)
    }

    fn message_writing(
        &self,
        session: &Arc<Session>,
        request: WriteRequest,
        next: &WriteNext<'_>,
    ) -> HookResult {
        self.log(session, event::MESSAGE_WRITING, &describe(request.message()));
        next.call(request)
    }

    fn message_sent(&self, session: &Arc<Session>, message: &Message<'static>) -> HookResult {
        self.log(session, event::MESSAGE_SENT, &describe(message));
        Ok(())
    }
}
