//! Session lifecycle state machine.
//!
//! State is read on every write attempt and changed a handful of times per
//! connection, so it sits behind a reader/writer lock. The write lock is
//! held only for the compare-and-set inside [`StateMachine::transition`].

use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::TransitionError;

/// Lifecycle state of one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Session object exists; connection not yet usable.
    Created,
    /// Plain connection established.
    Connected,
    /// Security handshake in progress.
    Securing,
    /// Security handshake complete.
    Secured,
    /// Close requested; writes are rejected.
    Closing,
    /// Terminal state.
    Closed,
}

impl SessionState {
    /// Whether `self -> to` is in the allowed transition table.
    #[must_use]
    pub fn can_transition_to(self, to: SessionState) -> bool {
        use SessionState::{Closed, Closing, Connected, Created, Secured, Securing};
        matches!(
            (self, to),
            (Created, Connected | Securing | Closing)
                | (Connected, Securing | Closing)
                | (Securing, Secured | Closing)
                | (Secured, Connected | Securing | Closing)
                | (Closing, Closed)
        )
    }

    /// `true` for [`Closing`](Self::Closing) and [`Closed`](Self::Closed).
    #[must_use]
    pub fn is_closing_or_closed(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }

    /// All states, in lifecycle order.
    #[must_use]
    pub fn all() -> &'static [SessionState] {
        &[
            Self::Created,
            Self::Connected,
            Self::Securing,
            Self::Secured,
            Self::Closing,
            Self::Closed,
        ]
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::Securing => write!(f, "SECURING"),
            Self::Secured => write!(f, "SECURED"),
            Self::Closing => write!(f, "CLOSING"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Thread-safe holder of a [`SessionState`].
#[derive(Debug)]
pub struct StateMachine {
    state: RwLock<SessionState>,
}

impl StateMachine {
    /// New machine in [`SessionState::Created`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SessionState::Created),
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Whether the current state equals `state`.
    pub fn is(&self, state: SessionState) -> bool {
        *self.state.read() == state
    }

    /// Move to `to` if the table allows it.
    ///
    /// Returns the previous state. On failure the state is unchanged.
    pub fn transition(&self, to: SessionState) -> Result<SessionState, TransitionError> {
        let mut guard = self.state.write();
        let from = *guard;
        if !from.can_transition_to(to) {
            return Err(TransitionError { from, to });
        }
        *guard = to;
        drop(guard);
        debug!(%from, %to, "session state changed");
        Ok(from)
    }

    /// Transition only if the current state is `from`.
    ///
    /// Returns `Ok(false)` when the state is something else, which lets
    /// lifecycle code race benignly with other threads (two closers, for
    /// example) without tripping an [`TransitionError`].
    pub fn transition_from(
        &self,
        from: SessionState,
        to: SessionState,
    ) -> Result<bool, TransitionError> {
        let mut guard = self.state.write();
        if *guard != from {
            return Ok(false);
        }
        if !from.can_transition_to(to) {
            return Err(TransitionError { from, to });
        }
        *guard = to;
        drop(guard);
        debug!(%from, %to, "session state changed");
        Ok(true)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Which direction of a connection has been idle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleStatus {
    /// Nothing read for the configured period.
    ReaderIdle,
    /// Nothing written for the configured period.
    WriterIdle,
    /// Neither read nor written.
    BothIdle,
}

impl fmt::Display for IdleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReaderIdle => write!(f, "reader idle"),
            Self::WriterIdle => write!(f, "writer idle"),
            Self::BothIdle => write!(f, "both idle"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
