//! One connection's session.
//!
//! The I/O layer drives a session through the `on_*` entry points; the
//! application writes through [`Session::write`] and friends. Every event
//! runs the service's filter pipeline and ends at the handler (inbound) or
//! the transport sink (outbound). Failures raised anywhere along the way are
//! caught at the traversal boundary and reported once to the exception path;
//! none of these methods return an error to the I/O loop.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use tether_core::{
    AttributeError, AttributeKey, AttributeStore, FailureOrigin, HookResult, IdleStatus, IoStats,
    Message, SessionId, SessionState, StageFailure, StateMachine, TransitionError, WriteError,
    WriteFuture, WriteRequest, now_millis,
};
use tracing::{debug, error, warn};

use crate::dispatch::{DispatchPolicy, guard_handler};
use crate::filter::{FilterChain, IoFilter, ReadNext, WriteNext, into_failure};
use crate::handler::{HandlerEvent, IoHandler, event};
use crate::metrics::{
    BYTES_READ_TOTAL, BYTES_WRITTEN_TOTAL, SESSION_DURATION_SECONDS, STAGE_FAILURES_TOTAL,
    WRITES_REJECTED_TOTAL,
};
use crate::service::IoService;
use crate::sink::TransportSink;

/// A single connection.
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    state: StateMachine,
    opened: AtomicBool,
    secured: AtomicBool,
    close_notified: AtomicBool,
    stats: IoStats,
    attributes: AttributeStore,
    chain: FilterChain,
    handler: Option<Arc<dyn IoHandler>>,
    dispatch: Arc<dyn DispatchPolicy>,
    sink: Arc<dyn TransportSink>,
    service: Weak<IoService>,
}

impl Session {
    pub(crate) fn new(service: &Arc<IoService>, sink: Arc<dyn TransportSink>) -> Arc<Self> {
        Arc::new(Self {
            id: SessionId::next(),
            created_at: Utc::now(),
            state: StateMachine::new(),
            opened: AtomicBool::new(false),
            secured: AtomicBool::new(false),
            close_notified: AtomicBool::new(false),
            stats: IoStats::new(),
            attributes: AttributeStore::new(),
            chain: service.filter_chain().clone(),
            handler: service.handler().cloned(),
            dispatch: Arc::clone(service.dispatch()),
            sink,
            service: Arc::downgrade(service),
        })
    }

    // ── Identity ────────────────────────────────────────────────────

    /// Process-unique id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// When the session object was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Owning service, while it is alive.
    pub fn service(&self) -> Option<Arc<IoService>> {
        self.service.upgrade()
    }

    /// The pipeline this session runs.
    pub fn filter_chain(&self) -> &FilterChain {
        &self.chain
    }

    // ── State ───────────────────────────────────────────────────────

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state.state()
    }

    /// Move to `to` if the transition table allows it. Returns the previous state.
    pub fn transition(&self, to: SessionState) -> Result<SessionState, TransitionError> {
        self.state.transition(to)
    }

    /// State is `CREATED`.
    pub fn is_created(&self) -> bool {
        self.state.is(SessionState::Created)
    }

    /// State is `CONNECTED`.
    pub fn is_connected(&self) -> bool {
        self.state.is(SessionState::Connected)
    }

    /// State is `SECURING`.
    pub fn is_securing(&self) -> bool {
        self.state.is(SessionState::Securing)
    }

    /// State is `SECURED`.
    pub fn is_secured_state(&self) -> bool {
        self.state.is(SessionState::Secured)
    }

    /// Connection usable: `CONNECTED`, `SECURING` or `SECURED`.
    pub fn is_open(&self) -> bool {
        matches!(
            self.state(),
            SessionState::Connected | SessionState::Securing | SessionState::Secured
        )
    }

    /// State is `CLOSING`.
    pub fn is_closing(&self) -> bool {
        self.state.is(SessionState::Closing)
    }

    /// State is `CLOSED`.
    pub fn is_closed(&self) -> bool {
        self.state.is(SessionState::Closed)
    }

    /// Set by the TLS collaborator once the handshake has completed.
    pub fn set_secured(&self, secured: bool) {
        self.secured.store(secured, Ordering::Release);
    }

    /// Whether traffic is encrypted.
    pub fn is_secured(&self) -> bool {
        self.secured.load(Ordering::Acquire)
    }

    // ── Stats ───────────────────────────────────────────────────────

    /// Byte counters and activity times.
    pub fn stats(&self) -> &IoStats {
        &self.stats
    }

    /// Report `count` bytes written to the socket.
    pub fn increment_written_bytes(&self, count: u64) {
        self.stats.record_write(count, now_millis());
        counter!(BYTES_WRITTEN_TOTAL).increment(count);
    }

    // ── Attributes ──────────────────────────────────────────────────

    /// The full attribute store.
    pub fn attributes(&self) -> &AttributeStore {
        &self.attributes
    }

    /// Attribute value, or `None` if unset.
    pub fn get_attribute<T>(&self, key: &AttributeKey<T>) -> Option<T>
    where
        T: Any + Send + Sync + Clone,
    {
        self.attributes.get(key)
    }

    /// Attribute value, or `default` if unset.
    pub fn get_attribute_or<T>(&self, key: &AttributeKey<T>, default: T) -> T
    where
        T: Any + Send + Sync + Clone,
    {
        self.attributes.get_or(key, default)
    }

    /// Bind an attribute, returning the previous value.
    pub fn set_attribute<T>(&self, key: &AttributeKey<T>, value: T) -> Result<Option<T>, AttributeError>
    where
        T: Any + Send + Sync,
    {
        self.attributes.set(key, value)
    }

    /// Remove an attribute, returning its value.
    pub fn remove_attribute<T>(&self, key: &AttributeKey<T>) -> Result<Option<T>, AttributeError>
    where
        T: Any + Send + Sync,
    {
        self.attributes.remove(key)
    }

    // ── Lifecycle (I/O side) ────────────────────────────────────────

    /// The connection is usable: `CREATED → CONNECTED`, then notify.
    ///
    /// Ignored on a closing or closed session and after the first call.
    pub fn on_open(self: &Arc<Self>) {
        let state = self.state();
        if state.is_closing_or_closed() {
            warn!(session_id = %self.id, %state, "on_open ignored, session is closing");
            return;
        }
        if self.opened.swap(true, Ordering::AcqRel) {
            debug!(session_id = %self.id, "on_open ignored, already opened");
            return;
        }
        let _ = self
            .state
            .transition_from(SessionState::Created, SessionState::Connected);
        debug!(session_id = %self.id, "session opened");
        self.fire_lifecycle(
            event::SESSION_OPENED,
            |stage| stage.session_opened(self),
            HandlerEvent::Opened,
        );
    }

    /// The connection is gone: finish the lifecycle, notify and unregister.
    ///
    /// Drives the state to `CLOSED` from wherever it is, including a session
    /// an external caller already moved to `CLOSED`. Only the first call
    /// notifies and unregisters.
    pub fn on_close(self: &Arc<Self>) {
        let _ = self.begin_closing();
        let _ = self
            .state
            .transition_from(SessionState::Closing, SessionState::Closed);
        if self.close_notified.swap(true, Ordering::AcqRel) {
            debug!(session_id = %self.id, "on_close ignored, already notified");
            return;
        }

        self.fire_lifecycle(
            event::SESSION_CLOSED,
            |stage| stage.session_closed(self),
            HandlerEvent::Closed,
        );

        if let Some(service) = self.service.upgrade() {
            let _ = service.unregister(self.id);
        }
        let lifetime = (Utc::now() - self.created_at).to_std().unwrap_or_default();
        histogram!(SESSION_DURATION_SECONDS).record(lifetime.as_secs_f64());
        debug!(session_id = %self.id, "session closed");
    }

    /// No traffic for the configured period.
    pub fn on_idle(self: &Arc<Self>, status: IdleStatus) {
        if self.is_closed() {
            return;
        }
        self.fire_lifecycle(
            event::SESSION_IDLE,
            |stage| stage.session_idle(self, status),
            HandlerEvent::Idle(status),
        );
    }

    /// Bytes read from the socket.
    ///
    /// `bytes` may be the I/O loop's reusable buffer; it is only borrowed
    /// for the duration of this call. Dropped without touching the read
    /// counters once the session is `CLOSED`.
    pub fn on_message_received(self: &Arc<Self>, bytes: &[u8]) {
        if self.is_closed() {
            debug!(session_id = %self.id, "read after close dropped");
            return;
        }
        let count = bytes.len() as u64;
        self.stats.record_read(count, now_millis());
        counter!(BYTES_READ_TOTAL).increment(count);
        self.fire_message_received(Message::borrowed(bytes));
    }

    /// Run any inbound message through the pipeline.
    ///
    /// Messages still arriving while `CLOSING` are processed; after `CLOSED`
    /// they are dropped.
    pub fn fire_message_received(self: &Arc<Self>, message: Message<'_>) {
        if self.is_closed() {
            debug!(session_id = %self.id, "message after close dropped");
            return;
        }
        let next = ReadNext::new(self, self.chain.stages());
        if let Err(err) = next.call(message) {
            self.fire_exception(into_failure(event::MESSAGE_RECEIVED, err));
        }
    }

    /// The transport finished writing `message`. Stages see it last to first.
    pub fn on_message_sent(self: &Arc<Self>, message: Message<'static>) {
        let result = self
            .chain
            .fire_reverse(event::MESSAGE_SENT, |stage| stage.message_sent(self, &message))
            .map_err(|err| into_failure(event::MESSAGE_SENT, err))
            .and_then(|()| self.dispatch_event(HandlerEvent::Sent(message)));
        if let Err(failure) = result {
            self.fire_exception(failure);
        }
    }

    // ── Application side ────────────────────────────────────────────

    /// Fire-and-forget write.
    pub fn write(self: &Arc<Self>, message: impl Into<Message<'static>>) {
        self.write_request(WriteRequest::new(message));
    }

    /// Write and observe the outcome.
    pub fn write_with_future(self: &Arc<Self>, message: impl Into<Message<'static>>) -> WriteFuture {
        let (request, future) = WriteRequest::with_future(message);
        self.write_request(request);
        future
    }

    /// Run a prepared request through the outbound pipeline.
    ///
    /// Rejected without entering the pipeline when the session is closing
    /// or closed; the request's future resolves to [`WriteError::Rejected`].
    pub fn write_request(self: &Arc<Self>, request: WriteRequest) {
        let state = self.state();
        if state.is_closing_or_closed() {
            warn!(session_id = %self.id, %state, "write rejected, session is closing");
            counter!(WRITES_REJECTED_TOTAL, "state" => state.to_string()).increment(1);
            request.fail(WriteError::Rejected { state });
            return;
        }
        let next = WriteNext::new(self, self.chain.stages());
        if let Err(err) = next.call(request) {
            self.fire_exception(into_failure(event::MESSAGE_WRITING, err));
        }
    }

    /// Ask for the session to close. Further writes are rejected at once.
    ///
    /// Returns `true` if this call started closing. The I/O layer completes
    /// the close with [`on_close`](Self::on_close).
    pub fn close(&self) -> bool {
        let previous = self.begin_closing();
        let initiated = !previous.is_closing_or_closed();
        if initiated {
            debug!(session_id = %self.id, from = %previous, "close requested");
        }
        initiated
    }

    // ── Internals ───────────────────────────────────────────────────

    pub(crate) fn sink(&self) -> &dyn TransportSink {
        self.sink.as_ref()
    }

    /// Move to `CLOSING` unless already there. Returns the state seen before.
    fn begin_closing(&self) -> SessionState {
        loop {
            let current = self.state.state();
            if current.is_closing_or_closed() {
                return current;
            }
            if let Ok(true) = self
                .state
                .transition_from(current, SessionState::Closing)
            {
                return current;
            }
        }
    }

    pub(crate) fn notify_created(self: &Arc<Self>) {
        let Some(handler) = &self.handler else {
            return;
        };
        if let Err(failure) = guard_handler(event::SESSION_CREATED, || handler.session_created(self))
        {
            self.fire_exception(failure);
        }
    }

    pub(crate) fn deliver_received(self: &Arc<Self>, message: Message<'_>) -> Result<(), StageFailure> {
        self.dispatch_event(HandlerEvent::Received(message))
    }

    fn fire_lifecycle(
        self: &Arc<Self>,
        event: &'static str,
        hook: impl FnMut(&dyn IoFilter) -> HookResult,
        handler_event: HandlerEvent<'static>,
    ) {
        let result = self
            .chain
            .fire_forward(event, hook)
            .map_err(|err| into_failure(event, err))
            .and_then(|()| self.dispatch_event(handler_event));
        if let Err(failure) = result {
            self.fire_exception(failure);
        }
    }

    fn dispatch_event(self: &Arc<Self>, event: HandlerEvent<'_>) -> Result<(), StageFailure> {
        match &self.handler {
            Some(handler) => self.dispatch.dispatch(self, handler, event),
            None => Ok(()),
        }
    }

    /// Exception path: log, count, then hand to the handler per the policy.
    pub(crate) fn fire_exception(self: &Arc<Self>, failure: StageFailure) {
        self.record_failure(&failure);
        let Some(handler) = &self.handler else {
            return;
        };
        if let Err(nested) = self
            .dispatch
            .dispatch(self, handler, HandlerEvent::Exception(failure))
        {
            error!(session_id = %self.id, error = %nested, "exception handler failed");
        }
    }

    pub(crate) fn record_failure(&self, failure: &StageFailure) {
        let origin = match failure.origin {
            FailureOrigin::Stage(_) => "stage",
            FailureOrigin::Handler => "handler",
            FailureOrigin::Dispatch => "dispatch",
        };
        error!(
            session_id = %self.id,
            event = failure.event,
            origin = %failure.origin,
            panicked = failure.panicked,
            error = %failure.message,
            "session event failed"
        );
        counter!(STAGE_FAILURES_TOTAL, "event" => failure.event, "origin" => origin).increment(1);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("secured", &self.is_secured())
            .field("attributes", &self.attributes.len())
            .finish_non_exhaustive()
    }
}
