//! Handler dispatch: where handler callbacks run.
//!
//! A service picks one [`DispatchPolicy`] at construction and every session
//! uses it unchanged:
//!
//! - [`InlineDispatch`] calls the handler on the I/O thread that observed
//!   the event. A received message is handed over still borrowing the
//!   loop's buffer.
//! - [`ExecutorDispatch`] detaches the event (copying a borrowed message)
//!   and submits a task to a [`HandlerExecutor`]. Handler failures on a
//!   worker are reported to `exception_caught` on that same worker.

mod executor;
mod ordered;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use metrics::counter;
use tether_core::{FailureOrigin, HookResult, StageFailure};
use tracing::error;

use crate::handler::{HandlerEvent, IoHandler};
use crate::metrics::DISPATCH_TASKS_TOTAL;
use crate::session::Session;

pub use executor::{HandlerExecutor, QueuedExecutor, Task, TokioExecutor};
pub use ordered::OrderedExecutor;

/// Delivery strategy for handler events.
pub trait DispatchPolicy: Send + Sync + fmt::Debug {
    /// Deliver `event` to `handler`.
    ///
    /// Returns the failure when it is known synchronously: a handler error
    /// on the inline path, or a rejected task submission.
    fn dispatch(
        &self,
        session: &Arc<Session>,
        handler: &Arc<dyn IoHandler>,
        event: HandlerEvent<'_>,
    ) -> Result<(), StageFailure>;
}

/// Run handlers on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineDispatch;

impl DispatchPolicy for InlineDispatch {
    fn dispatch(
        &self,
        session: &Arc<Session>,
        handler: &Arc<dyn IoHandler>,
        event: HandlerEvent<'_>,
    ) -> Result<(), StageFailure> {
        deliver_guarded(handler.as_ref(), session, event)
    }
}

/// Run handlers as tasks on an executor.
#[derive(Clone)]
pub struct ExecutorDispatch {
    executor: Arc<dyn HandlerExecutor>,
}

impl ExecutorDispatch {
    /// Dispatch through `executor`.
    pub fn new(executor: Arc<dyn HandlerExecutor>) -> Self {
        Self { executor }
    }

    /// Underlying executor.
    pub fn executor(&self) -> &Arc<dyn HandlerExecutor> {
        &self.executor
    }
}

impl DispatchPolicy for ExecutorDispatch {
    fn dispatch(
        &self,
        session: &Arc<Session>,
        handler: &Arc<dyn IoHandler>,
        event: HandlerEvent<'_>,
    ) -> Result<(), StageFailure> {
        let event = event.detach();
        let name = event.name();
        let task_session = Arc::clone(session);
        let task_handler = Arc::clone(handler);
        self.executor
            .execute(
                session.id(),
                Box::new(move || run_on_worker(&task_session, task_handler.as_ref(), event)),
            )
            .map_err(|err| StageFailure::from_error(name, FailureOrigin::Dispatch, err))?;
        counter!(DISPATCH_TASKS_TOTAL).increment(1);
        Ok(())
    }
}

impl fmt::Debug for ExecutorDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorDispatch")
            .field("executor", &self.executor)
            .finish()
    }
}

/// Call the handler, converting an error or panic into a [`StageFailure`].
pub(crate) fn deliver_guarded(
    handler: &dyn IoHandler,
    session: &Arc<Session>,
    event: HandlerEvent<'_>,
) -> Result<(), StageFailure> {
    let name = event.name();
    guard_handler(name, || event.deliver(handler, session))
}

/// Run one handler callback for `event` under the same guard.
pub(crate) fn guard_handler(
    event: &'static str,
    call: impl FnOnce() -> HookResult,
) -> Result<(), StageFailure> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(StageFailure::from_error(event, FailureOrigin::Handler, err)),
        Err(payload) => Err(StageFailure::from_panic(event, FailureOrigin::Handler, &*payload)),
    }
}

/// Body of every executor task.
fn run_on_worker(session: &Arc<Session>, handler: &dyn IoHandler, event: HandlerEvent<'static>) {
    let is_exception = event.is_exception();
    let Err(failure) = deliver_guarded(handler, session, event) else {
        return;
    };
    if is_exception {
        error!(session_id = %session.id(), error = %failure, "exception handler failed");
        return;
    }
    session.record_failure(&failure);
    if let Err(nested) = deliver_guarded(handler, session, HandlerEvent::Exception(failure)) {
        error!(session_id = %session.id(), error = %nested, "exception handler failed");
    }
}
