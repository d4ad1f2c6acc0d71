//! Task executors used by [`ExecutorDispatch`](super::ExecutorDispatch).

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tether_core::{BoxError, SessionId};
use tokio::runtime::Handle;

/// A unit of handler work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs handler tasks off the I/O thread.
///
/// Must accept concurrent submission from many I/O threads. The session id
/// lets an implementation keep one session's tasks in order.
pub trait HandlerExecutor: Send + Sync + fmt::Debug {
    /// Schedule `task`. An error means the task was not accepted and will
    /// never run.
    fn execute(&self, session: SessionId, task: Task) -> Result<(), BoxError>;
}

/// Runs each task on the tokio blocking pool.
///
/// No ordering between tasks, even for one session. Wrap in an
/// [`OrderedExecutor`](super::OrderedExecutor) when order matters.
#[derive(Clone, Debug)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    /// Executor on the runtime behind `handle`.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Executor on the current runtime, if called from inside one.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl HandlerExecutor for TokioExecutor {
    fn execute(&self, _session: SessionId, task: Task) -> Result<(), BoxError> {
        // detached; the task's own guard reports failures
        drop(self.handle.spawn_blocking(task));
        Ok(())
    }
}

/// Holds tasks until the owner runs them.
///
/// Lets a single thread drive asynchronous dispatch step by step: tests,
/// and embeddings that run handler work from their own loop.
#[derive(Default)]
pub struct QueuedExecutor {
    queue: Mutex<VecDeque<(SessionId, Task)>>,
    shut_down: AtomicBool,
}

impl QueuedExecutor {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the oldest task. Returns `false` if there was none.
    pub fn run_one(&self) -> bool {
        let next = self.queue.lock().pop_front();
        match next {
            Some((_, task)) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run tasks until the queue is empty, including tasks queued while
    /// running. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Session ids of the queued tasks, oldest first.
    pub fn queued_sessions(&self) -> Vec<SessionId> {
        self.queue.lock().iter().map(|(id, _)| *id).collect()
    }

    /// Refuse all further tasks. Already queued tasks stay runnable.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
    }
}

impl HandlerExecutor for QueuedExecutor {
    fn execute(&self, session: SessionId, task: Task) -> Result<(), BoxError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err("executor is shut down".into());
        }
        self.queue.lock().push_back((session, task));
        Ok(())
    }
}

impl fmt::Debug for QueuedExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedExecutor")
            .field("queued", &self.len())
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish()
    }
}
