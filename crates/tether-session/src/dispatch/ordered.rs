//! Per-session FIFO on top of any executor.
//!
//! Each session with pending work has one queue in a concurrent map. The
//! queue exists exactly while a drain job for that session is scheduled or
//! running, so submission only schedules a drain when it creates the queue.
//! A drain runs at most `drain_batch` tasks, then resubmits itself so one
//! busy session cannot monopolize a worker.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tether_core::{BoxError, SessionId};
use tracing::{error, warn};

use super::executor::{HandlerExecutor, Task};

/// Runs one session's tasks in submission order; different sessions run
/// concurrently on the inner executor.
#[derive(Clone)]
pub struct OrderedExecutor {
    shared: Arc<Shared>,
}

struct Shared {
    inner: Arc<dyn HandlerExecutor>,
    queues: DashMap<SessionId, Mutex<VecDeque<Task>>>,
    drain_batch: usize,
}

impl OrderedExecutor {
    /// Order tasks on top of `inner`, draining up to `drain_batch` tasks per
    /// session per turn (at least one).
    pub fn new(inner: Arc<dyn HandlerExecutor>, drain_batch: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner,
                queues: DashMap::new(),
                drain_batch: drain_batch.max(1),
            }),
        }
    }

    /// Tasks waiting for `session`, excluding one currently running.
    pub fn pending(&self, session: SessionId) -> usize {
        self.shared.queues.get(&session).map_or(0, |q| q.lock().len())
    }

    /// Sessions with scheduled or running work.
    pub fn active_sessions(&self) -> usize {
        self.shared.queues.len()
    }
}

impl HandlerExecutor for OrderedExecutor {
    fn execute(&self, session: SessionId, task: Task) -> Result<(), BoxError> {
        let schedule = match self.shared.queues.entry(session) {
            Entry::Occupied(queue) => {
                queue.get().lock().push_back(task);
                false
            }
            Entry::Vacant(slot) => {
                let _ = slot.insert(Mutex::new(VecDeque::from([task])));
                true
            }
        };
        if schedule {
            if let Err(err) = Shared::schedule(&self.shared, session) {
                Shared::reject_first(&self.shared, session);
                return Err(err);
            }
        }
        Ok(())
    }
}

impl Shared {
    fn schedule(this: &Arc<Self>, session: SessionId) -> Result<(), BoxError> {
        let shared = Arc::clone(this);
        this.inner
            .execute(session, Box::new(move || Shared::drain(&shared, session)))
    }

    /// Undo a submission whose drain could not be scheduled.
    ///
    /// The rejected task is at the front: no drain ran for this queue.
    /// Tasks other submitters pushed meanwhile were accepted, so they keep
    /// their place and the drain is scheduled once more for them.
    fn reject_first(this: &Arc<Self>, session: SessionId) {
        // map guard must be released before retire takes the shard lock
        let rejected = this
            .queues
            .get(&session)
            .and_then(|queue| queue.lock().pop_front());
        drop(rejected);
        if this.retire(session) {
            return;
        }
        warn!(session_id = %session, "retrying drain for tasks queued behind a rejected one");
        if let Err(err) = Shared::schedule(this, session) {
            let dropped = this
                .queues
                .remove(&session)
                .map_or(0, |(_, q)| q.into_inner().len());
            error!(session_id = %session, error = %err, dropped, "failed to schedule ordered drain");
        }
    }

    fn drain(this: &Arc<Self>, session: SessionId) {
        for _ in 0..this.drain_batch {
            // guard must be released before the task runs
            let next = match this.queues.get(&session) {
                Some(queue) => queue.lock().pop_front(),
                None => return,
            };
            match next {
                Some(task) => run_task(session, task),
                None => {
                    if this.retire(session) {
                        return;
                    }
                }
            }
        }
        if this.retire(session) {
            return;
        }
        if let Err(err) = Shared::schedule(this, session) {
            let dropped = this
                .queues
                .remove(&session)
                .map_or(0, |(_, q)| q.into_inner().len());
            error!(session_id = %session, error = %err, dropped, "failed to resubmit ordered drain");
        }
    }

    /// Drop the session's queue if it is empty. A submission racing with
    /// this either lands before (queue kept, drain continues) or after
    /// (creates a fresh queue and schedules a new drain).
    fn retire(&self, session: SessionId) -> bool {
        self.queues
            .remove_if(&session, |_, queue| queue.lock().is_empty())
            .is_some()
    }
}

fn run_task(session: SessionId, task: Task) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_default();
        error!(session_id = %session, panic = %message, "ordered task panicked");
    }
}

impl fmt::Debug for OrderedExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedExecutor")
            .field("inner", &self.shared.inner)
            .field("active_sessions", &self.shared.queues.len())
            .field("drain_batch", &self.shared.drain_batch)
            .finish()
    }
}
