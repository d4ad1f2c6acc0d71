#![allow(dead_code, missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tether_core::{FailureOrigin, HookResult, IdleStatus, Message, StageFailure, WriteRequest};
use tether_session::{IoHandler, Session, TransportSink};

#[derive(Debug, Clone)]
pub struct Failure {
    pub event: &'static str,
    pub origin: FailureOrigin,
    pub panicked: bool,
    pub message: String,
    pub thread: ThreadId,
}

#[derive(Debug)]
pub struct Delivery {
    pub message: Message<'static>,
    pub borrowed: bool,
    pub thread: ThreadId,
}

/// Handler that records everything it sees.
#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<String>>,
    pub received: Mutex<Vec<Delivery>>,
    pub failures: Mutex<Vec<Failure>>,
    pub fail_received: AtomicBool,
    pub fail_exceptions: AtomicBool,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    pub fn received_bytes(&self) -> Vec<Vec<u8>> {
        self.received
            .lock()
            .iter()
            .filter_map(|d| d.message.as_bytes().map(<[u8]>::to_vec))
            .collect()
    }

    pub fn failures(&self) -> Vec<Failure> {
        self.failures.lock().clone()
    }

    fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }
}

impl IoHandler for Recorder {
    fn session_created(&self, _session: &Arc<Session>) -> HookResult {
        self.push("created");
        Ok(())
    }

    fn session_opened(&self, _session: &Arc<Session>) -> HookResult {
        self.push("opened");
        Ok(())
    }

    fn session_closed(&self, _session: &Arc<Session>) -> HookResult {
        self.push("closed");
        Ok(())
    }

    fn session_idle(&self, _session: &Arc<Session>, status: IdleStatus) -> HookResult {
        self.push(format!("idle:{status}"));
        Ok(())
    }

    fn message_received(&self, _session: &Arc<Session>, message: Message<'_>) -> HookResult {
        self.push("received");
        let borrowed = message.is_borrowed();
        self.received.lock().push(Delivery {
            message: message.detach(),
            borrowed,
            thread: thread::current().id(),
        });
        if self.fail_received.load(Ordering::SeqCst) {
            return Err("handler rejected message".into());
        }
        Ok(())
    }

    fn message_sent(&self, _session: &Arc<Session>, _message: Message<'static>) -> HookResult {
        self.push("sent");
        Ok(())
    }

    fn exception_caught(&self, _session: &Arc<Session>, failure: &StageFailure) -> HookResult {
        self.push("exception");
        self.failures.lock().push(Failure {
            event: failure.event,
            origin: failure.origin.clone(),
            panicked: failure.panicked,
            message: failure.message.clone(),
            thread: thread::current().id(),
        });
        if self.fail_exceptions.load(Ordering::SeqCst) {
            return Err("exception handler is broken too".into());
        }
        Ok(())
    }
}

/// Sink that keeps every request it is given.
#[derive(Default)]
pub struct RecordingSink {
    pub requests: Mutex<Vec<WriteRequest>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn take(&self) -> Vec<WriteRequest> {
        std::mem::take(&mut *self.requests.lock())
    }
}

impl TransportSink for RecordingSink {
    fn enqueue_for_write(&self, request: WriteRequest) {
        self.requests.lock().push(request);
    }
}
