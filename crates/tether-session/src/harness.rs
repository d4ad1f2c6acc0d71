//! Drive filter stages without a network.
//!
//! [`FilterHarness`] wraps one stage (or a short pipeline) in a real
//! session with inline dispatch, a collecting handler and a collecting
//! sink. Feeding bytes shows what the stage forwards toward the handler;
//! writing a message shows what it forwards toward the transport. Useful
//! for unit-testing codecs and for running a codec outside a connection.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tether_core::{HookResult, Message, StageFailure, WriteFuture, WriteRequest};

use crate::dispatch::InlineDispatch;
use crate::filter::{FilterChainBuilder, IoFilter};
use crate::handler::IoHandler;
use crate::service::IoService;
use crate::session::Session;
use crate::sink::TransportSink;

#[derive(Default)]
struct Collected {
    received: Mutex<Vec<Message<'static>>>,
    written: Mutex<Vec<WriteRequest>>,
    failures: Mutex<Vec<String>>,
}

struct CollectingHandler(Arc<Collected>);

impl IoHandler for CollectingHandler {
    fn message_received(&self, _session: &Arc<Session>, message: Message<'_>) -> HookResult {
        self.0.received.lock().push(message.detach());
        Ok(())
    }

    fn exception_caught(&self, _session: &Arc<Session>, failure: &StageFailure) -> HookResult {
        self.0.failures.lock().push(failure.to_string());
        Ok(())
    }
}

struct CollectingSink(Arc<Collected>);

impl TransportSink for CollectingSink {
    fn enqueue_for_write(&self, request: WriteRequest) {
        self.0.written.lock().push(request);
    }
}

/// A session around one or more stages, with both ends captured.
pub struct FilterHarness {
    session: Arc<Session>,
    collected: Arc<Collected>,
    // keeps the session's weak service reference alive
    _service: Arc<IoService>,
}

impl FilterHarness {
    /// Harness around a single stage. The session starts opened.
    pub fn new(filter: impl IoFilter + 'static) -> Self {
        let mut chain = FilterChainBuilder::default();
        // an empty builder cannot hold a duplicate
        let _ = chain.add_last(Arc::new(filter));
        Self::with_chain(chain)
    }

    /// Harness around a prepared pipeline. The session starts opened.
    pub fn with_chain(chain: FilterChainBuilder) -> Self {
        let collected = Arc::new(Collected::default());
        let service = IoService::assemble(
            "filter-harness".to_string(),
            chain.build(),
            Some(Arc::new(CollectingHandler(Arc::clone(&collected)))),
            Arc::new(InlineDispatch),
        );
        let session = service.create_session(Arc::new(CollectingSink(Arc::clone(&collected))));
        session.on_open();
        Self {
            session,
            collected,
            _service: service,
        }
    }

    /// The session the stages see.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Feed raw bytes inbound.
    pub fn feed(&self, bytes: &[u8]) {
        self.session.on_message_received(bytes);
    }

    /// Feed any message inbound.
    pub fn feed_message(&self, message: Message<'_>) {
        self.session.fire_message_received(message);
    }

    /// Feed `bytes` and return what reached the handler.
    pub fn decode(&self, bytes: &[u8]) -> Vec<Message<'static>> {
        self.feed(bytes);
        self.take_received()
    }

    /// Write `message` outbound and return its completion.
    pub fn write(&self, message: impl Into<Message<'static>>) -> WriteFuture {
        self.session.write_with_future(message)
    }

    /// Write `message` and return what reached the transport.
    pub fn encode(&self, message: impl Into<Message<'static>>) -> Vec<Message<'static>> {
        self.session.write(message);
        self.take_written()
            .into_iter()
            .map(WriteRequest::into_message)
            .collect()
    }

    /// Drain messages that reached the handler.
    pub fn take_received(&self) -> Vec<Message<'static>> {
        std::mem::take(&mut *self.collected.received.lock())
    }

    /// Drain write requests that reached the transport.
    pub fn take_written(&self) -> Vec<WriteRequest> {
        std::mem::take(&mut *self.collected.written.lock())
    }

    /// Drain failures reported to the exception path, as display strings.
    pub fn take_failures(&self) -> Vec<String> {
        std::mem::take(&mut *self.collected.failures.lock())
    }
}

impl fmt::Debug for FilterHarness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterHarness")
            .field("session", &self.session)
            .field("received", &self.collected.received.lock().len())
            .field("written", &self.collected.written.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::AttributeKey;
    use crate::filter::{ReadNext, WriteNext};

    const PENDING: AttributeKey<Vec<u8>> = AttributeKey::new("lines.pending");

    /// Splits input on `\n`, buffering partial lines per session.
    struct Lines;

    impl IoFilter for Lines {
        fn name(&self) -> &str {
            "lines"
        }

        fn message_received(
            &self,
            session: &Arc<Session>,
            message: Message<'_>,
            next: &ReadNext<'_>,
        ) -> HookResult {
            let bytes = message.as_bytes().ok_or("lines expects bytes")?;
            let lines = session.attributes().update(&PENDING, Vec::new, |pending| {
                pending.extend_from_slice(bytes);
                let mut lines = Vec::new();
                while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
                }
                lines
            })?;
            for line in lines {
                next.call(Message::object(line))?;
            }
            Ok(())
        }

        fn message_writing(
            &self,
            _session: &Arc<Session>,
            request: WriteRequest,
            next: &WriteNext<'_>,
        ) -> HookResult {
            let request = request.map_message(|m| match m.downcast::<String>() {
                Ok(line) => Message::from(format!("{line}\n").into_bytes()),
                Err(other) => other,
            });
            next.call(request)
        }
    }

    fn texts(messages: Vec<Message<'static>>) -> Vec<String> {
        messages
            .into_iter()
            .map(|m| m.downcast::<String>().unwrap())
            .collect()
    }

    #[test]
    fn decoder_emits_zero_one_or_many() {
        let harness = FilterHarness::new(Lines);
        assert!(harness.decode(b"hel").is_empty());
        assert_eq!(texts(harness.decode(b"lo\n")), vec!["hello"]);
        assert_eq!(texts(harness.decode(b"a\nb\nc")), vec!["a", "b"]);
        assert_eq!(texts(harness.decode(b"\n")), vec!["c"]);
    }

    #[test]
    fn encoder_frames_output() {
        let harness = FilterHarness::new(Lines);
        let out = harness.encode(Message::object("ping".to_string()));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_bytes(), Some(&b"ping\n"[..]));
    }

    #[test]
    fn write_future_reaches_transport() {
        let harness = FilterHarness::new(Lines);
        let mut future = harness.write(Message::object("x".to_string()));
        let written = harness.take_written();
        assert_eq!(written.len(), 1);
        assert_eq!(future.try_result(), None);
        for request in written {
            request.complete();
        }
        assert_eq!(future.try_result(), Some(Ok(())));
    }

    #[test]
    fn stage_error_reported_as_failure() {
        let harness = FilterHarness::new(Lines);
        harness.feed_message(Message::object(5_u32));
        let failures = harness.take_failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("stage 'lines'"));
        assert!(failures[0].contains("lines expects bytes"));
    }

    #[test]
    fn session_starts_open() {
        let harness = FilterHarness::new(Lines);
        assert!(harness.session().is_connected());
    }
}
