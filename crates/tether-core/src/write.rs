//! Outbound write requests and their completion futures.
//!
//! A [`WriteRequest`] carries the message through the outbound filter chain
//! to the transport. When the caller wants to know the outcome, the request
//! is created together with a [`WriteFuture`]; the two share a one-shot
//! channel from the start, so a stage that replaces the message with
//! [`WriteRequest::map_message`] keeps the caller's completion attached.
//!
//! The transport resolves the request with [`WriteRequest::complete`] or
//! [`WriteRequest::fail`]. A request dropped without either resolves the
//! future to [`WriteError::Dropped`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::errors::WriteError;
use crate::message::Message;

type Completion = oneshot::Sender<Result<(), WriteError>>;

/// One outbound message and its optional completion.
pub struct WriteRequest {
    message: Message<'static>,
    completion: Option<Completion>,
}

impl WriteRequest {
    /// Fire-and-forget request.
    pub fn new(message: impl Into<Message<'static>>) -> Self {
        Self {
            message: message.into(),
            completion: None,
        }
    }

    /// Request paired with the future that observes its outcome.
    pub fn with_future(message: impl Into<Message<'static>>) -> (Self, WriteFuture) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            message: message.into(),
            completion: Some(tx),
        };
        (request, WriteFuture { rx })
    }

    /// Message being written.
    pub fn message(&self) -> &Message<'static> {
        &self.message
    }

    /// Whether a caller is waiting on this request.
    pub fn has_future(&self) -> bool {
        self.completion.is_some()
    }

    /// Replace the message, keeping the completion.
    #[must_use]
    pub fn map_message(self, f: impl FnOnce(Message<'static>) -> Message<'static>) -> Self {
        Self {
            message: f(self.message),
            completion: self.completion,
        }
    }

    /// Split into the message and a detached completion handle.
    pub fn into_parts(self) -> (Message<'static>, WriteCompletion) {
        (
            self.message,
            WriteCompletion {
                sender: self.completion,
            },
        )
    }

    /// Consume, discarding any completion.
    pub fn into_message(self) -> Message<'static> {
        self.message
    }

    /// Resolve the future successfully.
    pub fn complete(self) {
        WriteCompletion {
            sender: self.completion,
        }
        .complete();
    }

    /// Resolve the future with `error`.
    pub fn fail(self, error: WriteError) {
        WriteCompletion {
            sender: self.completion,
        }
        .fail(error);
    }
}

impl fmt::Debug for WriteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteRequest")
            .field("message", &self.message)
            .field("has_future", &self.completion.is_some())
            .finish()
    }
}

/// Completion half of a request whose message has been taken out.
///
/// Transports that serialize the message before resolving use this.
#[derive(Debug, Default)]
pub struct WriteCompletion {
    sender: Option<Completion>,
}

impl WriteCompletion {
    /// Resolve successfully. A no-op when nobody is waiting.
    pub fn complete(self) {
        self.resolve(Ok(()));
    }

    /// Resolve with `error`.
    pub fn fail(self, error: WriteError) {
        self.resolve(Err(error));
    }

    fn resolve(mut self, outcome: Result<(), WriteError>) {
        if let Some(sender) = self.sender.take() {
            // receiver gone means the caller stopped caring
            let _ = sender.send(outcome);
        }
    }
}

/// Future resolving to the outcome of one write.
#[derive(Debug)]
#[must_use = "a WriteFuture does nothing unless awaited or polled"]
pub struct WriteFuture {
    rx: oneshot::Receiver<Result<(), WriteError>>,
}

impl WriteFuture {
    /// Outcome if already known, without waiting.
    ///
    /// `None` while the write is still in flight.
    pub fn try_result(&mut self) -> Option<Result<(), WriteError>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(WriteError::Dropped)),
        }
    }

    /// Block the current thread until the write resolves.
    ///
    /// Must not be called from inside an async runtime.
    pub fn wait(self) -> Result<(), WriteError> {
        self.rx.blocking_recv().unwrap_or(Err(WriteError::Dropped))
    }
}

impl Future for WriteFuture {
    type Output = Result<(), WriteError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(WriteError::Dropped)))
    }
}
