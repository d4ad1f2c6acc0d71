//! The transport side of the outbound pipeline.

use std::fmt;

use tether_core::{WriteError, WriteRequest};
use tokio::sync::mpsc;
use tracing::debug;

/// Receives fully encoded write requests from the outbound pipeline.
///
/// Implementations take ownership of the request's completion and resolve
/// it once the bytes are handed to the socket. Must not block.
pub trait TransportSink: Send + Sync {
    /// Queue `request` for the I/O loop.
    fn enqueue_for_write(&self, request: WriteRequest);
}

/// Sink that forwards requests to an unbounded channel read by the I/O loop.
///
/// If the receiving side is gone the request fails with
/// [`WriteError::Failed`].
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<WriteRequest>,
}

impl ChannelSink {
    /// Sink plus the receiver the I/O loop drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WriteRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TransportSink for ChannelSink {
    fn enqueue_for_write(&self, request: WriteRequest) {
        if let Err(mpsc::error::SendError(request)) = self.tx.send(request) {
            debug!("transport receiver gone, failing write");
            request.fail(WriteError::Failed("transport closed".to_string()));
        }
    }
}

impl fmt::Debug for ChannelSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forwards_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.enqueue_for_write(WriteRequest::new(vec![1]));
        sink.enqueue_for_write(WriteRequest::new(vec![2]));
        assert_eq!(rx.recv().await.unwrap().message().as_bytes(), Some(&[1][..]));
        assert_eq!(rx.recv().await.unwrap().message().as_bytes(), Some(&[2][..]));
    }

    #[tokio::test]
    async fn closed_receiver_fails_write() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        let (request, future) = WriteRequest::with_future(vec![1]);
        sink.enqueue_for_write(request);
        assert_eq!(
            future.await,
            Err(WriteError::Failed("transport closed".to_string()))
        );
    }
}
