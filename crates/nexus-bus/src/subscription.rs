//! Subscriber side of a channel

use futures::Stream;
use nexus_core::Message;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Live subscription to one channel.
///
/// A background pump moves notifications from the listener into a bounded
/// queue. When the queue is full the pump waits, so nothing is dropped at
/// this layer. Dropping the subscription stops the pump and releases its
/// listener connection. The stream ends if the listener dies.
pub struct Subscription {
    channel: String,
    rx: mpsc::Receiver<Message>,
    _pump: DropGuard,
}

impl Subscription {
    pub(crate) fn new(channel: String, rx: mpsc::Receiver<Message>, pump: CancellationToken) -> Self {
        Self {
            channel,
            rx,
            _pump: pump.drop_guard(),
        }
    }

    /// Channel this subscription listens on
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next message, or `None` once the listener is gone
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish()
    }
}
