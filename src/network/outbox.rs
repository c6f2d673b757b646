use std::net::SocketAddr;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::protocol::Message;

/// A message addressed to one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub target: SocketAddr,
    pub message: Message,
}

/// Queue of outgoing datagrams, drained by the node's send loop
///
/// Sending never blocks, so the engine can queue while holding its state lock.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Datagram>,
}

impl Outbox {
    /// Creates an outbox and the receiver that drains it
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Datagram>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Outbox { tx }, rx)
    }

    /// Queues a message. Delivery is best effort.
    pub fn send(&self, target: SocketAddr, message: Message) {
        trace!(%target, kind = message.kind(), "queueing datagram");
        if let Err(e) = self.tx.send(Datagram { target, message }) {
            debug!(%target, kind = e.0.message.kind(), "outbox closed, dropping datagram");
        }
    }
}
