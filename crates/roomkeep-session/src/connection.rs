//! The live-connection handle a [`User`](crate::User) owns.
//!
//! The session layer never writes to a socket. It pushes [`Outbound`]
//! items into an unbounded channel, and the connection's writer task
//! drains it. Pushing never blocks, so hooks and the maintenance pass
//! can message users while holding the manager lock.

use roomkeep_protocol::Payload;
use roomkeep_transport::ConnectionId;
use tokio::sync::mpsc;

/// What the writer task of a connection is asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Encode and send this payload.
    Deliver(Payload),
    /// Close the socket; the identity behind it is gone.
    Close,
}

pub type OutboundSender = mpsc::UnboundedSender<Outbound>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// A connection id paired with the sending half of its outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: OutboundSender,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, tx: OutboundSender) -> Self {
        Self { id, tx }
    }

    /// Creates a handle together with the receiver its writer drains.
    pub fn channel(id: ConnectionId) -> (Self, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(id, tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues a payload. Returns `false` if the writer is gone, in which
    /// case the payload is dropped.
    pub fn deliver(&self, payload: Payload) -> bool {
        self.tx.send(Outbound::Deliver(payload)).is_ok()
    }

    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}
