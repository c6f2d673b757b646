//! Network management and peer communication module
//!
//! This module owns the UDP socket, the outgoing datagram queue, the table
//! of known peers, and the [`Node`] that ties them to a chat engine.

mod node;
mod outbox;
pub mod peers;
mod socket;

pub use self::node::Node;
pub use self::outbox::{Datagram, Outbox};
pub use self::peers::{AnnounceOutcome, Liveness, Peer, PeerTable};
pub use self::socket::bind;
