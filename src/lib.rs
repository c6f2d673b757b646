//! lanchat: serverless chat and file transfer for a local network
//!
//! Peers find each other by UDP broadcast, exchange chat lines by broadcast
//! or unicast, and pull files from each other block by block. There is no
//! server and no connection state: liveness is tracked with a ping/pong
//! probe and every transfer is driven by the receiver.

pub mod core;
pub mod engine;
pub mod network;
pub mod protocol;
pub mod transfer;
mod util;

// Re-export commonly used items
pub use crate::core::{Config, Error, FileError, PeerId, Result};
pub use crate::engine::{ChatEngine, ChatEvent, EventSink, InputOutcome};
pub use crate::network::{Datagram, Node, Outbox};
pub use crate::protocol::{Message, SystemAction};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
