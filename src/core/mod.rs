//! Core types shared by every layer of the chat engine
//!
//! This module contains the error taxonomy, peer identity, configuration
//! and the protocol-wide constants.

pub mod error;
pub mod serde;
pub mod types;

pub use self::error::{Error, FileError, Result};
pub use self::types::{Config, PeerId};

/// Default UDP port shared by all peers on the LAN
pub const DEFAULT_PORT: u16 = 54321;

/// Length of a peer identifier on the wire
pub const PEER_ID_SIZE: usize = 20;

/// Largest file block a datagram may carry
pub const BLOCK_SIZE: usize = 6 * 1024;

/// Received file names are cut to this many bytes
pub const MAX_FILE_NAME_LEN: usize = 256;

/// Maximum UDP payload size
pub const MAX_DATAGRAM_SIZE: usize = 65507;
