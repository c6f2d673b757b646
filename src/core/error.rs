use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

use crate::protocol::DecodeError;

/// Custom error types for lanchat
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Unknown peer: {0}")]
    PeerUnknown(String),

    #[error("'{target}' matches several peers, use an address instead: {}", format_candidates(.candidates))]
    AmbiguousPeer {
        target: String,
        candidates: Vec<SocketAddr>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Multicast is not enabled")]
    MulticastDisabled,
}

/// Failures opening a file to serve or creating one to receive into.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("can't open '{}': {source}", .path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("can't open for writing '{}': {source}", .path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("'{}' has {blocks} blocks, more than a transfer can address", .path.display())]
    TooLarge { path: PathBuf, blocks: u64 },
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

fn format_candidates(candidates: &[SocketAddr]) -> String {
    candidates
        .iter()
        .map(|addr| addr.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Creates a new protocol violation
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::ProtocolViolation(msg.into())
    }

    /// Creates a new unknown peer error
    pub fn peer_unknown(msg: impl Into<String>) -> Self {
        Error::PeerUnknown(msg.into())
    }

    /// Creates a new network error
    pub fn network(msg: impl Into<String>) -> Self {
        Error::Network(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Errors that only warrant a debug line when dropping a datagram
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            Error::ProtocolViolation(_) | Error::PeerUnknown(_) | Error::Decode(_)
        )
    }
}
