use std::fmt::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::debug;

use crate::core::PeerId;

/// Why a peer left the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    /// It said goodbye
    Quit,
    /// It stopped answering pings
    TimedOut,
}

/// One row of a peer listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    pub id: PeerId,
    pub nickname: Option<String>,
    pub addr: SocketAddr,
}

/// Something the user should see
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// First announce from a peer
    PeerJoined {
        nickname: String,
        addr: SocketAddr,
    },
    /// A peer broadcast that it entered the chat
    PeerEntered { name: String, addr: SocketAddr },
    PeerLeft {
        name: String,
        addr: SocketAddr,
        reason: LeaveReason,
    },
    TextReceived {
        from: String,
        addr: SocketAddr,
        text: String,
    },
    PeerList(Vec<PeerSummary>),

    UploadStarted {
        transfer_id: u32,
        file_name: String,
        to: SocketAddr,
        total_blocks: u32,
    },
    UploadCompleted {
        transfer_id: u32,
        file_name: String,
        to: SocketAddr,
    },
    UploadFailed {
        transfer_id: u32,
        file_name: String,
        to: SocketAddr,
        reason: String,
    },

    DownloadStarted {
        file_name: String,
        from: SocketAddr,
        total_blocks: u32,
    },
    DownloadProgress {
        file_name: String,
        from: SocketAddr,
        received: u32,
        total_blocks: u32,
    },
    /// A block went missing and is being asked for again
    DownloadRetry {
        file_name: String,
        from: SocketAddr,
        block_index: u32,
        attempt: u32,
    },
    DownloadCompleted {
        file_name: String,
        from: SocketAddr,
        path: PathBuf,
    },
    DownloadFailed {
        file_name: String,
        from: SocketAddr,
        reason: String,
    },
    /// The same transfer was announced twice
    DuplicateTransfer { file_name: String, from: SocketAddr },

    /// A command the user typed could not be carried out
    Notice(String),
}

/// Writes `s` with control characters escaped, so a peer cannot break the
/// line or drive the terminal
struct Printable<'a>(&'a str);

impl fmt::Display for Printable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.0.chars() {
            if c.is_control() {
                write!(f, "{}", c.escape_default())?;
            } else {
                f.write_char(c)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for ChatEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatEvent::PeerJoined { nickname, addr } => {
                write!(f, "{} > *** {} joined ***", addr, Printable(nickname))
            }
            ChatEvent::PeerEntered { name, addr } => {
                write!(f, "{} > *** {} entered the chat ***", addr, Printable(name))
            }
            ChatEvent::PeerLeft { name, addr, reason } => match reason {
                LeaveReason::Quit => {
                    write!(f, "{} > *** {} left the chat ***", addr, Printable(name))
                }
                LeaveReason::TimedOut => {
                    write!(f, "{} > *** {} timed out ***", addr, Printable(name))
                }
            },
            ChatEvent::TextReceived { from, addr, text } => {
                write!(f, "{} ({}) > {}", Printable(from), addr, Printable(text))
            }
            ChatEvent::PeerList(peers) => {
                if peers.is_empty() {
                    return f.write_str("*** no peers known ***");
                }
                f.write_str("*** peers: ")?;
                for (i, peer) in peers.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    match &peer.nickname {
                        Some(nickname) => {
                            write!(f, "{} [{}] {}", Printable(nickname), peer.id, peer.addr)?
                        }
                        None => write!(f, "? [{}] {}", peer.id, peer.addr)?,
                    }
                }
                f.write_str(" ***")
            }
            ChatEvent::UploadStarted {
                transfer_id,
                file_name,
                to,
                total_blocks,
            } => write!(
                f,
                "{} < *** offering '{}' (#{}, {} blocks) ***",
                to,
                Printable(file_name),
                transfer_id,
                total_blocks
            ),
            ChatEvent::UploadCompleted {
                transfer_id,
                file_name,
                to,
            } => write!(
                f,
                "{} < *** '{}' (#{}) delivered ***",
                to,
                Printable(file_name),
                transfer_id
            ),
            ChatEvent::UploadFailed {
                transfer_id,
                file_name,
                to,
                reason,
            } => write!(
                f,
                "{} < *** upload of '{}' (#{}) failed: {} ***",
                to,
                Printable(file_name),
                transfer_id,
                Printable(reason)
            ),
            ChatEvent::DownloadStarted {
                file_name,
                from,
                total_blocks,
            } => write!(
                f,
                "{} > *** receiving '{}' ({} blocks) ***",
                from,
                Printable(file_name),
                total_blocks
            ),
            ChatEvent::DownloadProgress {
                file_name,
                from,
                received,
                total_blocks,
            } => write!(
                f,
                "{} > *** '{}': {} of {} blocks ***",
                from,
                Printable(file_name),
                received,
                total_blocks
            ),
            ChatEvent::DownloadRetry {
                file_name,
                from,
                block_index,
                attempt,
            } => write!(
                f,
                "{} > *** '{}': requesting dropped block {} (attempt {}) ***",
                from,
                Printable(file_name),
                block_index,
                attempt
            ),
            ChatEvent::DownloadCompleted {
                file_name,
                from,
                path,
            } => write!(
                f,
                "{} > *** '{}' received, saved to {} ***",
                from,
                Printable(file_name),
                Printable(&path.to_string_lossy())
            ),
            ChatEvent::DownloadFailed {
                file_name,
                from,
                reason,
            } => write!(
                f,
                "{} > *** download of '{}' failed: {} ***",
                from,
                Printable(file_name),
                Printable(reason)
            ),
            ChatEvent::DuplicateTransfer { file_name, from } => write!(
                f,
                "{} > *** '{}' is already being received, duplicate ignored ***",
                from,
                Printable(file_name)
            ),
            ChatEvent::Notice(text) => write!(f, "*** {} ***", Printable(text)),
        }
    }
}

/// Where the engine delivers events; the receiver renders them
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ChatEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink { tx }, rx)
    }

    pub fn emit(&self, event: ChatEvent) {
        if self.tx.send(event).is_err() {
            debug!("event receiver closed");
        }
    }
}
