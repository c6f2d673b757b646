//! Chat engine
//!
//! [`ChatEngine`] owns the peer table and both transfer tables behind one
//! mutex. Inbound datagrams go through the dispatcher, the watchdog drives
//! timeouts once per tick, and user input arrives through
//! [`ChatEngine::parse_user_input`]. Outgoing datagrams are queued on an
//! [`Outbox`] and user-visible outcomes are emitted on an [`EventSink`], so
//! the engine itself never touches a socket.

mod dispatcher;
pub mod events;
pub mod input;
pub mod watchdog;

pub use self::events::{ChatEvent, EventSink, LeaveReason, PeerSummary};
pub use self::input::{Command, InputOutcome};

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::debug;

use crate::core::{Config, Error, PeerId, Result, MAX_DATAGRAM_SIZE};
use crate::network::{Outbox, Peer, PeerTable};
use crate::protocol::{codec, Message, SystemAction};
use crate::transfer::{InboundTransfers, OutboundTransfers};

/// Our own identity on the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPeer {
    pub id: PeerId,
    pub nickname: String,
}

/// Everything the dispatcher and the watchdog share
#[derive(Debug)]
pub struct ChatState {
    pub peers: PeerTable,
    pub outbound: OutboundTransfers,
    pub inbound: InboundTransfers,
}

/// The chat and file-transfer engine of one node
#[derive(Debug)]
pub struct ChatEngine {
    config: Config,
    local: LocalPeer,
    state: Mutex<ChatState>,
    outbox: Outbox,
    events: EventSink,
}

impl ChatEngine {
    /// Creates an engine with a fresh random peer ID
    pub fn new(config: Config, outbox: Outbox, events: EventSink) -> Self {
        Self::with_peer_id(config, PeerId::random(), outbox, events)
    }

    pub fn with_peer_id(config: Config, id: PeerId, outbox: Outbox, events: EventSink) -> Self {
        let state = ChatState {
            peers: PeerTable::new(),
            outbound: OutboundTransfers::new(config.block_size),
            inbound: InboundTransfers::new(config.download_dir.clone()),
        };
        let local = LocalPeer {
            id,
            nickname: config.nickname.clone(),
        };
        ChatEngine {
            config,
            local,
            state: Mutex::new(state),
            outbox,
            events,
        }
    }

    pub fn local_peer(&self) -> &LocalPeer {
        &self.local
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Locks the shared state, recovering from poisoning
    pub(crate) fn lock(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of known peers
    pub fn peers(&self) -> Vec<Peer> {
        self.lock().peers.list()
    }

    /// Number of transfers being received
    pub fn inbound_count(&self) -> usize {
        self.lock().inbound.len()
    }

    /// Number of transfers being served
    pub fn outbound_count(&self) -> usize {
        self.lock().outbound.len()
    }

    /// Introduces ourselves to the whole segment
    pub fn announce(&self) {
        self.announce_to(self.config.broadcast_addr());
    }

    pub fn announce_to(&self, target: SocketAddr) {
        self.outbox.send(target, self.peer_announce());
    }

    /// Sends a chat line to `to`, which may be the broadcast address
    pub fn send_text(&self, to: SocketAddr, text: &str) -> Result<()> {
        let message = Message::Text {
            peer_id: self.local.id,
            content: text.to_string(),
        };
        if codec::encoded_len(&message) > MAX_DATAGRAM_SIZE {
            return Err(Error::invalid_input("message is too long for one datagram"));
        }
        self.outbox.send(to, message);
        Ok(())
    }

    /// Offers a file to `to` and returns the transfer ID
    pub fn send_file(&self, to: SocketAddr, path: &Path) -> Result<u32> {
        self.send_file_at(to, path, Instant::now())
    }

    pub fn send_file_at(&self, to: SocketAddr, path: &Path, now: Instant) -> Result<u32> {
        let mut state = self.lock();
        let (transfer_id, announce) = state.outbound.start_send(path, to, self.local.id, now)?;
        if let Some(transfer) = state.outbound.get(transfer_id) {
            self.emit(ChatEvent::UploadStarted {
                transfer_id,
                file_name: transfer.file_name.clone(),
                to,
                total_blocks: transfer.total_blocks,
            });
        }
        self.outbox.send(to, announce);
        Ok(transfer_id)
    }

    pub fn send_system(&self, to: SocketAddr, action: SystemAction) {
        self.outbox.send(
            to,
            Message::System {
                peer_id: self.local.id,
                action,
            },
        );
    }

    /// Resolves a user-supplied target: `ip`, `ip:port`, a peer ID, or a
    /// nickname that must match exactly one peer.
    pub fn resolve_target(&self, target: &str) -> Result<SocketAddr> {
        if let Ok(addr) = target.parse::<SocketAddr>() {
            return Ok(addr);
        }
        if let Ok(ip) = target.parse() {
            return Ok(SocketAddr::new(ip, self.config.port));
        }

        let state = self.lock();
        if let Ok(id) = target.parse::<PeerId>() {
            if let Some(peer) = state.peers.get(&id) {
                return Ok(peer.addr);
            }
        }
        let matches = state.peers.find_by_nickname(target);
        match matches.as_slice() {
            [] => Err(Error::peer_unknown(target)),
            [peer] => Ok(peer.addr),
            _ => Err(Error::AmbiguousPeer {
                target: target.to_string(),
                candidates: matches.iter().map(|peer| peer.addr).collect(),
            }),
        }
    }

    /// Shows a failed user command on the event stream
    pub fn report_error(&self, error: &Error) {
        self.emit(ChatEvent::Notice(error.to_string()));
    }

    fn peer_announce(&self) -> Message {
        Message::PeerAnnounce {
            peer_id: self.local.id,
            nickname: self.local.nickname.clone(),
        }
    }

    fn emit(&self, event: ChatEvent) {
        debug!(%event, "chat event");
        self.events.emit(event);
    }
}
