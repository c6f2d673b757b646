use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::core::PeerId;

/// Probe state of a peer that has gone quiet
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Liveness {
    /// Heard from within the alive timeout
    Fresh,
    PingSent1,
    PingSent2,
    /// Last strike; the next silent sweep removes the peer
    PingSent3,
}

impl Liveness {
    fn advance(self) -> Option<Liveness> {
        match self {
            Liveness::Fresh => Some(Liveness::PingSent1),
            Liveness::PingSent1 => Some(Liveness::PingSent2),
            Liveness::PingSent2 => Some(Liveness::PingSent3),
            Liveness::PingSent3 => None,
        }
    }
}

/// Represents a remote chat participant
#[derive(Debug, Clone)]
pub struct Peer {
    /// The peer's self-assigned ID
    pub id: PeerId,
    /// Known once the peer has announced itself
    pub nickname: Option<String>,
    /// Where its datagrams come from
    pub addr: SocketAddr,
    /// Last time any valid datagram arrived from it
    pub last_activity: Instant,
    pub liveness: Liveness,
    /// The peer pinged us and is owed a pong
    pub pong_requested: bool,
}

impl Peer {
    fn new(id: PeerId, addr: SocketAddr, now: Instant) -> Self {
        Peer {
            id,
            nickname: None,
            addr,
            last_activity: now,
            liveness: Liveness::Fresh,
            pong_requested: false,
        }
    }

    /// Nickname if known, otherwise the peer ID
    pub fn display_name(&self) -> String {
        match &self.nickname {
            Some(nickname) => nickname.clone(),
            None => self.id.to_string(),
        }
    }

    fn refresh(&mut self, addr: SocketAddr, now: Instant) {
        self.addr = addr;
        self.last_activity = now;
        self.liveness = Liveness::Fresh;
    }
}

/// Result of recording a peer announce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceOutcome {
    /// First time we hear of this peer; it should get our announce back
    New,
    /// Peer was already known
    Updated,
}

/// Known peers, keyed by peer ID
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<PeerId, Peer>,
}

impl PeerTable {
    /// Creates an empty peer table
    pub fn new() -> Self {
        Self::default()
    }

    /// Records activity from a peer. Returns true if the peer was unknown.
    pub fn touch(&mut self, id: PeerId, addr: SocketAddr, now: Instant) -> bool {
        match self.peers.get_mut(&id) {
            Some(peer) => {
                peer.refresh(addr, now);
                false
            }
            None => {
                self.peers.insert(id, Peer::new(id, addr, now));
                true
            }
        }
    }

    /// Like `touch`, and sets the nickname
    pub fn upsert_announce(
        &mut self,
        id: PeerId,
        nickname: &str,
        addr: SocketAddr,
        now: Instant,
    ) -> AnnounceOutcome {
        let outcome = if self.touch(id, addr, now) {
            AnnounceOutcome::New
        } else {
            AnnounceOutcome::Updated
        };
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.nickname = Some(nickname.to_string());
        }
        outcome
    }

    pub fn remove(&mut self, id: &PeerId) -> Option<Peer> {
        self.peers.remove(id)
    }

    pub fn get(&self, id: &PeerId) -> Option<&Peer> {
        self.peers.get(id)
    }

    /// Nicknames are not unique: callers must handle zero, one or many matches
    pub fn find_by_nickname(&self, nickname: &str) -> Vec<Peer> {
        let mut found: Vec<Peer> = self
            .peers
            .values()
            .filter(|peer| peer.nickname.as_deref() == Some(nickname))
            .cloned()
            .collect();
        found.sort_by_key(|peer| peer.addr);
        found
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<&Peer> {
        self.peers.values().find(|peer| peer.addr == addr)
    }

    /// Marks a peer as owed a pong. Returns false if the peer is unknown.
    pub fn request_pong(&mut self, id: &PeerId) -> bool {
        match self.peers.get_mut(id) {
            Some(peer) => {
                peer.pong_requested = true;
                true
            }
            None => false,
        }
    }

    /// Addresses owed a pong; clears their flags
    pub fn take_pong_requests(&mut self) -> Vec<SocketAddr> {
        self.peers
            .values_mut()
            .filter(|peer| peer.pong_requested)
            .map(|peer| {
                peer.pong_requested = false;
                peer.addr
            })
            .collect()
    }

    /// Probes peers silent for longer than `alive_timeout` and removes the
    /// ones that stayed silent through three probes.
    pub fn sweep_liveness(
        &mut self,
        now: Instant,
        alive_timeout: Duration,
        mut on_ping: impl FnMut(&Peer),
        mut on_expire: impl FnMut(Peer),
    ) {
        let mut expired = Vec::new();
        for peer in self.peers.values_mut() {
            if now.saturating_duration_since(peer.last_activity) <= alive_timeout {
                continue;
            }
            match peer.liveness.advance() {
                Some(next) => {
                    peer.liveness = next;
                    on_ping(peer);
                }
                None => expired.push(peer.id),
            }
        }
        for id in expired {
            if let Some(peer) = self.peers.remove(&id) {
                on_expire(peer);
            }
        }
    }

    /// Snapshot of all peers, ordered by display name
    pub fn list(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.values().cloned().collect();
        peers.sort_by(|a, b| a.display_name().cmp(&b.display_name()));
        peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
