use std::fmt;

use crate::core::PeerId;

/// Protocol message types exchanged between peers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Presence and control notices
    System {
        /// Sender's peer ID
        peer_id: PeerId,
        /// What the sender is signalling
        action: SystemAction,
    },

    /// Introduces the sender and its nickname
    PeerAnnounce {
        peer_id: PeerId,
        nickname: String,
    },

    /// Chat line, broadcast or private
    Text {
        peer_id: PeerId,
        content: String,
    },

    /// Offers a file; the receiver starts pulling blocks
    TransferAnnounce {
        /// Sender-assigned transfer ID
        transfer_id: u32,
        /// Number of blocks the file splits into
        total_blocks: u32,
        /// File name without directories
        file_name: String,
        peer_id: PeerId,
    },

    /// One block of file content, in answer to a block request
    DataBlock {
        transfer_id: u32,
        block_index: u32,
        payload: Vec<u8>,
        peer_id: PeerId,
    },

    /// Receiver asks for one block
    BlockRequest {
        transfer_id: u32,
        block_index: u32,
        peer_id: PeerId,
    },
}

impl Message {
    /// Peer that sent this message
    pub fn peer_id(&self) -> PeerId {
        match self {
            Message::System { peer_id, .. }
            | Message::PeerAnnounce { peer_id, .. }
            | Message::Text { peer_id, .. }
            | Message::TransferAnnounce { peer_id, .. }
            | Message::DataBlock { peer_id, .. }
            | Message::BlockRequest { peer_id, .. } => *peer_id,
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::PeerAnnounce { .. } => "peer-announce",
            Message::Text { .. } => "text",
            Message::TransferAnnounce { .. } => "transfer-announce",
            Message::DataBlock { .. } => "data-block",
            Message::BlockRequest { .. } => "block-request",
        }
    }
}

/// Action carried by a `System` message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemAction {
    /// Sender joined the chat
    Enter,
    /// Sender is leaving
    Quit,
    /// Liveness probe
    Ping,
    /// Answer to a probe
    Pong,
    /// Receiver got every block of the given transfer
    TransferComplete(u32),
    /// Anything this version does not understand
    Other(UnknownAction),
}

/// A system action string with no meaning to this version. Only produced by
/// [`SystemAction::from_wire`], so it never holds a reserved action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAction(String);

impl UnknownAction {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnknownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const TRANSFER_COMPLETE_PREFIX: &str = "done:";

impl SystemAction {
    /// Wire form of the action
    pub fn to_wire(&self) -> String {
        match self {
            SystemAction::Enter => "enter".to_string(),
            SystemAction::Quit => "quit".to_string(),
            SystemAction::Ping => "ping".to_string(),
            SystemAction::Pong => "pong".to_string(),
            SystemAction::TransferComplete(id) => format!("{}{}", TRANSFER_COMPLETE_PREFIX, id),
            SystemAction::Other(action) => action.0.clone(),
        }
    }

    pub fn from_wire(action: &str) -> Self {
        match action {
            "enter" => SystemAction::Enter,
            "quit" => SystemAction::Quit,
            "ping" => SystemAction::Ping,
            "pong" => SystemAction::Pong,
            _ => action
                .strip_prefix(TRANSFER_COMPLETE_PREFIX)
                .and_then(parse_transfer_id)
                .map(SystemAction::TransferComplete)
                .unwrap_or_else(|| SystemAction::Other(UnknownAction(action.to_string()))),
        }
    }
}

/// Decimal digits in the form `u32::to_string` writes them
fn parse_transfer_id(digits: &str) -> Option<u32> {
    let canonical = !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
        && (digits == "0" || !digits.starts_with('0'));
    if canonical {
        digits.parse().ok()
    } else {
        None
    }
}

impl fmt::Display for SystemAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_peer_id() {
        let peer_id = PeerId::random();
        let messages = [
            Message::System {
                peer_id,
                action: SystemAction::Enter,
            },
            Message::Text {
                peer_id,
                content: "hi".into(),
            },
            Message::BlockRequest {
                transfer_id: 1,
                block_index: 0,
                peer_id,
            },
        ];
        for message in &messages {
            assert_eq!(message.peer_id(), peer_id);
        }
        assert_eq!(messages[2].kind(), "block-request");
    }

    #[test]
    fn test_system_action_wire_names() {
        for action in [
            SystemAction::Enter,
            SystemAction::Quit,
            SystemAction::Ping,
            SystemAction::Pong,
            SystemAction::TransferComplete(42),
        ] {
            assert_eq!(SystemAction::from_wire(&action.to_wire()), action);
        }
        assert_eq!(SystemAction::Quit.to_wire(), "quit");
        assert_eq!(SystemAction::TransferComplete(7).to_wire(), "done:7");
    }

    #[test]
    fn test_unknown_actions_are_kept() {
        for wire in ["alive", "done:x", "done:+5", "done:05", "done:", "done:4294967296", "PING"] {
            match SystemAction::from_wire(wire) {
                SystemAction::Other(action) => assert_eq!(action.as_str(), wire),
                other => panic!("{:?} parsed as {:?}", wire, other),
            }
        }
        assert_eq!(SystemAction::from_wire("done:0"), SystemAction::TransferComplete(0));
    }

    #[test]
    fn test_wire_form_is_stable() {
        for wire in ["enter", "ping", "done:5", "done:+5", "done:007", "hello", ""] {
            let action = SystemAction::from_wire(wire);
            assert_eq!(action.to_wire(), wire);
            assert_eq!(SystemAction::from_wire(&action.to_wire()), action);
        }
    }
}
