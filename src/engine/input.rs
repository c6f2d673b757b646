use std::path::PathBuf;

use super::{ChatEngine, ChatEvent, PeerSummary};
use crate::core::{Error, Result};
use crate::protocol::SystemAction;
use crate::util::split_first_word;

/// A parsed line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Blank line
    Empty,
    /// Text for everyone on the segment
    Broadcast(String),
    /// `@<target> <text>`
    Private { target: String, text: String },
    /// `file <target> <path>`
    SendFile { target: String, path: PathBuf },
    /// `mc <text>`
    Multicast(String),
    /// `peers`
    ListPeers,
    /// `quit`
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Command> {
        let line = line.trim_end();
        if line.is_empty() {
            return Ok(Command::Empty);
        }
        if line == "quit" {
            return Ok(Command::Quit);
        }
        if line == "peers" {
            return Ok(Command::ListPeers);
        }
        if let Some(rest) = line.strip_prefix('@') {
            let (target, text) = split_first_word(rest)
                .ok_or_else(|| Error::invalid_input("usage: @<target> <text>"))?;
            return Ok(Command::Private {
                target: target.to_string(),
                text: text.to_string(),
            });
        }
        if let Some(rest) = line.strip_prefix("file ") {
            let (target, path) = split_first_word(rest)
                .ok_or_else(|| Error::invalid_input("usage: file <target> <path>"))?;
            return Ok(Command::SendFile {
                target: target.to_string(),
                path: PathBuf::from(path),
            });
        }
        if let Some(text) = line.strip_prefix("mc ") {
            return Ok(Command::Multicast(text.to_string()));
        }
        Ok(Command::Broadcast(line.to_string()))
    }
}

/// Whether the input loop should keep going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOutcome {
    Continue,
    Quit,
}

impl ChatEngine {
    /// Handles one line typed by the user
    pub fn parse_user_input(&self, line: &str) -> Result<InputOutcome> {
        match Command::parse(line)? {
            Command::Empty => {}
            Command::Broadcast(text) => self.send_text(self.config.broadcast_addr(), &text)?,
            Command::Private { target, text } => {
                let to = self.resolve_target(&target)?;
                self.send_text(to, &text)?;
            }
            Command::SendFile { target, path } => {
                let to = self.resolve_target(&target)?;
                self.send_file(to, &path)?;
            }
            Command::Multicast(text) => {
                let to = self.config.multicast_addr().ok_or(Error::MulticastDisabled)?;
                self.send_text(to, &text)?;
            }
            Command::ListPeers => {
                let peers = self
                    .peers()
                    .into_iter()
                    .map(|peer| PeerSummary {
                        id: peer.id,
                        nickname: peer.nickname,
                        addr: peer.addr,
                    })
                    .collect();
                self.emit(ChatEvent::PeerList(peers));
            }
            Command::Quit => {
                self.send_system(self.config.broadcast_addr(), SystemAction::Quit);
                return Ok(InputOutcome::Quit);
            }
        }
        Ok(InputOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{config, Harness};
    use super::*;
    use crate::core::{Config, PeerId};
    use crate::protocol::Message;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::time::Instant;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("   ").unwrap(), Command::Empty);
        assert_eq!(Command::parse("quit\n").unwrap(), Command::Quit);
        assert_eq!(Command::parse("peers").unwrap(), Command::ListPeers);
        assert_eq!(
            Command::parse("hello there  ").unwrap(),
            Command::Broadcast("hello there".into())
        );
        assert_eq!(
            Command::parse("@alice see you").unwrap(),
            Command::Private {
                target: "alice".into(),
                text: "see you".into()
            }
        );
        assert_eq!(
            Command::parse("file 10.0.0.2 /tmp/my notes.txt").unwrap(),
            Command::SendFile {
                target: "10.0.0.2".into(),
                path: PathBuf::from("/tmp/my notes.txt")
            }
        );
        assert_eq!(
            Command::parse("mc hi group").unwrap(),
            Command::Multicast("hi group".into())
        );
    }

    #[test]
    fn test_parse_usage_errors() {
        assert!(matches!(Command::parse("@alice"), Err(Error::InvalidInput(_))));
        assert!(matches!(
            Command::parse("file alice"),
            Err(Error::InvalidInput(_))
        ));
        // "quitting" is just text
        assert_eq!(
            Command::parse("quitting").unwrap(),
            Command::Broadcast("quitting".into())
        );
    }

    #[test]
    fn test_broadcast_and_quit() {
        let mut harness = Harness::new(config());
        let engine = &harness.engine;
        assert_eq!(engine.parse_user_input("hi all").unwrap(), InputOutcome::Continue);
        assert_eq!(engine.parse_user_input("").unwrap(), InputOutcome::Continue);
        assert_eq!(engine.parse_user_input("quit").unwrap(), InputOutcome::Quit);

        let sent = harness.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|d| d.target == config().broadcast_addr()));
        assert!(matches!(sent[0].message, Message::Text { ref content, .. } if content == "hi all"));
        assert!(matches!(
            sent[1].message,
            Message::System {
                action: SystemAction::Quit,
                ..
            }
        ));
    }

    #[test]
    fn test_private_message_to_ambiguous_nickname() {
        let mut harness = Harness::new(config());
        let now = Instant::now();
        {
            let mut state = harness.engine.lock();
            state.peers.upsert_announce(PeerId::random(), "alice", SocketAddr::from(([10, 0, 0, 2], 54321)), now);
            state.peers.upsert_announce(PeerId::random(), "alice", SocketAddr::from(([10, 0, 0, 3], 54321)), now);
        }
        let result = harness.engine.parse_user_input("@alice hello");
        assert!(matches!(result, Err(Error::AmbiguousPeer { .. })));
        assert!(harness.sent().is_empty());

        let unknown = harness.engine.parse_user_input("@carol hello");
        assert!(matches!(unknown, Err(Error::PeerUnknown(_))));
    }

    #[test]
    fn test_multicast_requires_group() {
        let harness = Harness::new(config());
        assert!(matches!(
            harness.engine.parse_user_input("mc hello"),
            Err(Error::MulticastDisabled)
        ));

        let mut harness = Harness::new(Config {
            multicast_group: Some(Ipv4Addr::new(239, 255, 76, 67)),
            ..config()
        });
        harness.engine.parse_user_input("mc hello").unwrap();
        let sent = harness.sent();
        assert_eq!(
            sent[0].target,
            SocketAddr::from(([239, 255, 76, 67], config().port))
        );
    }

    #[test]
    fn test_file_command_reports_missing_file() {
        let mut harness = Harness::new(config());
        let result = harness.engine.parse_user_input("file 10.0.0.2 /no/such/file");
        assert!(matches!(result, Err(Error::File(_))));
        assert!(harness.sent().is_empty());
        assert_eq!(harness.engine.outbound_count(), 0);
    }

    #[test]
    fn test_peers_listing() {
        let mut harness = Harness::new(config());
        harness.engine.parse_user_input("peers").unwrap();
        assert_eq!(harness.emitted(), vec![ChatEvent::PeerList(vec![])]);
    }
}
