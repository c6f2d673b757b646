use std::net::SocketAddr;
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use super::{ChatEngine, ChatEvent, ChatState, LeaveReason};
use crate::core::{Error, PeerId, Result};
use crate::network::AnnounceOutcome;
use crate::protocol::{codec, Message, SystemAction};
use crate::transfer::{BlockOutcome, OfferOutcome};

impl ChatEngine {
    /// Entry point for every datagram the socket receives
    pub fn on_datagram_received(&self, bytes: &[u8], source: SocketAddr) {
        self.handle_datagram(bytes, source, Instant::now());
    }

    /// Decodes and dispatches one datagram as if it arrived at `now`.
    /// Malformed or unexpected input is logged and dropped.
    pub fn handle_datagram(&self, bytes: &[u8], source: SocketAddr, now: Instant) {
        let message = match codec::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                trace!(%source, error = %e, len = bytes.len(), "dropping undecodable datagram");
                return;
            }
        };
        if message.peer_id() == self.local.id {
            trace!(kind = message.kind(), "ignoring own datagram");
            return;
        }

        trace!(%source, kind = message.kind(), "received");
        let mut state = self.lock();
        if let Err(e) = self.dispatch(&mut state, message, source, now) {
            if e.is_benign() {
                debug!(%source, error = %e, "ignoring datagram");
            } else {
                warn!(%source, error = %e, "failed to handle datagram");
            }
        }
    }

    fn dispatch(
        &self,
        state: &mut ChatState,
        message: Message,
        source: SocketAddr,
        now: Instant,
    ) -> Result<()> {
        let peer_id = message.peer_id();
        match &message {
            // leaving is not a sign of life, and announces do their own upsert
            Message::System {
                action: SystemAction::Quit,
                ..
            }
            | Message::PeerAnnounce { .. } => {}
            _ => {
                if state.peers.touch(peer_id, source, now) {
                    debug!(%peer_id, %source, "new peer");
                }
            }
        }

        match message {
            Message::System { action, .. } => self.on_system(state, peer_id, action, source),

            Message::PeerAnnounce { nickname, .. } => {
                match state.peers.upsert_announce(peer_id, &nickname, source, now) {
                    AnnounceOutcome::New => {
                        info!(%peer_id, %source, %nickname, "peer joined");
                        self.emit(ChatEvent::PeerJoined {
                            nickname,
                            addr: source,
                        });
                        self.announce_to(source);
                    }
                    AnnounceOutcome::Updated => {
                        debug!(%peer_id, %nickname, "peer re-announced");
                    }
                }
                Ok(())
            }

            Message::Text { content, .. } => {
                let from = state
                    .peers
                    .get(&peer_id)
                    .map(|peer| peer.display_name())
                    .unwrap_or_else(|| peer_id.to_string());
                self.emit(ChatEvent::TextReceived {
                    from,
                    addr: source,
                    text: content,
                });
                Ok(())
            }

            Message::TransferAnnounce {
                transfer_id,
                total_blocks,
                file_name,
                ..
            } => {
                let outcome = state.inbound.on_transfer_announce(
                    transfer_id,
                    total_blocks,
                    &file_name,
                    source,
                    self.local.id,
                    now,
                );
                match outcome {
                    Ok(OfferOutcome::Started {
                        file_name, request, ..
                    }) => {
                        self.emit(ChatEvent::DownloadStarted {
                            file_name,
                            from: source,
                            total_blocks,
                        });
                        self.outbox.send(source, request);
                    }
                    Ok(OfferOutcome::Completed {
                        file_name,
                        path,
                        done,
                    }) => {
                        self.emit(ChatEvent::DownloadCompleted {
                            file_name,
                            from: source,
                            path,
                        });
                        self.outbox.send(source, done);
                    }
                    Ok(OfferOutcome::Duplicate { file_name }) => {
                        self.emit(ChatEvent::DuplicateTransfer {
                            file_name,
                            from: source,
                        });
                    }
                    Err(e) => {
                        self.emit(ChatEvent::DownloadFailed {
                            file_name,
                            from: source,
                            reason: e.to_string(),
                        });
                        return Err(e.into());
                    }
                }
                Ok(())
            }

            Message::DataBlock {
                transfer_id,
                block_index,
                payload,
                ..
            } => {
                let outcome = state.inbound.on_data_block(
                    transfer_id,
                    block_index,
                    &payload,
                    source,
                    self.local.id,
                    now,
                )?;
                match outcome {
                    BlockOutcome::Next { request, progress } => {
                        if let Some((received, total_blocks)) = progress {
                            if let Some(transfer) = state.inbound.get(&(source, transfer_id)) {
                                self.emit(ChatEvent::DownloadProgress {
                                    file_name: transfer.file_name.clone(),
                                    from: source,
                                    received,
                                    total_blocks,
                                });
                            }
                        }
                        self.outbox.send(source, request);
                    }
                    BlockOutcome::Completed {
                        file_name,
                        path,
                        done,
                    } => {
                        info!(%source, transfer_id, path = %path.display(), "download complete");
                        self.emit(ChatEvent::DownloadCompleted {
                            file_name,
                            from: source,
                            path,
                        });
                        self.outbox.send(source, done);
                    }
                    BlockOutcome::Failed { file_name, error } => {
                        warn!(%source, transfer_id, %error, "download aborted");
                        self.emit(ChatEvent::DownloadFailed {
                            file_name,
                            from: source,
                            reason: error.to_string(),
                        });
                    }
                }
                Ok(())
            }

            Message::BlockRequest {
                transfer_id,
                block_index,
                ..
            } => {
                let block = state.outbound.on_block_request(
                    transfer_id,
                    block_index,
                    source,
                    self.local.id,
                    now,
                )?;
                self.outbox.send(source, block);
                Ok(())
            }
        }
    }

    fn on_system(
        &self,
        state: &mut ChatState,
        peer_id: PeerId,
        action: SystemAction,
        source: SocketAddr,
    ) -> Result<()> {
        match action {
            SystemAction::Enter => {
                let name = state
                    .peers
                    .get(&peer_id)
                    .map(|peer| peer.display_name())
                    .unwrap_or_else(|| peer_id.to_string());
                self.emit(ChatEvent::PeerEntered { name, addr: source });
            }
            SystemAction::Quit => {
                let peer = state
                    .peers
                    .remove(&peer_id)
                    .ok_or_else(|| Error::peer_unknown(format!("{} quit", peer_id)))?;
                info!(%peer_id, %source, "peer quit");
                self.emit(ChatEvent::PeerLeft {
                    name: peer.display_name(),
                    addr: source,
                    reason: LeaveReason::Quit,
                });
            }
            SystemAction::Ping => {
                state.peers.request_pong(&peer_id);
            }
            SystemAction::Pong => {}
            SystemAction::TransferComplete(transfer_id) => {
                let transfer = state.outbound.on_complete(transfer_id, source).ok_or_else(|| {
                    Error::protocol(format!("completion for unknown transfer {}", transfer_id))
                })?;
                info!(transfer_id, %source, file = %transfer.file_name, "upload complete");
                self.emit(ChatEvent::UploadCompleted {
                    transfer_id,
                    file_name: transfer.file_name,
                    to: source,
                });
            }
            SystemAction::Other(action) => {
                debug!(%peer_id, %action, "unknown system action");
            }
        }
        Ok(())
    }
}
