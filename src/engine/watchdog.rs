//! Periodic timeout handling
//!
//! Once per tick the watchdog re-requests lost blocks, re-sends unanswered
//! file announces, answers pings and probes quiet peers. Everything it does
//! is bounded: a transfer is given a fixed number of retries and then
//! dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::{ChatEngine, ChatEvent, ChatState, LeaveReason};
use crate::protocol::SystemAction;

/// How long a download waits for the next block before asking again
pub const LOSS_GRACE: Duration = Duration::from_secs(1);
/// Re-requests of one block before the download is abandoned
pub const MAX_BLOCK_RETRIES: u32 = 5;
/// How long an upload waits for the first block request
pub const ANNOUNCE_GRACE: Duration = Duration::from_secs(5);
/// Re-announces before the upload is abandoned
pub const MAX_ANNOUNCE_RETRIES: u32 = 5;
/// An upload whose receiver stops asking for blocks is dropped after this
pub const SERVE_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

impl ChatEngine {
    /// Runs one watchdog sweep as of `now`
    pub fn tick(&self, now: Instant) {
        let mut state = self.lock();
        self.sweep_inbound(&mut state, now);
        self.sweep_outbound(&mut state, now);

        for addr in state.peers.take_pong_requests() {
            self.send_system(addr, SystemAction::Pong);
        }

        state.peers.sweep_liveness(
            now,
            self.config.alive_timeout,
            |peer| {
                debug!(peer_id = %peer.id, addr = %peer.addr, liveness = ?peer.liveness, "pinging quiet peer");
                self.send_system(peer.addr, SystemAction::Ping);
            },
            |peer| {
                info!(peer_id = %peer.id, addr = %peer.addr, "peer timed out");
                self.emit(ChatEvent::PeerLeft {
                    name: peer.display_name(),
                    addr: peer.addr,
                    reason: LeaveReason::TimedOut,
                });
            },
        );
    }

    fn sweep_inbound(&self, state: &mut ChatState, now: Instant) {
        let mut abandoned = Vec::new();
        for transfer in state.inbound.iter_mut() {
            if now.saturating_duration_since(transfer.last_block_at) <= LOSS_GRACE {
                continue;
            }
            if transfer.retry_count >= MAX_BLOCK_RETRIES {
                abandoned.push((transfer.source, transfer.transfer_id));
                continue;
            }
            transfer.retry_count += 1;
            debug!(
                source = %transfer.source,
                transfer_id = transfer.transfer_id,
                block_index = transfer.blocks_received,
                attempt = transfer.retry_count,
                "re-requesting block"
            );
            self.emit(ChatEvent::DownloadRetry {
                file_name: transfer.file_name.clone(),
                from: transfer.source,
                block_index: transfer.blocks_received,
                attempt: transfer.retry_count,
            });
            self.outbox
                .send(transfer.source, transfer.next_request(self.local.id));
        }

        for key in abandoned {
            if let Some(transfer) = state.inbound.remove(&key) {
                info!(source = %transfer.source, transfer_id = transfer.transfer_id, "download abandoned");
                self.emit(ChatEvent::DownloadFailed {
                    file_name: transfer.file_name.clone(),
                    from: transfer.source,
                    reason: format!("no answer after {} retries", MAX_BLOCK_RETRIES),
                });
                transfer.abort();
            }
        }
    }

    fn sweep_outbound(&self, state: &mut ChatState, now: Instant) {
        let mut abandoned = Vec::new();
        for transfer in state.outbound.iter_mut() {
            if transfer.first_block_acked {
                if now.saturating_duration_since(transfer.last_request_at) > SERVE_IDLE_TIMEOUT {
                    abandoned.push((transfer.transfer_id, "receiver stopped asking for blocks".to_string()));
                }
                continue;
            }
            if now.saturating_duration_since(transfer.announced_at) <= ANNOUNCE_GRACE {
                continue;
            }
            if transfer.retry_count >= MAX_ANNOUNCE_RETRIES {
                abandoned.push((
                    transfer.transfer_id,
                    format!("no answer after {} announces", MAX_ANNOUNCE_RETRIES + 1),
                ));
                continue;
            }
            transfer.retry_count += 1;
            transfer.announced_at = now;
            debug!(
                transfer_id = transfer.transfer_id,
                destination = %transfer.destination,
                attempt = transfer.retry_count,
                "re-announcing file"
            );
            self.outbox
                .send(transfer.destination, transfer.announce(self.local.id));
        }

        for (transfer_id, reason) in abandoned {
            if let Some(transfer) = state.outbound.remove(transfer_id) {
                info!(transfer_id, destination = %transfer.destination, %reason, "upload abandoned");
                self.emit(ChatEvent::UploadFailed {
                    transfer_id,
                    file_name: transfer.file_name,
                    to: transfer.destination,
                    reason,
                });
            }
        }
    }
}

/// Ticks the engine every `period` until shutdown is signalled
pub async fn run(engine: Arc<ChatEngine>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => engine.tick(Instant::now()),
            _ = shutdown.changed() => break,
        }
    }
    debug!("watchdog stopped");
}

#[cfg(test)]
mod tests {
    use super::super::tests::{config, Harness};
    use super::*;
    use crate::core::{Config, PeerId};
    use crate::protocol::{codec, Message};
    use std::io::Write;
    use std::net::SocketAddr;
    use tempfile::{NamedTempFile, TempDir};

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, last], 54321))
    }

    fn count<F: Fn(&Message) -> bool>(harness: &mut Harness, pred: F) -> usize {
        harness.sent().iter().filter(|d| pred(&d.message)).count()
    }

    #[test]
    fn test_block_retries_are_bounded() {
        let dir = TempDir::new().unwrap();
        let mut harness = Harness::new(Config {
            download_dir: dir.path().to_path_buf(),
            ..config()
        });
        let t0 = Instant::now();
        let announce = Message::TransferAnnounce {
            transfer_id: 3,
            total_blocks: 4,
            file_name: "lost.bin".into(),
            peer_id: PeerId::random(),
        };
        harness
            .engine
            .handle_datagram(&codec::encode(&announce), addr(3), t0);
        harness.sent();
        let path = dir.path().join("lost.bin");
        assert!(path.exists());

        // inside the grace window nothing is re-sent
        harness.engine.tick(t0 + LOSS_GRACE);
        assert_eq!(count(&mut harness, |m| matches!(m, Message::BlockRequest { .. })), 0);

        for second in 2..2 + MAX_BLOCK_RETRIES as u64 {
            harness.engine.tick(t0 + Duration::from_secs(second));
            assert_eq!(
                count(&mut harness, |m| matches!(
                    m,
                    Message::BlockRequest { block_index: 0, .. }
                )),
                1
            );
        }
        assert_eq!(harness.engine.inbound_count(), 1);

        harness.engine.tick(t0 + Duration::from_secs(10));
        assert_eq!(count(&mut harness, |m| matches!(m, Message::BlockRequest { .. })), 0);
        assert_eq!(harness.engine.inbound_count(), 0);
        assert!(!path.exists());
        assert!(harness
            .emitted()
            .iter()
            .any(|e| matches!(e, ChatEvent::DownloadFailed { .. })));
    }

    #[test]
    fn test_announce_retries_are_bounded() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"payload").unwrap();
        let mut harness = Harness::new(config());
        let t0 = Instant::now();
        harness
            .engine
            .send_file_at(addr(3), file.path(), t0)
            .unwrap();
        assert_eq!(harness.sent().len(), 1);

        let is_announce = |m: &Message| matches!(m, Message::TransferAnnounce { .. });
        harness.engine.tick(t0 + ANNOUNCE_GRACE);
        assert_eq!(count(&mut harness, is_announce), 0);

        let step = ANNOUNCE_GRACE + Duration::from_secs(1);
        let mut now = t0;
        for _ in 0..MAX_ANNOUNCE_RETRIES {
            now += step;
            harness.engine.tick(now);
            assert_eq!(count(&mut harness, is_announce), 1);
        }
        assert_eq!(harness.engine.outbound_count(), 1);

        now += step;
        harness.engine.tick(now);
        assert_eq!(count(&mut harness, is_announce), 0);
        assert_eq!(harness.engine.outbound_count(), 0);
        assert!(matches!(
            harness.emitted().last(),
            Some(ChatEvent::UploadFailed { .. })
        ));
    }

    #[test]
    fn test_idle_upload_dropped() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"payload").unwrap();
        let harness = Harness::new(config());
        let t0 = Instant::now();
        let id = harness.engine.send_file_at(addr(3), file.path(), t0).unwrap();

        let request = Message::BlockRequest {
            transfer_id: id,
            block_index: 0,
            peer_id: PeerId::random(),
        };
        harness
            .engine
            .handle_datagram(&codec::encode(&request), addr(3), t0);
        harness.engine.tick(t0 + SERVE_IDLE_TIMEOUT);
        assert_eq!(harness.engine.outbound_count(), 1);

        harness
            .engine
            .tick(t0 + SERVE_IDLE_TIMEOUT + Duration::from_secs(1));
        assert_eq!(harness.engine.outbound_count(), 0);
    }

    #[test]
    fn test_pong_sent_once() {
        let mut harness = Harness::new(config());
        let t0 = Instant::now();
        let ping = Message::System {
            peer_id: PeerId::random(),
            action: SystemAction::Ping,
        };
        harness
            .engine
            .handle_datagram(&codec::encode(&ping), addr(3), t0);

        let is_pong = |m: &Message| {
            matches!(
                m,
                Message::System {
                    action: SystemAction::Pong,
                    ..
                }
            )
        };
        harness.engine.tick(t0);
        assert_eq!(count(&mut harness, is_pong), 1);
        harness.engine.tick(t0 + Duration::from_secs(1));
        assert_eq!(count(&mut harness, is_pong), 0);
    }

    #[test]
    fn test_quiet_peer_pinged_then_dropped() {
        let mut harness = Harness::new(config());
        let t0 = Instant::now();
        let hello = Message::PeerAnnounce {
            peer_id: PeerId::random(),
            nickname: "bob".into(),
        };
        harness
            .engine
            .handle_datagram(&codec::encode(&hello), addr(3), t0);
        harness.sent();
        harness.emitted();

        let is_ping = |m: &Message| {
            matches!(
                m,
                Message::System {
                    action: SystemAction::Ping,
                    ..
                }
            )
        };
        let past = t0 + config().alive_timeout + Duration::from_millis(500);
        for second in 0..3 {
            harness.engine.tick(past + Duration::from_secs(second));
            assert_eq!(count(&mut harness, is_ping), 1);
        }
        harness.engine.tick(past + Duration::from_secs(3));
        assert!(harness.engine.peers().is_empty());
        assert_eq!(
            harness.emitted(),
            vec![ChatEvent::PeerLeft {
                name: "bob".into(),
                addr: addr(3),
                reason: LeaveReason::TimedOut
            }]
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let harness = Harness::new(config());
        let engine = Arc::new(harness.engine);
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run(engine, Duration::from_millis(10), rx));

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
