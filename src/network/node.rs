use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures::future::join_all;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::codec::Encoder;
use tracing::{debug, info, trace, warn};

use super::outbox::{Datagram, Outbox};
use super::socket;
use crate::core::{Config, Error, Result, MAX_DATAGRAM_SIZE};
use crate::engine::{watchdog, ChatEngine, EventSink};
use crate::protocol::{MessageCodec, SystemAction};

/// A running chat node: one socket, a receive loop, a send loop and the
/// watchdog, all sharing one engine.
#[derive(Debug)]
pub struct Node {
    engine: Arc<ChatEngine>,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Binds the socket and spawns the node's tasks
    pub async fn start(config: Config, events: EventSink) -> Result<Node> {
        config.validate()?;
        let socket = Arc::new(socket::bind(&config)?);
        let local_addr = socket.local_addr()?;

        let (outbox, outgoing) = Outbox::channel();
        let period = config.watchdog_interval;
        let engine = Arc::new(ChatEngine::new(config, outbox, events));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let tasks = vec![
            tokio::spawn(recv_loop(socket.clone(), engine.clone(), shutdown_rx.clone())),
            tokio::spawn(send_loop(socket, outgoing, shutdown_rx.clone())),
            tokio::spawn(watchdog::run(engine.clone(), period, shutdown_rx)),
        ];
        info!(peer_id = %engine.local_peer().id, %local_addr, "node started");

        Ok(Node {
            engine,
            local_addr,
            shutdown,
            tasks,
        })
    }

    pub fn engine(&self) -> &Arc<ChatEngine> {
        &self.engine
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Tells the segment we are here: peer announce plus an enter notice
    pub fn join_chat(&self) {
        let broadcast = self.engine.config().broadcast_addr();
        self.engine.announce();
        self.engine.send_system(broadcast, SystemAction::Enter);
    }

    /// Stops all tasks. Datagrams already queued are sent first.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        for result in join_all(self.tasks).await {
            result.map_err(|e| Error::network(format!("Node task failed: {}", e)))?;
        }
        info!("node stopped");
        Ok(())
    }
}

/// First pause after a failed receive; doubles per consecutive failure
const RECV_BACKOFF_START: Duration = Duration::from_millis(10);
const RECV_BACKOFF_MAX: Duration = Duration::from_secs(1);

fn recv_backoff(failures: u32) -> Duration {
    let doublings = failures.saturating_sub(1).min(16);
    RECV_BACKOFF_START
        .saturating_mul(1 << doublings)
        .min(RECV_BACKOFF_MAX)
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    engine: Arc<ChatEngine>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut failures = 0u32;
    loop {
        let received = tokio::select! {
            _ = shutdown.changed() => break,
            result = socket.recv_from(&mut buf) => result,
        };
        match received {
            Ok((len, source)) => {
                failures = 0;
                engine.on_datagram_received(&buf[..len], source);
            }
            Err(e) => {
                // ICMP port unreachable surfaces here on some platforms
                failures = failures.saturating_add(1);
                let delay = recv_backoff(failures);
                debug!(error = %e, failures, ?delay, "receive failed");
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = time::sleep(delay) => {}
                }
            }
        }
    }
    debug!("receive loop stopped");
}

async fn send_loop(
    socket: Arc<UdpSocket>,
    mut outgoing: mpsc::UnboundedReceiver<Datagram>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut codec = MessageCodec::new();
    let mut buf = BytesMut::new();
    loop {
        tokio::select! {
            biased;
            datagram = outgoing.recv() => match datagram {
                Some(datagram) => send(&socket, &mut codec, &mut buf, datagram).await,
                None => break,
            },
            _ = shutdown.changed() => {
                while let Ok(datagram) = outgoing.try_recv() {
                    send(&socket, &mut codec, &mut buf, datagram).await;
                }
                break;
            }
        }
    }
    debug!("send loop stopped");
}

async fn send(socket: &UdpSocket, codec: &mut MessageCodec, buf: &mut BytesMut, datagram: Datagram) {
    let Datagram { target, message } = datagram;
    let kind = message.kind();
    buf.clear();
    if let Err(e) = codec.encode(message, buf) {
        warn!(%target, kind, error = %e, "failed to encode datagram");
        return;
    }
    match socket.send_to(&buf[..], target).await {
        Ok(_) => trace!(%target, kind, len = buf.len(), "sent"),
        // a lost datagram is recovered by the watchdog
        Err(e) => debug!(%target, kind, error = %e, "send failed"),
    }
}
