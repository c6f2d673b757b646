use std::net::{Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::info;

use crate::core::{Config, Error, Result};

/// Binds the chat socket: address reuse, broadcast enabled, and the
/// multicast group joined when one is configured. Must be called inside a
/// tokio runtime.
pub fn bind(config: &Config) -> Result<UdpSocket> {
    let addr = config.bind_addr();
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| Error::network(format!("Failed to create socket: {}", e)))?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv4() {
        socket.set_broadcast(true)?;
    }
    socket
        .bind(&addr.into())
        .map_err(|e| Error::network(format!("Failed to bind {}: {}", addr, e)))?;

    if let Some(group) = config.multicast_group {
        let interface = match addr {
            SocketAddr::V4(v4) => *v4.ip(),
            SocketAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        };
        socket
            .join_multicast_v4(&group, &interface)
            .map_err(|e| Error::network(format!("Failed to join {}: {}", group, e)))?;
        socket.set_multicast_loop_v4(true)?;
        socket.set_multicast_ttl_v4(1)?;
        info!(%group, "joined multicast group");
    }

    socket.set_nonblocking(true)?;
    let socket = UdpSocket::from_std(socket.into())?;
    info!(addr = %socket.local_addr()?, "listening");
    Ok(socket)
}
