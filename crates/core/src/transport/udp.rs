use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use crate::error::Result;

/// UDP transport for outbound RTP packet delivery.
///
/// Binds one ephemeral socket in the destination's address family and
/// sends every packet to that destination. The destination is fixed for
/// the transport's lifetime.
pub struct UdpTransport {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl UdpTransport {
    /// Bind an ephemeral UDP socket for RTP towards `destination`.
    pub fn bind(destination: SocketAddr) -> Result<Self> {
        let local: SocketAddr = match destination {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local)?;
        tracing::debug!(local = %socket.local_addr()?, %destination, "RTP socket bound");
        Ok(Self {
            socket,
            destination,
        })
    }

    /// Send one datagram to the configured destination.
    pub fn send(&self, payload: &[u8]) -> Result<usize> {
        self.send_to(payload, self.destination)
    }

    /// Send raw bytes to a specific socket address.
    pub fn send_to(&self, payload: &[u8], addr: SocketAddr) -> Result<usize> {
        Ok(self.socket.send_to(payload, addr)?)
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}
