//! Datagram channel abstraction and its UDP implementation.
//!
//! The protocol engine talks to the network only through [`Channel`]: send a
//! datagram to an address, receive the next datagram with its source.  The
//! channel carries raw bytes; decoding happens in the connection layer, where
//! "nothing arrived" and "arrived corrupted" ([`crate::frame::FrameError`])
//! are handled separately.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket`;
//! [`crate::simulator::Simulator`] wraps any channel with fault injection.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::frame::{HEADER_LEN, MAX_PAYLOAD};

/// Receive buffer size; anything longer than a full frame is rejected by the
/// frame decoder anyway.
const MAX_DATAGRAM: usize = 2 * (HEADER_LEN + MAX_PAYLOAD);

/// An unreliable datagram channel.
///
/// Sends are fire-and-forget: `Ok` only means the datagram was handed to the
/// transport.
pub trait Channel: Send + Sync {
    /// Send one datagram to `dest`.
    fn send_to(
        &self,
        datagram: &[u8],
        dest: SocketAddr,
    ) -> impl Future<Output = io::Result<()>> + Send;

    /// Wait for the next datagram, returning its bytes and source address.
    fn recv_from(&self) -> impl Future<Output = io::Result<(Vec<u8>, SocketAddr)>> + Send;

    /// Address this channel is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl<C: Channel> Channel for Arc<C> {
    fn send_to(
        &self,
        datagram: &[u8],
        dest: SocketAddr,
    ) -> impl Future<Output = io::Result<()>> + Send {
        (**self).send_to(datagram, dest)
    }

    fn recv_from(&self) -> impl Future<Output = io::Result<(Vec<u8>, SocketAddr)>> + Send {
        (**self).recv_from()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        (**self).local_addr()
    }
}

/// Returns true if a receive error is likely transient, i.e. it says nothing
/// about whether the peer is still there.
///
/// An ICMP port-unreachable for an earlier send surfaces on some platforms as
/// `ConnectionRefused`/`ConnectionReset` on the next receive.
pub fn is_transient_io_error(e: &io::Error) -> bool {
    use io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::TimedOut
            | ErrorKind::WouldBlock
            | ErrorKind::Interrupted
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
    )
}

/// An async UDP socket speaking raw datagrams.
///
/// All methods are `&self` so the socket can be shared across tasks if needed.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        log::debug!("[socket] bound {local_addr}");
        Ok(Self { local_addr, inner })
    }

    /// Bind an ephemeral port of the same address family as `peer`.
    pub async fn bind_for(peer: SocketAddr) -> io::Result<Self> {
        let any: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        Self::bind(any).await
    }
}

impl Channel for Socket {
    async fn send_to(&self, datagram: &[u8], dest: SocketAddr) -> io::Result<()> {
        self.inner.send_to(datagram, dest).await?;
        Ok(())
    }

    async fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, addr))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }
}
