//! VRRP advertisement transport.
//!
//! Advertisements travel in raw IPv4 datagrams (protocol 112) to the
//! 224.0.0.18 group with TTL 255. Received datagrams include the IP
//! header so the TTL and source address can be checked.

use crate::types::{VRRP_MULTICAST_ADDR_V4, VRRP_PROTOCOL, VRRP_TTL};
use async_trait::async_trait;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tracing::{debug, trace, warn};

/// Large enough for any IPv4 header plus a 16-address advertisement.
const RECV_BUFFER_LEN: usize = 2048;

/// Sends and receives advertisement payloads.
#[async_trait]
pub trait AdvertTransport: Send {
    /// Send one VRRP payload to the multicast group.
    async fn send(&mut self, payload: &[u8]) -> io::Result<()>;

    /// Wait up to `timeout` for one IPv4 datagram; `None` when none arrived.
    async fn recv(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>>;
}

/// Raw IPv4 socket joined to the VRRP group on one interface.
pub struct VRRPSocket {
    socket: AsyncFd<Socket>,
    local: Ipv4Addr,
}

impl VRRPSocket {
    /// Open the socket on the interface whose primary address is `local`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(local: Ipv4Addr) -> io::Result<Self> {
        let socket = Socket::new(
            Domain::IPV4,
            Type::RAW,
            Some(Protocol::from(VRRP_PROTOCOL as i32)),
        )?;

        socket.set_nonblocking(true)?;
        socket.set_ttl_v4(VRRP_TTL as u32)?;
        socket.set_multicast_ttl_v4(VRRP_TTL as u32)?;
        socket.set_multicast_loop_v4(false)?;
        socket.set_multicast_if_v4(&local)?;
        socket.join_multicast_v4(&VRRP_MULTICAST_ADDR_V4, &local)?;

        debug!(%local, "Joined VRRP multicast group");

        Ok(Self {
            socket: AsyncFd::new(socket)?,
            local,
        })
    }

    async fn recv_datagram(&self) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        loop {
            let mut guard = self.socket.readable().await?;
            match guard.try_io(|inner| (&*inner.get_ref()).read(&mut buf)) {
                Ok(Ok(len)) => {
                    buf.truncate(len);
                    return Ok(buf);
                }
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
    }
}

#[async_trait]
impl AdvertTransport for VRRPSocket {
    async fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        let dest = SockAddr::from(SocketAddrV4::new(VRRP_MULTICAST_ADDR_V4, 0));
        loop {
            let mut guard = self.socket.writable().await?;
            match guard.try_io(|inner| inner.get_ref().send_to(payload, &dest)) {
                Ok(result) => {
                    let sent = result?;
                    trace!(bytes = sent, "Sent advertisement");
                    return Ok(());
                }
                Err(_would_block) => continue,
            }
        }
    }

    async fn recv(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        match tokio::time::timeout(timeout, self.recv_datagram()).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }
}

impl Drop for VRRPSocket {
    fn drop(&mut self) {
        if let Err(e) = self
            .socket
            .get_ref()
            .leave_multicast_v4(&VRRP_MULTICAST_ADDR_V4, &self.local)
        {
            warn!(error = ?e, "Failed to leave VRRP multicast group");
        }
    }
}
