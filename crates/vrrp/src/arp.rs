//! ARP handling for the virtual router.
//!
//! Once the interface carries the virtual MAC, the kernel only answers ARP
//! for the interface's real address. The responder answers for the virtual
//! addresses while this router is MASTER.
//!
//! ```text
//! +-------+-------+-------+-------+-------+-------+
//! |  Ethernet dst (6) | Ethernet src (6) | 0x0806 |
//! +-------+-------+-------+-------+-------+-------+
//! |  HType=1  | PType=0x0800 | HLen=6 | PLen=4 | Op |
//! |  Sender MAC (6) | Sender IP (4)                 |
//! |  Target MAC (6) | Target IP (4)                 |
//! +-------+-------+-------+-------+-------+-------+
//! ```

use crate::shared::SharedState;
use crate::types::VRRPState;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read};
use std::mem;
use std::net::Ipv4Addr;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use tokio::io::unix::AsyncFd;
use tracing::{debug, info, trace, warn};

pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const HTYPE_ETHERNET: u16 = 1;
pub const ARP_OP_REQUEST: u16 = 1;
pub const ARP_OP_REPLY: u16 = 2;
pub const BROADCAST_MAC: [u8; 6] = [0xff; 6];

/// Ethernet header plus an IPv4-over-Ethernet ARP body
pub const ARP_FRAME_LEN: usize = 42;

/// The ARP body of an Ethernet frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    pub op: u16,
    pub sender_mac: [u8; 6],
    pub sender_ip: Ipv4Addr,
    pub target_mac: [u8; 6],
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// Parse an Ethernet frame; `None` unless it is IPv4-over-Ethernet ARP.
    pub fn parse(frame: &[u8]) -> Option<Self> {
        if frame.len() < ARP_FRAME_LEN {
            return None;
        }
        let be16 = |at: usize| u16::from_be_bytes([frame[at], frame[at + 1]]);
        if be16(12) != ETHERTYPE_ARP
            || be16(14) != HTYPE_ETHERNET
            || be16(16) != ETHERTYPE_IPV4
            || frame[18] != 6
            || frame[19] != 4
        {
            return None;
        }
        let mac = |at: usize| -> [u8; 6] {
            let mut m = [0u8; 6];
            m.copy_from_slice(&frame[at..at + 6]);
            m
        };
        let ip = |at: usize| Ipv4Addr::new(frame[at], frame[at + 1], frame[at + 2], frame[at + 3]);
        Some(Self {
            op: be16(20),
            sender_mac: mac(22),
            sender_ip: ip(28),
            target_mac: mac(32),
            target_ip: ip(38),
        })
    }

    /// Serialize behind an Ethernet header.
    pub fn to_frame(&self, eth_dst: [u8; 6], eth_src: [u8; 6]) -> [u8; ARP_FRAME_LEN] {
        let mut frame = [0u8; ARP_FRAME_LEN];
        frame[0..6].copy_from_slice(&eth_dst);
        frame[6..12].copy_from_slice(&eth_src);
        frame[12..14].copy_from_slice(&ETHERTYPE_ARP.to_be_bytes());
        frame[14..16].copy_from_slice(&HTYPE_ETHERNET.to_be_bytes());
        frame[16..18].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        frame[18] = 6;
        frame[19] = 4;
        frame[20..22].copy_from_slice(&self.op.to_be_bytes());
        frame[22..28].copy_from_slice(&self.sender_mac);
        frame[28..32].copy_from_slice(&self.sender_ip.octets());
        frame[32..38].copy_from_slice(&self.target_mac);
        frame[38..42].copy_from_slice(&self.target_ip.octets());
        frame
    }
}

/// Broadcast announcement of `ip` at `mac`.
pub fn gratuitous_frame(mac: [u8; 6], ip: Ipv4Addr) -> [u8; ARP_FRAME_LEN] {
    ArpPacket {
        op: ARP_OP_REQUEST,
        sender_mac: mac,
        sender_ip: ip,
        target_mac: mac,
        target_ip: ip,
    }
    .to_frame(BROADCAST_MAC, mac)
}

/// Decide whether `frame` deserves a reply on behalf of the virtual router.
///
/// Requests for the interface's own address are left to the kernel.
pub fn reply_for(
    frame: &[u8],
    own_ip: Ipv4Addr,
    virtual_ips: &[Ipv4Addr],
    virtual_mac: [u8; 6],
) -> Option<[u8; ARP_FRAME_LEN]> {
    let request = ArpPacket::parse(frame)?;
    if request.op != ARP_OP_REQUEST || request.target_ip == own_ip {
        return None;
    }
    if !virtual_ips.contains(&request.target_ip) {
        return None;
    }
    let reply = ArpPacket {
        op: ARP_OP_REPLY,
        sender_mac: virtual_mac,
        sender_ip: request.target_ip,
        target_mac: request.sender_mac,
        target_ip: request.sender_ip,
    };
    Some(reply.to_frame(request.sender_mac, virtual_mac))
}

/// Open an AF_PACKET socket for ARP frames, bound to `ifindex`.
pub fn open_arp_socket(ifindex: u32) -> io::Result<Socket> {
    let protocol = (ETHERTYPE_ARP.to_be()) as i32;
    let socket = Socket::new(Domain::PACKET, Type::RAW, Some(Protocol::from(protocol)))?;

    let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
    addr.sll_family = libc::AF_PACKET as u16;
    addr.sll_protocol = ETHERTYPE_ARP.to_be();
    addr.sll_ifindex = ifindex as i32;

    let res = unsafe {
        libc::bind(
            socket.as_raw_fd(),
            &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(socket)
}

/// Send one gratuitous ARP for `ip` out of `ifindex`.
pub fn send_gratuitous_arp(ifindex: u32, mac: [u8; 6], ip: Ipv4Addr) -> io::Result<()> {
    let socket = open_arp_socket(ifindex)?;
    socket.send(&gratuitous_frame(mac, ip))?;
    trace!(%ip, ifindex, "Sent gratuitous ARP");
    Ok(())
}

/// Answers ARP requests for the virtual addresses while MASTER.
pub struct ArpResponder {
    socket: AsyncFd<Socket>,
    shared: Arc<SharedState>,
    own_ip: Ipv4Addr,
    virtual_ips: Vec<Ipv4Addr>,
    virtual_mac: [u8; 6],
}

impl ArpResponder {
    /// Must be called from within a tokio runtime.
    pub fn new(
        ifindex: u32,
        own_ip: Ipv4Addr,
        virtual_ips: Vec<Ipv4Addr>,
        virtual_mac: [u8; 6],
        shared: Arc<SharedState>,
    ) -> io::Result<Self> {
        let socket = open_arp_socket(ifindex)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket: AsyncFd::new(socket)?,
            shared,
            own_ip,
            virtual_ips,
            virtual_mac,
        })
    }

    /// Run until the socket fails. The task is expected to be aborted at exit.
    pub async fn run(self) -> io::Result<()> {
        info!(ips = ?self.virtual_ips, "Starting ARP responder");
        let mut buf = [0u8; 1514];

        loop {
            self.shared.wait_until(|s| s == VRRPState::Master).await;

            // Requests queued while not MASTER are stale by now
            let mut socket: &Socket = self.socket.get_ref();
            let stale = drain_queued(&mut socket, &mut buf)?;
            if stale > 0 {
                debug!(frames = stale, "Discarded ARP frames queued before becoming master");
            }

            loop {
                let len = tokio::select! {
                    res = self.recv_frame(&mut buf) => res?,
                    _ = self.shared.wait_until(|s| s != VRRPState::Master) => break,
                };

                if let Some(reply) = reply_for(&buf[..len], self.own_ip, &self.virtual_ips, self.virtual_mac) {
                    match self.socket.get_ref().send(&reply) {
                        Ok(_) => debug!(target_ip = ?ArpPacket::parse(&reply).map(|p| p.sender_ip), "Answered ARP request"),
                        Err(e) => warn!(error = ?e, "Failed to send ARP reply"),
                    }
                }
            }
        }
    }

    async fn recv_frame(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.socket.readable().await?;
            match guard.try_io(|inner| (&*inner.get_ref()).read(buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

/// Read and discard everything already queued on a non-blocking reader.
/// Returns the number of frames dropped.
fn drain_queued(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut dropped = 0;
    loop {
        match reader.read(buf) {
            Ok(_) => dropped += 1,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(dropped),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}
