//! VRRP packet format and parsing.
//!
//! VRRPv3 (RFC 5798 Section 5.1):
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Version| Type  | Virtual Rtr ID|   Priority    | Count IP Addrs|
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |(rsvd) |     Max Adver Int     |          Checksum             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       IPv4 Address(es)                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! VRRPv2 (RFC 3768 Section 5.1) replaces the interval word with an
//! authentication type byte and an interval in seconds, and appends
//! 8 bytes of authentication data:
//!
//! ```text
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Version| Type  | Virtual Rtr ID|   Priority    | Count IP Addrs|
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Auth Type   |   Adver Int   |          Checksum             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       IPv4 Address(es)                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Authentication Data (1)                   |
//! |                     Authentication Data (2)                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use crate::checksum;
use crate::types::{ProtocolVersion, VRRP_MULTICAST_ADDR_V4, VRRP_TTL};
use bytes::{BufMut, Bytes, BytesMut};
use std::net::Ipv4Addr;
use thiserror::Error;

/// VRRP packet type (always 1 = ADVERTISEMENT)
const VRRP_TYPE_ADVERTISEMENT: u8 = 1;

/// "No authentication" (the only VRRPv2 auth type accepted)
pub const AUTH_TYPE_NONE: u8 = 0;

/// Fixed header length, both versions
pub const HEADER_LEN: usize = 8;

/// VRRPv2 authentication trailer length
const AUTH_DATA_LEN: usize = 8;

/// Offset of the checksum word inside the header
const CHECKSUM_OFFSET: usize = 6;

/// Minimum IPv4 header length
const IPV4_MIN_HEADER_LEN: usize = 20;

/// Reasons a received datagram is discarded.
///
/// These are not errors of the agent: the packet is logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("truncated IP header ({0} bytes)")]
    TruncatedIpHeader(usize),

    #[error("wrong ttl {0}")]
    Ttl(u8),

    #[error("wrong version {0}")]
    Version(u8),

    #[error("packet is too short: {actual} bytes, expected at least {expected}")]
    TooShort { actual: usize, expected: usize },

    #[error("invalid checksum")]
    Checksum,

    #[error("invalid vrid {0}")]
    Vrid(u8),

    #[error("authentication type {0} not supported")]
    AuthType(u8),

    #[error("virtual address count {actual} does not match {expected}")]
    AddressCount { actual: u8, expected: usize },

    #[error("virtual address mismatch at position {index}: {address}")]
    AddressMismatch { index: usize, address: Ipv4Addr },

    #[error("advertisement interval {actual} does not match {expected}")]
    Interval { actual: u16, expected: u16 },
}

/// Length of an encoded advertisement carrying `count` addresses.
pub fn encoded_len(version: ProtocolVersion, count: usize) -> usize {
    let trailer = match version {
        ProtocolVersion::V2 => AUTH_DATA_LEN,
        ProtocolVersion::V3 => 0,
    };
    HEADER_LEN + count * 4 + trailer
}

/// A decoded VRRP advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VRRPPacket {
    /// Protocol version (high nibble of the first byte)
    pub version: ProtocolVersion,

    /// Virtual Router ID (1-255)
    pub vrid: u8,

    /// Priority (1-255, 0 = master shutting down)
    pub priority: u8,

    /// Authentication type (VRRPv2 only, always 0 on send)
    pub auth_type: u8,

    /// Advertisement interval in native units (seconds v2, centiseconds v3)
    pub advert_interval: u16,

    /// Checksum as found on the wire (0 until encoded)
    pub checksum: u16,

    /// Virtual IP addresses
    pub ip_addresses: Vec<Ipv4Addr>,
}

impl VRRPPacket {
    /// Create a new VRRP advertisement packet
    pub fn new(
        version: ProtocolVersion,
        vrid: u8,
        priority: u8,
        advert_interval: u16,
        ips: Vec<Ipv4Addr>,
    ) -> Self {
        Self {
            version,
            vrid,
            priority,
            auth_type: AUTH_TYPE_NONE,
            advert_interval,
            checksum: 0,
            ip_addresses: ips,
        }
    }

    /// Serialize the packet and fill in its checksum.
    ///
    /// `src` and `dst` only matter for VRRPv3, whose checksum covers
    /// the IPv4 pseudo-header.
    pub fn encode(&self, src: Ipv4Addr, dst: Ipv4Addr) -> Bytes {
        let len = encoded_len(self.version, self.ip_addresses.len());
        let mut buf = BytesMut::with_capacity(len);

        buf.put_u8((self.version.number() << 4) | VRRP_TYPE_ADVERTISEMENT);
        buf.put_u8(self.vrid);
        buf.put_u8(self.priority);
        buf.put_u8(self.ip_addresses.len() as u8);
        match self.version {
            ProtocolVersion::V2 => {
                buf.put_u8(AUTH_TYPE_NONE);
                buf.put_u8(self.advert_interval as u8);
            }
            ProtocolVersion::V3 => buf.put_u16(self.advert_interval & 0x0fff),
        }
        buf.put_u16(0);

        for ip in &self.ip_addresses {
            buf.put_slice(&ip.octets());
        }

        if self.version == ProtocolVersion::V2 {
            buf.put_bytes(0, AUTH_DATA_LEN);
        }

        let sum = compute_checksum(self.version, &buf, src, dst);
        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());

        buf.freeze()
    }

    /// Parse an advertisement payload (no IP header).
    ///
    /// Only structure is checked here; see [`validate`] for the full
    /// receive-path rules.
    pub fn parse(data: &[u8]) -> Result<Self, Rejection> {
        if data.len() < HEADER_LEN {
            return Err(Rejection::TooShort {
                actual: data.len(),
                expected: HEADER_LEN,
            });
        }

        let version_nibble = data[0] >> 4;
        let version =
            ProtocolVersion::from_number(version_nibble).ok_or(Rejection::Version(version_nibble))?;

        let count = data[3] as usize;
        let expected = encoded_len(version, count);
        if data.len() < expected {
            return Err(Rejection::TooShort {
                actual: data.len(),
                expected,
            });
        }

        let (auth_type, advert_interval) = match version {
            ProtocolVersion::V2 => (data[4], data[5] as u16),
            ProtocolVersion::V3 => (AUTH_TYPE_NONE, u16::from_be_bytes([data[4] & 0x0f, data[5]])),
        };

        let ip_addresses = data[HEADER_LEN..HEADER_LEN + count * 4]
            .chunks_exact(4)
            .map(|o| Ipv4Addr::new(o[0], o[1], o[2], o[3]))
            .collect();

        Ok(Self {
            version,
            vrid: data[1],
            priority: data[2],
            auth_type,
            advert_interval,
            checksum: u16::from_be_bytes([data[6], data[7]]),
            ip_addresses,
        })
    }
}

fn compute_checksum(version: ProtocolVersion, payload: &[u8], src: Ipv4Addr, dst: Ipv4Addr) -> u16 {
    match version {
        ProtocolVersion::V2 => checksum::checksum(payload, 0),
        ProtocolVersion::V3 => checksum::checksum_with_pseudo_header(payload, src, dst),
    }
}

/// Fields of the enclosing IPv4 header the receive path needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub header_len: usize,
    pub total_len: usize,
    pub ttl: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    pub fn parse(datagram: &[u8]) -> Result<Self, Rejection> {
        if datagram.len() < IPV4_MIN_HEADER_LEN {
            return Err(Rejection::TruncatedIpHeader(datagram.len()));
        }
        let header_len = ((datagram[0] & 0x0f) as usize) * 4;
        if header_len < IPV4_MIN_HEADER_LEN || datagram.len() < header_len {
            return Err(Rejection::TruncatedIpHeader(datagram.len()));
        }
        Ok(Self {
            header_len,
            total_len: u16::from_be_bytes([datagram[2], datagram[3]]) as usize,
            ttl: datagram[8],
            src: Ipv4Addr::new(datagram[12], datagram[13], datagram[14], datagram[15]),
            dst: Ipv4Addr::new(datagram[16], datagram[17], datagram[18], datagram[19]),
        })
    }
}

/// What the local virtual router expects of a peer's advertisement.
#[derive(Debug, Clone, Copy)]
pub struct Expectation<'a> {
    pub version: ProtocolVersion,
    pub vrid: u8,
    pub virtual_ips: &'a [Ipv4Addr],
    /// Local interval in native units; enforced for VRRPv2 only
    pub advert_interval: u16,
}

/// A validated advertisement, reduced to what the state machine uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advertisement {
    pub priority: u8,
    pub source: Ipv4Addr,
    /// Advertised interval in microseconds (VRRPv3 only)
    pub advert_interval_usec: Option<u64>,
}

/// Validate a raw IPv4 datagram carrying an advertisement.
///
/// Checks run in a fixed order and stop at the first failure:
/// TTL, version, length, checksum, VRID, auth type (v2), address
/// list, interval (v2).
pub fn validate(datagram: &[u8], expect: &Expectation<'_>) -> Result<Advertisement, Rejection> {
    let ip = Ipv4Header::parse(datagram)?;

    if ip.ttl != VRRP_TTL {
        return Err(Rejection::Ttl(ip.ttl));
    }

    let end = ip.total_len.min(datagram.len()).max(ip.header_len);
    let payload = &datagram[ip.header_len..end];

    let Some(&first) = payload.first() else {
        return Err(Rejection::TooShort {
            actual: 0,
            expected: encoded_len(expect.version, expect.virtual_ips.len()),
        });
    };
    let version_nibble = first >> 4;
    if version_nibble != expect.version.number() {
        return Err(Rejection::Version(version_nibble));
    }

    let expected_len = encoded_len(expect.version, expect.virtual_ips.len());
    if payload.len() < expected_len {
        return Err(Rejection::TooShort {
            actual: payload.len(),
            expected: expected_len,
        });
    }

    let payload = &payload[..expected_len];
    if compute_checksum(expect.version, payload, ip.src, ip.dst) != 0 {
        return Err(Rejection::Checksum);
    }

    let packet = VRRPPacket::parse(payload)?;

    if packet.vrid != expect.vrid {
        return Err(Rejection::Vrid(packet.vrid));
    }

    if expect.version == ProtocolVersion::V2 && packet.auth_type != AUTH_TYPE_NONE {
        return Err(Rejection::AuthType(packet.auth_type));
    }

    if packet.ip_addresses.len() != expect.virtual_ips.len() {
        return Err(Rejection::AddressCount {
            actual: packet.ip_addresses.len() as u8,
            expected: expect.virtual_ips.len(),
        });
    }
    for (index, (got, want)) in packet.ip_addresses.iter().zip(expect.virtual_ips).enumerate() {
        if got != want {
            return Err(Rejection::AddressMismatch {
                index,
                address: *got,
            });
        }
    }

    let advert_interval_usec = match expect.version {
        ProtocolVersion::V2 => {
            if packet.advert_interval != expect.advert_interval {
                return Err(Rejection::Interval {
                    actual: packet.advert_interval,
                    expected: expect.advert_interval,
                });
            }
            None
        }
        ProtocolVersion::V3 => Some(expect.version.interval_to_usec(packet.advert_interval)),
    };

    Ok(Advertisement {
        priority: packet.priority,
        source: ip.src,
        advert_interval_usec,
    })
}

/// Wrap an encoded advertisement in an IPv4 header, as the kernel delivers
/// it on a raw socket. Used to build received datagrams in tests.
pub fn wrap_ipv4(payload: &[u8], src: Ipv4Addr, ttl: u8) -> Vec<u8> {
    let total = IPV4_MIN_HEADER_LEN + payload.len();
    let mut buf = Vec::with_capacity(total);
    buf.put_u8(0x45);
    buf.put_u8(0xc0);
    buf.put_u16(total as u16);
    buf.put_u32(0);
    buf.put_u8(ttl);
    buf.put_u8(crate::types::VRRP_PROTOCOL);
    buf.put_u16(0);
    buf.put_slice(&src.octets());
    buf.put_slice(&VRRP_MULTICAST_ADDR_V4.octets());
    let sum = checksum::checksum(&buf, 0);
    buf[10..12].copy_from_slice(&sum.to_be_bytes());
    buf.put_slice(payload);
    buf
}
