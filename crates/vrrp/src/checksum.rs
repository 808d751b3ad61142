//! RFC 1071 Internet checksum.
//!
//! VRRPv2 checksums the advertisement alone. VRRPv3 prefixes it with an
//! IPv4 pseudo-header:
//!
//! ```text
//! +--------+--------+--------+--------+
//! |          Source Address           |
//! +--------+--------+--------+--------+
//! |        Destination Address        |
//! +--------+--------+--------+--------+
//! |  zero  |  112   |  VRRP Length    |
//! +--------+--------+--------+--------+
//! ```

use crate::types::VRRP_PROTOCOL;
use std::net::Ipv4Addr;

/// Accumulate 16-bit big-endian words of `data` onto `sum`.
///
/// A trailing odd byte is the high byte of a zero-padded word.
pub fn partial_sum(data: &[u8], mut sum: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum = fold_once(sum + u16::from_be_bytes([word[0], word[1]]) as u32);
    }
    if let [odd] = chunks.remainder() {
        sum = fold_once(sum + ((*odd as u32) << 8));
    }
    sum
}

fn fold_once(sum: u32) -> u32 {
    (sum & 0xffff) + (sum >> 16)
}

/// Fold carries and complement.
pub fn finish(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = fold_once(sum);
    }
    !(sum as u16)
}

/// Ones'-complement checksum over `data`, seeded with `prior`.
///
/// Running it over a buffer whose checksum field is already filled in
/// yields zero when the buffer is intact.
pub fn checksum(data: &[u8], prior: u32) -> u16 {
    finish(partial_sum(data, prior))
}

/// The 12-byte IPv4 pseudo-header used by VRRPv3.
pub fn pseudo_header_v4(src: Ipv4Addr, dst: Ipv4Addr, length: u16) -> [u8; 12] {
    let mut header = [0u8; 12];
    header[0..4].copy_from_slice(&src.octets());
    header[4..8].copy_from_slice(&dst.octets());
    header[9] = VRRP_PROTOCOL;
    header[10..12].copy_from_slice(&length.to_be_bytes());
    header
}

/// Checksum of `payload` behind an IPv4 pseudo-header.
pub fn checksum_with_pseudo_header(payload: &[u8], src: Ipv4Addr, dst: Ipv4Addr) -> u16 {
    let pseudo = pseudo_header_v4(src, dst, payload.len() as u16);
    checksum(payload, partial_sum(&pseudo, 0))
}
