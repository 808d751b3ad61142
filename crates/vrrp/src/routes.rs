//! IPv4 route snapshot and restore over rtnetlink.
//!
//! Taking an interface down to change its MAC flushes every route through
//! it. The main table is dumped beforehand and the static routes through
//! the interface are re-added afterwards, directly connected routes first
//! so that gateways are reachable again when routes via them are added.

use bytes::{BufMut, BytesMut};
use common::{Error, Result};
use netlink_packet_core::{NLM_F_ACK, NLM_F_CREATE, NLM_F_DUMP, NLM_F_REQUEST, NLMSG_DONE, NLMSG_ERROR};
use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
use std::net::Ipv4Addr;
use tracing::{debug, trace, warn};

const NLMSG_HDRLEN: usize = 16;
const RTMSG_LEN: usize = 12;
const RTA_HDRLEN: usize = 4;

const RTM_NEWROUTE: u16 = 24;
const RTM_GETROUTE: u16 = 26;

const RT_TABLE_MAIN: u8 = 254;
const RTPROT_REDIRECT: u8 = 1;
const RTPROT_KERNEL: u8 = 2;
const RTN_UNICAST: u8 = 1;
const RTM_F_CLONED: u32 = 0x200;

const RTA_DST: u16 = 1;
const RTA_SRC: u16 = 2;
const RTA_IIF: u16 = 3;
const RTA_OIF: u16 = 4;
const RTA_GATEWAY: u16 = 5;
const RTA_PRIORITY: u16 = 6;
const RTA_PREFSRC: u16 = 7;
const RTA_METRICS: u16 = 8;
const RTA_FLOW: u16 = 11;

const EEXIST: i32 = 17;

fn align4(len: usize) -> usize {
    (len + 3) & !3
}

/// One saved main-table route.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Route {
    pub family: u8,
    pub dst_len: u8,
    pub src_len: u8,
    pub tos: u8,
    pub table: u8,
    pub protocol: u8,
    pub scope: u8,
    pub kind: u8,
    pub flags: u32,

    pub dst: Option<Ipv4Addr>,
    pub src: Option<Ipv4Addr>,
    pub prefsrc: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub oif: u32,
    pub iif: Option<u32>,
    pub priority: Option<u32>,
    pub flow: Option<u32>,
    /// Nested `RTAX_*` attributes, kept as received
    pub metrics: Option<Vec<u8>>,
}

impl Route {
    /// Whether a dumped route is one this module saves.
    ///
    /// Only main-table unicast routes with an output interface that were
    /// neither cloned, learned from a redirect, nor installed by the kernel.
    fn is_restorable(&self) -> bool {
        self.table == RT_TABLE_MAIN
            && self.flags & RTM_F_CLONED == 0
            && self.protocol != RTPROT_REDIRECT
            && self.protocol != RTPROT_KERNEL
            && self.kind == RTN_UNICAST
            && self.oif != 0
    }

    fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < RTMSG_LEN {
            return Err(Error::netlink(format!("rtmsg truncated to {} bytes", payload.len())));
        }
        let mut route = Route {
            family: payload[0],
            dst_len: payload[1],
            src_len: payload[2],
            tos: payload[3],
            table: payload[4],
            protocol: payload[5],
            scope: payload[6],
            kind: payload[7],
            flags: u32::from_ne_bytes([payload[8], payload[9], payload[10], payload[11]]),
            ..Default::default()
        };

        let mut attrs = &payload[RTMSG_LEN..];
        while attrs.len() >= RTA_HDRLEN {
            let len = u16::from_ne_bytes([attrs[0], attrs[1]]) as usize;
            let kind = u16::from_ne_bytes([attrs[2], attrs[3]]);
            if len < RTA_HDRLEN || len > attrs.len() {
                return Err(Error::netlink(format!("malformed route attribute {} ({} bytes)", kind, len)));
            }
            let data = &attrs[RTA_HDRLEN..len];
            let addr = || <[u8; 4]>::try_from(data).ok().map(Ipv4Addr::from);
            let word = || <[u8; 4]>::try_from(data).ok().map(u32::from_ne_bytes);
            match kind {
                RTA_DST => route.dst = addr(),
                RTA_SRC => route.src = addr(),
                RTA_PREFSRC => route.prefsrc = addr(),
                RTA_GATEWAY => route.gateway = addr(),
                RTA_OIF => route.oif = word().unwrap_or(0),
                RTA_IIF => route.iif = word(),
                RTA_PRIORITY => route.priority = word(),
                RTA_FLOW => route.flow = word(),
                RTA_METRICS => route.metrics = Some(data.to_vec()),
                _ => {}
            }
            attrs = &attrs[align4(len).min(attrs.len())..];
        }

        Ok(route)
    }

    fn emit(&self, buf: &mut BytesMut) {
        buf.put_u8(self.family);
        buf.put_u8(self.dst_len);
        buf.put_u8(self.src_len);
        buf.put_u8(self.tos);
        buf.put_u8(self.table);
        buf.put_u8(self.protocol);
        buf.put_u8(self.scope);
        buf.put_u8(self.kind);
        buf.put_u32_ne(self.flags);

        let addrs = [
            (RTA_SRC, self.src),
            (RTA_PREFSRC, self.prefsrc),
            (RTA_DST, self.dst),
            (RTA_GATEWAY, self.gateway),
        ];
        for (kind, addr) in addrs {
            if let Some(addr) = addr {
                put_attr(buf, kind, &addr.octets());
            }
        }
        let words = [
            (RTA_FLOW, self.flow),
            (RTA_OIF, Some(self.oif).filter(|&i| i != 0)),
            (RTA_IIF, self.iif),
            (RTA_PRIORITY, self.priority),
        ];
        for (kind, word) in words {
            if let Some(word) = word {
                put_attr(buf, kind, &word.to_ne_bytes());
            }
        }
        if let Some(metrics) = &self.metrics {
            put_attr(buf, RTA_METRICS, metrics);
        }
    }
}

fn put_attr(buf: &mut BytesMut, kind: u16, data: &[u8]) {
    let len = RTA_HDRLEN + data.len();
    buf.put_u16_ne(len as u16);
    buf.put_u16_ne(kind);
    buf.put_slice(data);
    buf.put_bytes(0, align4(len) - len);
}

fn encode_message(kind: u16, flags: u16, sequence: u32, body: impl FnOnce(&mut BytesMut)) -> BytesMut {
    let mut buf = BytesMut::with_capacity(256);
    buf.put_u32_ne(0);
    buf.put_u16_ne(kind);
    buf.put_u16_ne(flags);
    buf.put_u32_ne(sequence);
    buf.put_u32_ne(0);
    body(&mut buf);
    let len = (buf.len() as u32).to_ne_bytes();
    buf[0..4].copy_from_slice(&len);
    buf
}

/// `RTM_GETROUTE` dump request for the IPv4 table.
pub fn encode_dump_request(sequence: u32) -> BytesMut {
    encode_message(RTM_GETROUTE, NLM_F_REQUEST | NLM_F_DUMP, sequence, |buf| {
        buf.put_u8(libc::AF_INET as u8);
        buf.put_bytes(0, RTMSG_LEN - 1);
    })
}

/// `RTM_NEWROUTE` request re-creating `route`.
pub fn encode_new_route(route: &Route, sequence: u32) -> BytesMut {
    encode_message(
        RTM_NEWROUTE,
        NLM_F_REQUEST | NLM_F_CREATE | NLM_F_ACK,
        sequence,
        |buf| route.emit(buf),
    )
}

/// Outcome of parsing one receive buffer of a dump.
#[derive(Debug, Default)]
pub struct DumpChunk {
    pub routes: Vec<Route>,
    pub done: bool,
}

/// Parse the netlink messages of one dump buffer, keeping restorable routes.
pub fn parse_dump(mut buf: &[u8]) -> Result<DumpChunk> {
    let mut chunk = DumpChunk::default();
    while buf.len() >= NLMSG_HDRLEN {
        let len = u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let kind = u16::from_ne_bytes([buf[4], buf[5]]);
        if len < NLMSG_HDRLEN || len > buf.len() {
            return Err(Error::netlink(format!("malformed netlink message length {}", len)));
        }
        let payload = &buf[NLMSG_HDRLEN..len];

        match kind {
            NLMSG_DONE => {
                chunk.done = true;
                break;
            }
            NLMSG_ERROR => {
                let code = error_code(payload);
                return Err(Error::netlink(format!("route dump failed: errno {}", -code)));
            }
            RTM_NEWROUTE => {
                let route = Route::parse(payload)?;
                if route.is_restorable() {
                    trace!(?route, "Saved route");
                    chunk.routes.push(route);
                }
            }
            _ => {}
        }

        buf = &buf[align4(len).min(buf.len())..];
    }
    Ok(chunk)
}

fn error_code(payload: &[u8]) -> i32 {
    payload
        .get(0..4)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map_or(0, i32::from_ne_bytes)
}

/// Restore order: routes without a gateway first, otherwise as dumped.
pub fn restore_order(routes: &[Route]) -> Vec<&Route> {
    let (mut direct, via): (Vec<&Route>, Vec<&Route>) = routes.iter().partition(|r| r.gateway.is_none());
    direct.extend(via);
    direct
}

/// rtnetlink socket for route dumps and restores.
pub struct RouteSocket {
    socket: Socket,
    sequence: u32,
}

impl RouteSocket {
    pub fn new() -> Result<Self> {
        let mut socket = Socket::new(NETLINK_ROUTE)
            .map_err(|e| Error::netlink(format!("Failed to create netlink socket: {}", e)))?;

        socket
            .bind(&SocketAddr::new(0, 0))
            .map_err(|e| Error::netlink(format!("Failed to bind netlink socket: {}", e)))?;

        socket
            .connect(&SocketAddr::new(0, 0))
            .map_err(|e| Error::netlink(format!("Failed to connect netlink socket: {}", e)))?;

        Ok(Self { socket, sequence: 0 })
    }

    fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    fn send(&self, buf: &[u8]) -> Result<()> {
        self.socket
            .send(buf, 0)
            .map_err(|e| Error::netlink(format!("Failed to send netlink message: {}", e)))?;
        Ok(())
    }

    fn recv(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(65536);
        self.socket
            .recv(&mut buf, 0)
            .map_err(|e| Error::netlink(format!("Failed to receive netlink message: {}", e)))?;
        Ok(buf)
    }

    /// Dump the main IPv4 table, keeping restorable routes.
    pub fn snapshot(&mut self) -> Result<Vec<Route>> {
        let request = encode_dump_request(self.next_sequence());
        self.send(&request)?;

        let mut routes = Vec::new();
        loop {
            let buf = self.recv()?;
            let chunk = parse_dump(&buf)?;
            routes.extend(chunk.routes);
            if chunk.done {
                break;
            }
        }

        debug!(count = routes.len(), "Route snapshot taken");
        Ok(routes)
    }

    /// Re-add the saved routes whose output interface is `ifindex`.
    pub fn restore(&mut self, routes: &[Route], ifindex: u32) -> Result<()> {
        let mut restored = 0;
        for route in restore_order(routes).into_iter().filter(|r| r.oif == ifindex) {
            let request = encode_new_route(route, self.next_sequence());
            self.send(&request)?;

            let reply = self.recv()?;
            let code = match reply.get(4..6) {
                Some(&[lo, hi]) if u16::from_ne_bytes([lo, hi]) == NLMSG_ERROR => {
                    error_code(&reply[NLMSG_HDRLEN.min(reply.len())..])
                }
                _ => 0,
            };
            match -code {
                0 => restored += 1,
                EEXIST => trace!(dst = ?route.dst, "Route already present"),
                errno => {
                    warn!(dst = ?route.dst, gateway = ?route.gateway, errno, "Failed to restore route");
                    return Err(Error::netlink(format!(
                        "RTM_NEWROUTE for {:?} failed: {}",
                        route.dst,
                        std::io::Error::from_raw_os_error(errno)
                    )));
                }
            }
        }
        debug!(restored, ifindex, "Routes restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn static_route(dst: [u8; 4], gateway: Option<[u8; 4]>, oif: u32) -> Route {
        Route {
            family: libc::AF_INET as u8,
            dst_len: 24,
            table: RT_TABLE_MAIN,
            protocol: 4, // RTPROT_STATIC
            kind: RTN_UNICAST,
            dst: Some(Ipv4Addr::from(dst)),
            gateway: gateway.map(Ipv4Addr::from),
            oif,
            priority: Some(100),
            // RTAX_MTU = 1500
            metrics: Some(vec![8, 0, 2, 0, 0xdc, 0x05, 0, 0]),
            ..Default::default()
        }
    }

    fn done_message() -> BytesMut {
        encode_message(NLMSG_DONE, 0, 1, |buf| buf.put_u32_ne(0))
    }

    fn dump_of(routes: &[Route]) -> Vec<u8> {
        let mut buf = Vec::new();
        for route in routes {
            buf.extend_from_slice(&encode_new_route(route, 1));
        }
        buf
    }

    #[test]
    fn test_parse_dump_keeps_static_routes() {
        let route = static_route([10, 1, 0, 0], Some([10, 0, 0, 1]), 2);
        let mut buf = dump_of(std::slice::from_ref(&route));
        buf.extend_from_slice(&done_message());

        let chunk = parse_dump(&buf).unwrap();
        assert!(chunk.done);
        assert_eq!(chunk.routes, vec![route]);
    }

    #[test]
    fn test_parse_dump_filters() {
        let mut kernel = static_route([10, 0, 0, 0], None, 2);
        kernel.protocol = RTPROT_KERNEL;
        let mut redirect = static_route([10, 2, 0, 0], None, 2);
        redirect.protocol = RTPROT_REDIRECT;
        let mut cloned = static_route([10, 3, 0, 0], None, 2);
        cloned.flags = RTM_F_CLONED;
        let mut local_table = static_route([10, 4, 0, 0], None, 2);
        local_table.table = 255;
        let mut broadcast = static_route([10, 5, 0, 0], None, 2);
        broadcast.kind = 3;
        let no_oif = static_route([10, 6, 0, 0], None, 0);
        let kept = static_route([10, 7, 0, 0], None, 2);

        let buf = dump_of(&[kernel, redirect, cloned, local_table, broadcast, no_oif, kept.clone()]);
        let chunk = parse_dump(&buf).unwrap();
        assert!(!chunk.done);
        assert_eq!(chunk.routes, vec![kept]);
    }

    #[test]
    fn test_parse_dump_error() {
        let msg = encode_message(NLMSG_ERROR, 0, 1, |buf| buf.put_i32_ne(-1));
        assert!(matches!(parse_dump(&msg), Err(Error::Netlink(_))));
    }

    #[test]
    fn test_parse_dump_rejects_bad_length() {
        let mut msg = done_message().to_vec();
        msg[0..4].copy_from_slice(&400u32.to_ne_bytes());
        assert!(parse_dump(&msg).is_err());
    }

    #[test]
    fn test_restore_order_direct_first() {
        let a = static_route([10, 1, 0, 0], Some([10, 0, 0, 1]), 2);
        let b = static_route([10, 0, 0, 0], None, 2);
        let c = static_route([10, 2, 0, 0], Some([10, 0, 0, 1]), 2);
        let d = static_route([10, 9, 0, 0], None, 2);
        let routes = vec![a.clone(), b.clone(), c.clone(), d.clone()];

        let ordered: Vec<&Route> = restore_order(&routes);
        assert_eq!(ordered, vec![&b, &d, &a, &c]);
    }

    #[test]
    fn test_new_route_encoding() {
        let route = static_route([192, 168, 5, 0], Some([192, 168, 1, 254]), 7);
        let msg = encode_new_route(&route, 42);

        assert_eq!(u32::from_ne_bytes(msg[0..4].try_into().unwrap()) as usize, msg.len());
        assert_eq!(u16::from_ne_bytes([msg[4], msg[5]]), RTM_NEWROUTE);
        assert_eq!(
            u16::from_ne_bytes([msg[6], msg[7]]),
            NLM_F_REQUEST | NLM_F_CREATE | NLM_F_ACK
        );
        assert_eq!(u32::from_ne_bytes(msg[8..12].try_into().unwrap()), 42);
        assert_eq!(msg.len() % 4, 0);

        assert_eq!(Route::parse(&msg[NLMSG_HDRLEN..]).unwrap(), route);
    }

    #[test]
    fn test_dump_request() {
        let msg = encode_dump_request(3);
        assert_eq!(msg.len(), NLMSG_HDRLEN + RTMSG_LEN);
        assert_eq!(u16::from_ne_bytes([msg[4], msg[5]]), RTM_GETROUTE);
        assert_eq!(msg[NLMSG_HDRLEN], libc::AF_INET as u8);
    }
}
