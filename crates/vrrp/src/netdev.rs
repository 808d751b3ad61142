//! Linux netdevice ioctls.
//!
//! Interface flags, hardware address and primary IPv4 address are read and
//! written through `SIOC*IF*` requests on a throwaway datagram socket.

use crate::types::{IFNAMSIZ, InterfaceBinding};
use common::{Error, Result};
use libc::{c_int, c_short};
use socket2::{Domain, Socket, Type};
use std::ffi::CString;
use std::io;
use std::net::Ipv4Addr;
use std::os::fd::AsRawFd;
use tracing::debug;

/// `struct ifreq` viewed through `ifr_flags`.
#[repr(C)]
struct IfReqFlags {
    name: [u8; IFNAMSIZ],
    flags: c_short,
    _pad: [u8; 22],
}

/// `struct ifreq` viewed through `ifr_addr` / `ifr_hwaddr`.
#[repr(C)]
struct IfReqAddr {
    name: [u8; IFNAMSIZ],
    addr: libc::sockaddr,
    _pad: [u8; 8],
}

fn ifname_bytes(name: &str) -> Result<[u8; IFNAMSIZ]> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() >= IFNAMSIZ || bytes.contains(&0) {
        return Err(Error::interface(format!("invalid interface name {:?}", name)));
    }
    let mut buf = [0u8; IFNAMSIZ];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(buf)
}

fn ioctl_socket() -> io::Result<Socket> {
    Socket::new(Domain::IPV4, Type::DGRAM, None)
}

fn ioctl<T>(socket: &Socket, request: libc::c_ulong, req: &mut T) -> io::Result<()> {
    let res: c_int = unsafe { libc::ioctl(socket.as_raw_fd(), request as _, req as *mut T) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn empty_addr_req(name: &str) -> Result<IfReqAddr> {
    Ok(IfReqAddr {
        name: ifname_bytes(name)?,
        addr: unsafe { std::mem::zeroed() },
        _pad: [0; 8],
    })
}

fn get_flags(socket: &Socket, name: &str) -> Result<c_short> {
    let mut req = IfReqFlags {
        name: ifname_bytes(name)?,
        flags: 0,
        _pad: [0; 22],
    };
    ioctl(socket, libc::SIOCGIFFLAGS as _, &mut req)
        .map_err(|e| Error::interface(format!("{}: SIOCGIFFLAGS failed: {}", name, e)))?;
    Ok(req.flags)
}

fn set_flags(socket: &Socket, name: &str, flags: c_short) -> Result<()> {
    let mut req = IfReqFlags {
        name: ifname_bytes(name)?,
        flags,
        _pad: [0; 22],
    };
    ioctl(socket, libc::SIOCSIFFLAGS as _, &mut req)
        .map_err(|e| Error::interface(format!("{}: SIOCSIFFLAGS failed: {}", name, e)))
}

/// Interface index, via `if_nametoindex(3)`.
pub fn if_index(name: &str) -> Result<u32> {
    let cname = CString::new(name).map_err(|_| Error::interface(format!("invalid interface name {:?}", name)))?;
    let index = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if index == 0 {
        return Err(Error::interface(format!(
            "{}: no such interface: {}",
            name,
            io::Error::last_os_error()
        )));
    }
    Ok(index)
}

/// Current hardware address.
pub fn get_hw_addr(name: &str) -> Result<[u8; 6]> {
    let socket = ioctl_socket()?;
    let mut req = empty_addr_req(name)?;
    ioctl(&socket, libc::SIOCGIFHWADDR as _, &mut req)
        .map_err(|e| Error::interface(format!("{}: SIOCGIFHWADDR failed: {}", name, e)))?;

    let mut mac = [0u8; 6];
    for (dst, src) in mac.iter_mut().zip(req.addr.sa_data.iter()) {
        *dst = *src as u8;
    }
    Ok(mac)
}

/// Primary IPv4 address.
pub fn get_ipv4_addr(name: &str) -> Result<Ipv4Addr> {
    let socket = ioctl_socket()?;
    let mut req = empty_addr_req(name)?;
    req.addr.sa_family = libc::AF_INET as libc::sa_family_t;
    ioctl(&socket, libc::SIOCGIFADDR as _, &mut req)
        .map_err(|e| Error::interface(format!("{}: SIOCGIFADDR failed: {}", name, e)))?;

    // sockaddr_in: port in sa_data[0..2], address in sa_data[2..6]
    let d = &req.addr.sa_data;
    Ok(Ipv4Addr::new(d[2] as u8, d[3] as u8, d[4] as u8, d[5] as u8))
}

/// Replace the hardware address.
///
/// Most drivers refuse the change while the link is up, so the interface is
/// brought down first and its previous flags restored afterwards.
pub fn set_hw_addr(name: &str, mac: [u8; 6]) -> Result<()> {
    let socket = ioctl_socket()?;
    let flags = get_flags(&socket, name)?;
    set_flags(&socket, name, flags & !(libc::IFF_UP as c_short))?;

    let mut req = empty_addr_req(name)?;
    req.addr.sa_family = libc::ARPHRD_ETHER as libc::sa_family_t;
    for (dst, src) in req.addr.sa_data.iter_mut().zip(mac.iter()) {
        *dst = *src as libc::c_char;
    }
    let result = ioctl(&socket, libc::SIOCSIFHWADDR as _, &mut req)
        .map_err(|e| Error::interface(format!("{}: SIOCSIFHWADDR failed: {}", name, e)));

    // Restore the link even if the address change failed.
    set_flags(&socket, name, flags)?;
    result?;

    debug!(interface = name, mac = %format_mac(&mac), "Hardware address changed");
    Ok(())
}

/// Toggle `IFF_PROMISC`.
pub fn set_promiscuous(name: &str, enable: bool) -> Result<()> {
    let socket = ioctl_socket()?;
    let flags = get_flags(&socket, name)?;
    let promisc = libc::IFF_PROMISC as c_short;
    let updated = if enable { flags | promisc } else { flags & !promisc };
    if updated != flags {
        set_flags(&socket, name, updated)?;
    }
    debug!(interface = name, enable, "Promiscuous mode updated");
    Ok(())
}

/// Resolve index, MAC and primary IPv4 address of `name`.
pub fn resolve_binding(name: &str) -> Result<InterfaceBinding> {
    let index = if_index(name)?;
    let mac = get_hw_addr(name)?;
    let ipv4 = get_ipv4_addr(name)?;
    Ok(InterfaceBinding {
        name: name.to_string(),
        index,
        mac,
        ipv4,
    })
}

/// `aa:bb:cc:dd:ee:ff`
pub fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}
