//! Host side effects of a role change.

use crate::arp;
use crate::netdev;
use crate::routes::{Route, RouteSocket};
use crate::types::InterfaceBinding;
use common::{Error, Result};
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

/// Which hardware address the interface should carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacRole {
    /// The virtual router MAC, while MASTER
    Virtual,
    /// The interface's own MAC
    Real,
}

/// Interface and link-layer operations the state machine needs from the host.
#[cfg_attr(test, mockall::automock)]
pub trait HostNetwork: Send + Sync {
    /// Put `mac` on the interface, preserving its static routes.
    fn apply_mac(&self, binding: &InterfaceBinding, mac: [u8; 6], role: MacRole) -> Result<()>;

    /// Broadcast one gratuitous ARP announcing `ip` at `mac`.
    fn send_gratuitous_arp(&self, ifindex: u32, mac: [u8; 6], ip: Ipv4Addr) -> Result<()>;
}

/// The individual kernel operations behind a MAC switch.
#[cfg_attr(test, mockall::automock)]
trait LinkControl {
    fn snapshot_routes(&self) -> Result<Vec<Route>>;
    fn set_hw_addr(&self, ifname: &str, mac: [u8; 6]) -> Result<()>;
    fn set_promiscuous(&self, ifname: &str, enable: bool) -> Result<()>;
    fn restore_routes(&self, routes: &[Route], ifindex: u32) -> Result<()>;
}

struct SystemLink;

impl LinkControl for SystemLink {
    fn snapshot_routes(&self) -> Result<Vec<Route>> {
        RouteSocket::new()?.snapshot()
    }

    fn set_hw_addr(&self, ifname: &str, mac: [u8; 6]) -> Result<()> {
        netdev::set_hw_addr(ifname, mac)
    }

    fn set_promiscuous(&self, ifname: &str, enable: bool) -> Result<()> {
        netdev::set_promiscuous(ifname, enable)
    }

    fn restore_routes(&self, routes: &[Route], ifindex: u32) -> Result<()> {
        if routes.is_empty() {
            return Ok(());
        }
        RouteSocket::new()?.restore(routes, ifindex)
    }
}

#[derive(Debug, Clone, Copy)]
enum LinkStep {
    HwAddr,
    Promiscuous(bool),
}

/// Switch the interface MAC and promiscuous mode, then put back the routes
/// the link flap removed.
///
/// Every step runs even when an earlier one fails; the first error is
/// returned. An unreadable routing table is treated as empty.
fn switch_mac(link: &impl LinkControl, binding: &InterfaceBinding, mac: [u8; 6], role: MacRole) -> Result<()> {
    let saved = link.snapshot_routes().unwrap_or_else(|e| {
        warn!(interface = %binding.name, error = %e, "Can't read routing table, routes will not be restored");
        Vec::new()
    });

    // Promiscuous mode lets the NIC accept frames for the virtual MAC
    // on drivers without unicast filtering for it.
    let steps = match role {
        MacRole::Virtual => [LinkStep::HwAddr, LinkStep::Promiscuous(true)],
        MacRole::Real => [LinkStep::Promiscuous(false), LinkStep::HwAddr],
    };

    let mut errors: Vec<Error> = Vec::new();
    for step in steps {
        let result = match step {
            LinkStep::HwAddr => link.set_hw_addr(&binding.name, mac),
            LinkStep::Promiscuous(enable) => link.set_promiscuous(&binding.name, enable),
        };
        if let Err(e) = result {
            warn!(interface = %binding.name, ?step, error = %e, "Interface update failed");
            errors.push(e);
        }
    }

    if let Err(e) = link.restore_routes(&saved, binding.index) {
        warn!(interface = %binding.name, error = %e, "Route restore failed");
        errors.push(e);
    }

    match errors.into_iter().next() {
        Some(e) => Err(e),
        None => {
            info!(
                interface = %binding.name,
                mac = %netdev::format_mac(&mac),
                ?role,
                routes = saved.len(),
                "Interface MAC switched"
            );
            Ok(())
        }
    }
}

/// [`HostNetwork`] backed by ioctls, rtnetlink and packet sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxHost;

impl HostNetwork for LinuxHost {
    fn apply_mac(&self, binding: &InterfaceBinding, mac: [u8; 6], role: MacRole) -> Result<()> {
        switch_mac(&SystemLink, binding, mac, role)
    }

    fn send_gratuitous_arp(&self, ifindex: u32, mac: [u8; 6], ip: Ipv4Addr) -> Result<()> {
        arp::send_gratuitous_arp(ifindex, mac, ip)?;
        debug!(%ip, "Gratuitous ARP sent");
        Ok(())
    }
}
