//! VRRP data types and structures.
//!
//! Covers both RFC 3768 (VRRPv2) and RFC 5798 (VRRPv3, IPv4 only).

use common::{Error, Result};
use std::net::Ipv4Addr;
use std::time::Duration;

/// VRRP IP protocol number
pub const VRRP_PROTOCOL: u8 = 112;

/// VRRP multicast group for IPv4
pub const VRRP_MULTICAST_ADDR_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 18);

/// Required IP TTL on every advertisement
pub const VRRP_TTL: u8 = 255;

/// Priority advertised by a master that is giving up the role
pub const PRIORITY_SHUTDOWN: u8 = 0;

/// Priority reserved for the virtual address owner
pub const PRIORITY_OWNER: u8 = 255;

/// Default local priority
pub const DEFAULT_PRIORITY: u8 = 100;

/// Upper bound on virtual addresses carried by one virtual router
pub const MAX_VIRTUAL_IPS: usize = 16;

/// Well-known virtual MAC prefix (00-00-5E-00-01-{VRID})
pub const VIRTUAL_MAC_PREFIX: [u8; 5] = [0x00, 0x00, 0x5e, 0x00, 0x01];

/// Maximum interface name length including the trailing NUL
pub const IFNAMSIZ: usize = 16;

const USEC_PER_SEC: u64 = 1_000_000;
const USEC_PER_CSEC: u64 = 10_000;

/// Builds the virtual MAC for `vrid`.
pub fn virtual_mac(vrid: u8) -> [u8; 6] {
    let p = VIRTUAL_MAC_PREFIX;
    [p[0], p[1], p[2], p[3], p[4], vrid]
}

/// Wire protocol version, chosen once from configuration.
///
/// The version decides the advertisement layout, the interval unit, the
/// checksum discipline and whether a backup adopts the master's interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// RFC 3768: whole-second intervals, plain checksum, 8-byte auth trailer
    V2,
    /// RFC 5798: centisecond intervals, IPv4 pseudo-header checksum
    #[default]
    V3,
}

impl ProtocolVersion {
    /// Value carried in the high nibble of the first header byte.
    pub fn number(self) -> u8 {
        match self {
            ProtocolVersion::V2 => 2,
            ProtocolVersion::V3 => 3,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            2 => Some(ProtocolVersion::V2),
            3 => Some(ProtocolVersion::V3),
            _ => None,
        }
    }

    /// Convert an interval in native wire units into microseconds.
    pub fn interval_to_usec(self, interval: u16) -> u64 {
        match self {
            ProtocolVersion::V2 => interval as u64 * USEC_PER_SEC,
            ProtocolVersion::V3 => interval as u64 * USEC_PER_CSEC,
        }
    }

    /// Largest interval the wire field can carry.
    pub fn max_interval(self) -> u16 {
        match self {
            ProtocolVersion::V2 => u8::MAX as u16,
            ProtocolVersion::V3 => 0x0fff,
        }
    }

    /// One second, in native units.
    pub fn default_interval(self) -> u16 {
        match self {
            ProtocolVersion::V2 => 1,
            ProtocolVersion::V3 => 100,
        }
    }

    /// Whether a backup adopts the interval advertised by the master.
    pub fn resyncs_interval(self) -> bool {
        matches!(self, ProtocolVersion::V3)
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VRRPv{}", self.number())
    }
}

/// VRRP state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VRRPState {
    /// Initial state - not yet initialized
    Init = 0,
    /// Backup state - monitoring for master failures
    Backup = 1,
    /// Master state - sending advertisements
    Master = 2,
}

impl VRRPState {
    pub(crate) fn from_repr(value: u8) -> Self {
        match value {
            0 => VRRPState::Init,
            1 => VRRPState::Backup,
            2 => VRRPState::Master,
            other => unreachable!("invalid VRRP state value {other}"),
        }
    }
}

impl std::fmt::Display for VRRPState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VRRPState::Init => write!(f, "INIT"),
            VRRPState::Backup => write!(f, "BACKUP"),
            VRRPState::Master => write!(f, "MASTER"),
        }
    }
}

/// VRRP configuration
#[derive(Debug, Clone)]
pub struct VRRPConfig {
    /// Protocol version spoken on the wire
    pub version: ProtocolVersion,

    /// Virtual Router ID (1-255)
    pub vrid: u8,

    /// Priority for this router (1-255, 255 = IP address owner)
    pub priority: u8,

    /// Advertisement interval in native units (seconds for v2, centiseconds for v3)
    pub advert_interval: u16,

    /// Network interface name
    pub interface: String,

    /// Virtual IP addresses, in the order they are advertised
    pub virtual_ips: Vec<Ipv4Addr>,

    /// Whether to preempt lower priority masters
    pub preempt: bool,
}

impl Default for VRRPConfig {
    fn default() -> Self {
        let version = ProtocolVersion::default();
        Self {
            version,
            vrid: 1,
            priority: DEFAULT_PRIORITY,
            advert_interval: version.default_interval(),
            interface: String::from("eth0"),
            virtual_ips: Vec::new(),
            preempt: true,
        }
    }
}

impl VRRPConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.vrid == 0 {
            return Err(Error::config("VRID must be between 1 and 255"));
        }

        if self.priority == PRIORITY_SHUTDOWN {
            return Err(Error::config("Priority must be between 1 and 255"));
        }

        if self.virtual_ips.is_empty() {
            return Err(Error::config("At least one virtual IP is required"));
        }

        if self.virtual_ips.len() > MAX_VIRTUAL_IPS {
            return Err(Error::config(format!(
                "At most {} virtual IPs are supported, got {}",
                MAX_VIRTUAL_IPS,
                self.virtual_ips.len()
            )));
        }

        for (i, ip) in self.virtual_ips.iter().enumerate() {
            if self.virtual_ips[..i].contains(ip) {
                return Err(Error::config(format!("Duplicate virtual IP {}", ip)));
            }
        }

        if self.interface.is_empty() {
            return Err(Error::config("Interface name is required"));
        }

        if self.interface.len() >= IFNAMSIZ {
            return Err(Error::config(format!(
                "Interface name {} is longer than {} characters",
                self.interface,
                IFNAMSIZ - 1
            )));
        }

        if self.advert_interval == 0 || self.advert_interval > self.version.max_interval() {
            return Err(Error::config(format!(
                "Advertisement interval must be between 1 and {} for {}",
                self.version.max_interval(),
                self.version
            )));
        }

        Ok(())
    }

    /// Advertisement interval as a duration
    pub fn advert_interval(&self) -> Duration {
        Duration::from_micros(self.version.interval_to_usec(self.advert_interval))
    }

    /// Whether `address` is one of the virtual addresses
    pub fn owns(&self, address: Ipv4Addr) -> bool {
        self.virtual_ips.contains(&address)
    }
}

/// The local interface a virtual router runs on, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceBinding {
    pub name: String,
    pub index: u32,
    pub mac: [u8; 6],
    pub ipv4: Ipv4Addr,
}

/// VRRP statistics
#[derive(Debug, Clone, Default)]
pub struct VRRPStats {
    /// Number of transitions to Master state
    pub master_transitions: u64,

    /// Number of transitions to Backup state
    pub backup_transitions: u64,

    /// Advertisements sent
    pub adverts_sent: u64,

    /// Valid advertisements received
    pub adverts_received: u64,

    /// Invalid advertisements received
    pub invalid_adverts: u64,

    /// Priority zero advertisements received
    pub priority_zero_received: u64,

    /// Checksum errors
    pub checksum_errors: u64,
}
