//! Virtual Router Redundancy Protocol (VRRP) versions 2 and 3
//!
//! Pure Rust implementation of RFC 3768 and RFC 5798 (IPv4) for hosts that
//! share a virtual IP and MAC address on a LAN segment.
//!
//! # Features
//!
//! - VRRPv2 and VRRPv3 advertisement codecs, selected once from configuration
//! - Priority-based master election with address tie-break
//! - Preemption support
//! - Graceful shutdown (priority 0 advertisements)
//! - Virtual MAC takeover with route preservation
//! - ARP responder for the virtual addresses while MASTER
//!
//! # Example
//!
//! ```no_run
//! use vrrp::{LinuxHost, SystemClock, VRRPConfig, VRRPNode, VRRPSocket, netdev};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = VRRPConfig {
//!     vrid: 1,
//!     priority: 100,
//!     virtual_ips: vec!["192.168.1.1".parse()?],
//!     ..Default::default()
//! };
//!
//! let binding = netdev::resolve_binding(&config.interface)?;
//! let socket = VRRPSocket::new(binding.ipv4)?;
//!
//! // Run state machine (requires CAP_NET_ADMIN and CAP_NET_RAW)
//! let mut node = VRRPNode::new(config, binding, socket, LinuxHost, SystemClock)?;
//! node.run().await;
//! # Ok(())
//! # }
//! ```

pub mod arp;
pub mod checksum;
mod host;
pub mod netdev;
pub mod packet;
pub mod routes;
mod shared;
mod socket;
mod state_machine;
pub mod timers;
mod types;

pub use arp::ArpResponder;
pub use host::{HostNetwork, LinuxHost, MacRole};
pub use packet::{Advertisement, Rejection, VRRPPacket};
pub use shared::SharedState;
pub use socket::{AdvertTransport, VRRPSocket};
pub use state_machine::{ShutdownReport, Step, VRRPNode, dominates};
pub use timers::{Clock, SystemClock, Timers};
pub use types::*;
