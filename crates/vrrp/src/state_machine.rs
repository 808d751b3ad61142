//! VRRP state machine implementation.
//!
//! One [`VRRPNode`] drives one virtual router. Each call to
//! [`VRRPNode::step`] performs a single iteration: it either fires the armed
//! timer or waits, bounded by that timer, for one advertisement and acts
//! on it. Shutdown is reported as [`Step::Shutdown`] and handled once by
//! [`VRRPNode::run`].

use crate::host::{HostNetwork, MacRole};
use crate::packet::{self, Advertisement, Expectation, Rejection, VRRPPacket};
use crate::shared::SharedState;
use crate::socket::AdvertTransport;
use crate::timers::{Clock, SystemClock, Timers};
use crate::types::{
    InterfaceBinding, PRIORITY_OWNER, PRIORITY_SHUTDOWN, VRRP_MULTICAST_ADDR_V4, VRRPConfig, VRRPState,
    VRRPStats, virtual_mac,
};
use common::{Error, Result};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Outcome of one state machine iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Shutdown,
}

/// What [`VRRPNode::run`] did on the way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Whether the node released mastership with a priority 0 advertisement
    pub was_master: bool,
}

/// Whether an advertisement from (`their_priority`, `their_addr`) takes
/// precedence over the local (`our_priority`, `our_addr`).
///
/// Equal priorities are broken by the numerically higher IPv4 address.
pub fn dominates(their_priority: u8, their_addr: Ipv4Addr, our_priority: u8, our_addr: Ipv4Addr) -> bool {
    their_priority > our_priority
        || (their_priority == our_priority && u32::from(their_addr) > u32::from(our_addr))
}

/// A single VRRP virtual router instance.
pub struct VRRPNode<T, H, C = SystemClock> {
    config: VRRPConfig,
    binding: InterfaceBinding,
    priority: u8,
    vmac: [u8; 6],
    timers: Timers,
    shared: Arc<SharedState>,
    stats: VRRPStats,
    transport: T,
    host: H,
    clock: C,
}

impl<T, H, C> VRRPNode<T, H, C>
where
    T: AdvertTransport,
    H: HostNetwork,
    C: Clock,
{
    /// Create a node in INIT.
    ///
    /// The priority becomes 255 when the interface address is one of the
    /// virtual addresses; a non-owner asking for 255 is rejected.
    pub fn new(config: VRRPConfig, binding: InterfaceBinding, transport: T, host: H, clock: C) -> Result<Self> {
        config.validate()?;

        let priority = if config.owns(binding.ipv4) {
            if config.priority != PRIORITY_OWNER {
                info!(
                    vrid = config.vrid,
                    address = %binding.ipv4,
                    "Interface owns a virtual address, using priority 255"
                );
            }
            PRIORITY_OWNER
        } else if config.priority == PRIORITY_OWNER {
            return Err(Error::config(format!(
                "priority {} is reserved for the owner of a virtual address, {} owns none",
                PRIORITY_OWNER, binding.name
            )));
        } else {
            config.priority
        };

        let timers = Timers::new(priority, config.version.interval_to_usec(config.advert_interval));

        Ok(Self {
            vmac: virtual_mac(config.vrid),
            config,
            binding,
            priority,
            timers,
            shared: Arc::new(SharedState::new()),
            stats: VRRPStats::default(),
            transport,
            host,
            clock,
        })
    }

    /// State shared with the ARP responder and the signal handler.
    pub fn shared(&self) -> Arc<SharedState> {
        Arc::clone(&self.shared)
    }

    pub fn state(&self) -> VRRPState {
        self.shared.state()
    }

    /// Effective priority after owner resolution.
    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn config(&self) -> &VRRPConfig {
        &self.config
    }

    pub fn virtual_mac(&self) -> [u8; 6] {
        self.vmac
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> VRRPStats {
        self.stats.clone()
    }

    /// Iterate until shutdown is requested, then release the role cleanly.
    pub async fn run(&mut self) -> ShutdownReport {
        info!(
            vrid = self.config.vrid,
            version = %self.config.version,
            priority = self.priority,
            interval = ?self.config.advert_interval(),
            interface = %self.binding.name,
            "Starting VRRP node"
        );

        while self.step().await == Step::Continue {}

        self.shutdown().await
    }

    /// Run one iteration of the state machine.
    pub async fn step(&mut self) -> Step {
        if self.shared.shutdown_requested() {
            return Step::Shutdown;
        }

        match self.state() {
            VRRPState::Init => {
                if self.priority == PRIORITY_OWNER {
                    info!(vrid = self.config.vrid, "IP owner, transitioning to Master");
                    self.become_master().await;
                } else {
                    self.become_backup();
                }
            }
            VRRPState::Master => self.master_iteration().await,
            VRRPState::Backup => self.backup_iteration().await,
        }

        Step::Continue
    }

    async fn master_iteration(&mut self) {
        let now = self.clock.now_usec();
        if self.timers.advert_fired(now) {
            self.send_advertisement(self.priority).await;
            self.timers.arm_advert(self.clock.now_usec());
            return;
        }

        let Some(advert) = self.receive(self.timers.remaining(now)).await else {
            return;
        };

        if advert.priority == PRIORITY_SHUTDOWN {
            debug!(vrid = self.config.vrid, source = %advert.source, "Peer released mastership, asserting");
            self.send_advertisement(self.priority).await;
            self.timers.arm_advert(self.clock.now_usec());
        } else if dominates(advert.priority, advert.source, self.priority, self.binding.ipv4) {
            info!(
                vrid = self.config.vrid,
                priority = advert.priority,
                source = %advert.source,
                "Higher priority master seen, stepping down"
            );
            self.apply_mac(self.binding.mac, MacRole::Real);
            self.resync(&advert);
            self.become_backup();
        } else {
            trace!(
                vrid = self.config.vrid,
                priority = advert.priority,
                source = %advert.source,
                "Ignoring advertisement from lower priority router"
            );
        }
    }

    async fn backup_iteration(&mut self) {
        let now = self.clock.now_usec();
        if self.timers.master_down_fired(now) {
            info!(vrid = self.config.vrid, "Master_Down_Interval expired");
            self.become_master().await;
            return;
        }

        let Some(advert) = self.receive(self.timers.remaining(now)).await else {
            return;
        };

        let now = self.clock.now_usec();
        if advert.priority == PRIORITY_SHUTDOWN {
            debug!(vrid = self.config.vrid, "Master shutting down (priority 0)");
            self.timers.arm_master_down_skew(now);
        } else if !self.config.preempt || advert.priority >= self.priority {
            self.resync(&advert);
            self.timers.arm_master_down(now);
        } else {
            debug!(
                vrid = self.config.vrid,
                priority = advert.priority,
                local_priority = self.priority,
                "Ignoring lower priority master, waiting to preempt"
            );
        }
    }

    fn resync(&mut self, advert: &Advertisement) {
        if let Some(interval) = advert.advert_interval_usec {
            self.timers.resync(self.config.version, interval);
        }
    }

    /// Wait up to `timeout` for one valid advertisement.
    async fn receive(&mut self, timeout: Duration) -> Option<Advertisement> {
        let datagram = match self.transport.recv(timeout).await {
            Ok(Some(datagram)) => datagram,
            Ok(None) => return None,
            Err(e) => {
                warn!(vrid = self.config.vrid, error = ?e, "Error receiving packet");
                return None;
            }
        };

        let result = packet::validate(
            &datagram,
            &Expectation {
                version: self.config.version,
                vrid: self.config.vrid,
                virtual_ips: &self.config.virtual_ips,
                advert_interval: self.config.advert_interval,
            },
        );

        match result {
            Ok(advert) => {
                self.stats.adverts_received += 1;
                if advert.priority == PRIORITY_SHUTDOWN {
                    self.stats.priority_zero_received += 1;
                }
                trace!(vrid = self.config.vrid, ?advert, "Received advertisement");
                Some(advert)
            }
            Err(rejection) => {
                self.stats.invalid_adverts += 1;
                if rejection == Rejection::Checksum {
                    self.stats.checksum_errors += 1;
                    warn!(vrid = self.config.vrid, "Invalid checksum");
                } else {
                    debug!(vrid = self.config.vrid, %rejection, "Discarding advertisement");
                }
                None
            }
        }
    }

    async fn send_advertisement(&mut self, priority: u8) {
        let packet = VRRPPacket::new(
            self.config.version,
            self.config.vrid,
            priority,
            self.config.advert_interval,
            self.config.virtual_ips.clone(),
        );
        let bytes = packet.encode(self.binding.ipv4, VRRP_MULTICAST_ADDR_V4);

        match self.transport.send(&bytes).await {
            Ok(()) => {
                self.stats.adverts_sent += 1;
                trace!(vrid = self.config.vrid, priority, "Sent advertisement");
            }
            Err(e) => {
                warn!(vrid = self.config.vrid, error = ?e, "Failed to send advertisement");
            }
        }
    }

    fn apply_mac(&self, mac: [u8; 6], role: MacRole) {
        if let Err(e) = self.host.apply_mac(&self.binding, mac, role) {
            warn!(vrid = self.config.vrid, ?role, error = %e, "Failed to switch interface MAC");
        }
    }

    async fn become_master(&mut self) {
        self.apply_mac(self.vmac, MacRole::Virtual);
        self.send_advertisement(self.priority).await;

        for ip in &self.config.virtual_ips {
            if let Err(e) = self.host.send_gratuitous_arp(self.binding.index, self.vmac, *ip) {
                warn!(vrid = self.config.vrid, %ip, error = %e, "Failed to send gratuitous ARP");
            }
        }

        self.timers.arm_advert(self.clock.now_usec());
        self.set_state(VRRPState::Master);
    }

    fn become_backup(&mut self) {
        self.timers.arm_master_down(self.clock.now_usec());
        self.set_state(VRRPState::Backup);
    }

    fn set_state(&mut self, state: VRRPState) {
        let previous = self.shared.state();
        match state {
            VRRPState::Master => self.stats.master_transitions += 1,
            VRRPState::Backup => self.stats.backup_transitions += 1,
            VRRPState::Init => {}
        }
        self.shared.set_state(state);
        info!(vrid = self.config.vrid, from = %previous, to = %state, "State transition");
    }

    /// Release mastership if held. Dropping the node afterwards closes the socket.
    async fn shutdown(&mut self) -> ShutdownReport {
        info!(vrid = self.config.vrid, state = %self.state(), "Shutting down gracefully");

        let was_master = self.state() == VRRPState::Master;
        if was_master {
            self.apply_mac(self.binding.mac, MacRole::Real);
            self.send_advertisement(PRIORITY_SHUTDOWN).await;
        }
        self.timers.disarm();

        ShutdownReport { was_master }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MockHostNetwork;
    use crate::packet::wrap_ipv4;
    use crate::types::ProtocolVersion;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    const NOW: u64 = 1_700_000_000_000_000;
    const LOCAL_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
    const PEER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 3);
    const VIP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 100);

    #[derive(Clone)]
    struct ManualClock(Arc<AtomicU64>);

    impl ManualClock {
        fn new() -> Self {
            Self(Arc::new(AtomicU64::new(NOW)))
        }

        fn now(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }

        fn advance(&self, usec: u64) {
            self.0.fetch_add(usec, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_usec(&self) -> u64 {
            self.now()
        }
    }

    #[derive(Default)]
    struct Wire {
        inbound: VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
        failing_sends: usize,
        failing_recvs: usize,
    }

    /// In-memory transport. An empty receive lets the full timeout elapse.
    #[derive(Clone)]
    struct FakeTransport {
        wire: Arc<Mutex<Wire>>,
        clock: ManualClock,
    }

    impl FakeTransport {
        fn new(clock: ManualClock) -> Self {
            Self {
                wire: Arc::new(Mutex::new(Wire::default())),
                clock,
            }
        }

        fn deliver(&self, datagram: Vec<u8>) {
            self.wire.lock().unwrap().inbound.push_back(datagram);
        }

        fn fail_next_send(&self) {
            self.wire.lock().unwrap().failing_sends += 1;
        }

        fn fail_next_recv(&self) {
            self.wire.lock().unwrap().failing_recvs += 1;
        }

        fn sent(&self) -> Vec<VRRPPacket> {
            self.wire
                .lock()
                .unwrap()
                .sent
                .iter()
                .map(|p| VRRPPacket::parse(p).unwrap())
                .collect()
        }
    }

    #[async_trait]
    impl AdvertTransport for FakeTransport {
        async fn send(&mut self, payload: &[u8]) -> io::Result<()> {
            let mut wire = self.wire.lock().unwrap();
            if wire.failing_sends > 0 {
                wire.failing_sends -= 1;
                return Err(io::Error::from_raw_os_error(libc::ENOBUFS));
            }
            wire.sent.push(payload.to_vec());
            Ok(())
        }

        async fn recv(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
            let mut wire = self.wire.lock().unwrap();
            if wire.failing_recvs > 0 {
                wire.failing_recvs -= 1;
                return Err(io::Error::from_raw_os_error(libc::EINTR));
            }
            let next = wire.inbound.pop_front();
            drop(wire);
            if next.is_none() {
                self.clock.advance(timeout.as_micros() as u64 + 1);
            }
            Ok(next)
        }
    }

    fn binding(ipv4: Ipv4Addr) -> InterfaceBinding {
        InterfaceBinding {
            name: "eth0".to_string(),
            index: 2,
            mac: [0x02, 0, 0, 0, 0, 0x02],
            ipv4,
        }
    }

    fn v3_config(priority: u8) -> VRRPConfig {
        VRRPConfig {
            vrid: 7,
            priority,
            virtual_ips: vec![VIP],
            ..Default::default()
        }
    }

    fn v2_config(priority: u8) -> VRRPConfig {
        VRRPConfig {
            version: ProtocolVersion::V2,
            advert_interval: 1,
            ..v3_config(priority)
        }
    }

    fn advert(config: &VRRPConfig, priority: u8, interval: u16, src: Ipv4Addr) -> Vec<u8> {
        let packet = VRRPPacket::new(config.version, config.vrid, priority, interval, config.virtual_ips.clone());
        wrap_ipv4(&packet.encode(src, VRRP_MULTICAST_ADDR_V4), src, 255)
    }

    struct Harness {
        node: VRRPNode<FakeTransport, MockHostNetwork, ManualClock>,
        transport: FakeTransport,
        clock: ManualClock,
    }

    fn harness(config: VRRPConfig, local: Ipv4Addr, host: MockHostNetwork) -> Harness {
        let clock = ManualClock::new();
        let transport = FakeTransport::new(clock.clone());
        let node = VRRPNode::new(config, binding(local), transport.clone(), host, clock.clone()).unwrap();
        Harness { node, transport, clock }
    }

    fn quiet_host() -> MockHostNetwork {
        let mut host = MockHostNetwork::new();
        host.expect_apply_mac().returning(|_, _, _| Ok(()));
        host.expect_send_gratuitous_arp().returning(|_, _, _| Ok(()));
        host
    }

    /// Drive a backup node into MASTER by letting its master-down timer expire.
    async fn promote(h: &mut Harness) {
        h.node.step().await;
        assert_eq!(h.node.state(), VRRPState::Backup);
        while h.node.state() != VRRPState::Master {
            h.node.step().await;
        }
    }

    #[tokio::test]
    async fn test_owner_fast_start() {
        let mut host = MockHostNetwork::new();
        host.expect_apply_mac()
            .withf(|_, mac, role| *mac == virtual_mac(7) && *role == MacRole::Virtual)
            .times(1)
            .returning(|_, _, _| Ok(()));
        host.expect_send_gratuitous_arp()
            .withf(|ifindex, mac, ip| *ifindex == 2 && *mac == virtual_mac(7) && *ip == VIP)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut h = harness(v3_config(100), VIP, host);
        assert_eq!(h.node.priority(), PRIORITY_OWNER);

        assert_eq!(h.node.step().await, Step::Continue);
        assert_eq!(h.node.state(), VRRPState::Master);
        assert_eq!(h.clock.now(), NOW);

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].priority, PRIORITY_OWNER);
        assert_eq!(sent[0].ip_addresses, vec![VIP]);
        assert_eq!(h.node.timers().advert_deadline(), Some(NOW + 1_000_000));
        assert_eq!(h.node.timers().master_down_deadline(), None);
    }

    #[test]
    fn test_non_owner_cannot_claim_owner_priority() {
        let clock = ManualClock::new();
        let result = VRRPNode::new(
            v3_config(PRIORITY_OWNER),
            binding(LOCAL_IP),
            FakeTransport::new(clock.clone()),
            MockHostNetwork::new(),
            clock,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let clock = ManualClock::new();
        let config = VRRPConfig {
            virtual_ips: vec![],
            ..v3_config(100)
        };
        let result = VRRPNode::new(
            config,
            binding(LOCAL_IP),
            FakeTransport::new(clock.clone()),
            MockHostNetwork::new(),
            clock,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_init_to_backup() {
        let mut h = harness(v3_config(100), LOCAL_IP, MockHostNetwork::new());
        h.node.step().await;

        assert_eq!(h.node.state(), VRRPState::Backup);
        assert_eq!(h.node.timers().master_down_deadline(), Some(NOW + 3_609_375));
        assert_eq!(h.node.timers().advert_deadline(), None);
        assert!(h.transport.sent().is_empty());
        assert_eq!(h.node.stats().backup_transitions, 1);
    }

    #[tokio::test]
    async fn test_backup_takes_over_when_master_silent() {
        let mut h = harness(v3_config(100), LOCAL_IP, quiet_host());
        promote(&mut h).await;

        assert!(h.clock.now() > NOW + 3_609_375);
        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].priority, 100);
        assert_eq!(h.node.stats().master_transitions, 1);
    }

    #[tokio::test]
    async fn test_v2_interval_mismatch_rejected() {
        let config = v2_config(100);
        let mut h = harness(config.clone(), LOCAL_IP, MockHostNetwork::new());
        h.node.step().await;
        let deadline = h.node.timers().master_down_deadline();

        h.clock.advance(500_000);
        h.transport.deliver(advert(&config, 200, 2, PEER_IP));
        h.node.step().await;

        assert_eq!(h.node.state(), VRRPState::Backup);
        assert_eq!(h.node.timers().master_down_deadline(), deadline);
        assert_eq!(h.node.stats().invalid_adverts, 1);
        assert_eq!(h.node.stats().adverts_received, 0);
    }

    #[tokio::test]
    async fn test_v2_matching_interval_rearms() {
        let config = v2_config(100);
        let mut h = harness(config.clone(), LOCAL_IP, MockHostNetwork::new());
        h.node.step().await;

        h.clock.advance(500_000);
        h.transport.deliver(advert(&config, 200, 1, PEER_IP));
        h.node.step().await;

        assert_eq!(h.node.timers().master_down_deadline(), Some(NOW + 500_000 + 3_609_375));
        assert_eq!(h.node.timers().master_advert_interval(), 1_000_000);
    }

    #[tokio::test]
    async fn test_v3_resync_from_master() {
        let config = v3_config(100);
        let mut h = harness(config.clone(), LOCAL_IP, MockHostNetwork::new());
        h.node.step().await;
        assert_eq!(h.node.timers().master_advert_interval(), 1_000_000);

        h.clock.advance(250_000);
        h.transport.deliver(advert(&config, 200, 200, PEER_IP));
        h.node.step().await;

        let timers = h.node.timers();
        assert_eq!(timers.master_advert_interval(), 2_000_000);
        assert_eq!(timers.skew_time(), 1_218_750);
        assert_eq!(timers.master_down_interval(), 7_218_750);
        assert_eq!(timers.master_down_deadline(), Some(NOW + 250_000 + 7_218_750));
        assert_eq!(timers.advert_interval(), 1_000_000);
    }

    #[tokio::test]
    async fn test_preempt_disabled_accepts_lower_master() {
        let config = VRRPConfig {
            preempt: false,
            ..v3_config(150)
        };
        let mut h = harness(config.clone(), LOCAL_IP, MockHostNetwork::new());
        h.node.step().await;

        h.clock.advance(1_000_000);
        h.transport.deliver(advert(&config, 100, 100, PEER_IP));
        h.node.step().await;

        let mdi = h.node.timers().master_down_interval();
        assert_eq!(h.node.timers().master_down_deadline(), Some(NOW + 1_000_000 + mdi));
        assert_eq!(h.node.state(), VRRPState::Backup);
    }

    #[tokio::test]
    async fn test_preempt_ignores_lower_master() {
        let config = v3_config(150);
        let mut h = harness(config.clone(), LOCAL_IP, MockHostNetwork::new());
        h.node.step().await;
        let deadline = h.node.timers().master_down_deadline();

        h.clock.advance(1_000_000);
        h.transport.deliver(advert(&config, 100, 100, PEER_IP));
        h.node.step().await;

        assert_eq!(h.node.timers().master_down_deadline(), deadline);
        assert_eq!(h.node.stats().adverts_received, 1);
    }

    #[tokio::test]
    async fn test_backup_short_circuits_on_release() {
        let config = v3_config(100);
        let mut h = harness(config.clone(), LOCAL_IP, MockHostNetwork::new());
        h.node.step().await;

        h.clock.advance(1_000_000);
        h.transport.deliver(advert(&config, PRIORITY_SHUTDOWN, 100, PEER_IP));
        h.node.step().await;

        assert_eq!(h.node.timers().master_down_deadline(), Some(NOW + 1_000_000 + 609_375));
        assert_eq!(h.node.stats().priority_zero_received, 1);
    }

    #[tokio::test]
    async fn test_master_steps_down_for_higher_priority() {
        let config = v3_config(100);
        let mut h = harness(config.clone(), LOCAL_IP, quiet_host());
        promote(&mut h).await;

        h.transport.deliver(advert(&config, 200, 300, PEER_IP));
        h.node.step().await;

        assert_eq!(h.node.state(), VRRPState::Backup);
        assert_eq!(h.node.timers().master_advert_interval(), 3_000_000);
        assert_eq!(h.node.timers().advert_deadline(), None);
        assert!(h.node.timers().master_down_deadline().is_some());
    }

    #[tokio::test]
    async fn test_master_restores_real_mac_on_demotion() {
        let mut host = MockHostNetwork::new();
        host.expect_send_gratuitous_arp().returning(|_, _, _| Ok(()));
        host.expect_apply_mac()
            .withf(|_, _, role| *role == MacRole::Virtual)
            .times(1)
            .returning(|_, _, _| Ok(()));
        host.expect_apply_mac()
            .withf(|binding, mac, role| *role == MacRole::Real && *mac == binding.mac)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let config = v3_config(100);
        let mut h = harness(config.clone(), LOCAL_IP, host);
        promote(&mut h).await;

        h.transport.deliver(advert(&config, 101, 100, PEER_IP));
        h.node.step().await;
        assert_eq!(h.node.state(), VRRPState::Backup);
    }

    #[tokio::test]
    async fn test_master_tie_break_on_address() {
        let config = v3_config(100);

        let mut h = harness(config.clone(), LOCAL_IP, quiet_host());
        promote(&mut h).await;
        h.transport.deliver(advert(&config, 100, 100, Ipv4Addr::new(10, 0, 0, 1)));
        h.node.step().await;
        assert_eq!(h.node.state(), VRRPState::Master);

        h.transport.deliver(advert(&config, 100, 100, PEER_IP));
        h.node.step().await;
        assert_eq!(h.node.state(), VRRPState::Backup);
    }

    #[tokio::test]
    async fn test_master_reasserts_on_release() {
        let config = v3_config(100);
        let mut h = harness(config.clone(), LOCAL_IP, quiet_host());
        promote(&mut h).await;
        let before = h.transport.sent().len();

        h.transport.deliver(advert(&config, PRIORITY_SHUTDOWN, 100, PEER_IP));
        h.node.step().await;

        let sent = h.transport.sent();
        assert_eq!(sent.len(), before + 1);
        assert_eq!(sent.last().unwrap().priority, 100);
        assert_eq!(h.node.timers().advert_deadline(), Some(h.clock.now() + 1_000_000));
        assert_eq!(h.node.state(), VRRPState::Master);
    }

    #[tokio::test]
    async fn test_master_advertises_every_interval() {
        let mut h = harness(v3_config(100), VIP, quiet_host());
        h.node.step().await;

        for _ in 0..6 {
            h.node.step().await;
        }

        // One advertisement on takeover, then one per elapsed interval
        assert_eq!(h.transport.sent().len(), 4);
        assert!(h.transport.sent().iter().all(|p| p.priority == PRIORITY_OWNER));
    }

    #[tokio::test]
    async fn test_graceful_release() {
        let mut host = MockHostNetwork::new();
        host.expect_send_gratuitous_arp().returning(|_, _, _| Ok(()));
        host.expect_apply_mac()
            .withf(|_, _, role| *role == MacRole::Virtual)
            .times(1)
            .returning(|_, _, _| Ok(()));
        host.expect_apply_mac()
            .withf(|_, _, role| *role == MacRole::Real)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut h = harness(v3_config(100), VIP, host);
        h.node.step().await;
        assert_eq!(h.node.state(), VRRPState::Master);

        h.node.shared().request_shutdown();
        let report = h.node.run().await;

        assert!(report.was_master);
        let sent = h.transport.sent();
        assert_eq!(sent.last().unwrap().priority, PRIORITY_SHUTDOWN);
        assert_eq!(h.node.timers().advert_deadline(), None);
    }

    #[tokio::test]
    async fn test_backup_shutdown_sends_nothing() {
        let mut h = harness(v3_config(100), LOCAL_IP, MockHostNetwork::new());
        h.node.step().await;

        h.node.shared().request_shutdown();
        assert_eq!(h.node.step().await, Step::Shutdown);
        let report = h.node.run().await;

        assert!(!report.was_master);
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_advertisement_counted() {
        let config = v3_config(100);
        let mut h = harness(config.clone(), LOCAL_IP, MockHostNetwork::new());
        h.node.step().await;

        let mut datagram = advert(&config, 200, 100, PEER_IP);
        let last = datagram.len() - 1;
        datagram[last] ^= 0x01;
        h.transport.deliver(datagram);
        h.node.step().await;

        let stats = h.node.stats();
        assert_eq!(stats.invalid_adverts, 1);
        assert_eq!(stats.checksum_errors, 1);
    }

    #[tokio::test]
    async fn test_host_failure_does_not_block_takeover() {
        let mut host = MockHostNetwork::new();
        host.expect_apply_mac()
            .returning(|_, _, _| Err(Error::interface("SIOCSIFHWADDR failed")));
        host.expect_send_gratuitous_arp()
            .returning(|_, _, _| Err(Error::interface("no such device")));

        let mut h = harness(v3_config(100), VIP, host);
        h.node.step().await;
        assert_eq!(h.node.state(), VRRPState::Master);
        assert_eq!(h.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_receive_error_abandons_iteration() {
        let config = v3_config(100);
        let mut h = harness(config.clone(), LOCAL_IP, MockHostNetwork::new());
        h.node.step().await;
        let deadline = h.node.timers().master_down_deadline();

        h.clock.advance(1_000_000);
        h.transport.fail_next_recv();
        assert_eq!(h.node.step().await, Step::Continue);

        assert_eq!(h.node.state(), VRRPState::Backup);
        assert_eq!(h.node.timers().master_down_deadline(), deadline);
        assert_eq!(h.clock.now(), NOW + 1_000_000);
        assert_eq!(h.node.stats().adverts_received, 0);
        assert_eq!(h.node.stats().invalid_adverts, 0);

        // The next iteration proceeds normally
        h.transport.deliver(advert(&config, 200, 100, PEER_IP));
        h.node.step().await;
        assert_eq!(h.node.stats().adverts_received, 1);
        assert_eq!(h.node.timers().master_down_deadline(), Some(NOW + 1_000_000 + 3_609_375));
    }

    #[tokio::test]
    async fn test_send_error_still_rearms_advert_timer() {
        let mut h = harness(v3_config(100), VIP, quiet_host());
        h.node.step().await;
        assert_eq!(h.node.stats().adverts_sent, 1);

        // Wait out the interval, then fail the periodic advertisement
        h.node.step().await;
        h.transport.fail_next_send();
        assert_eq!(h.node.step().await, Step::Continue);

        assert_eq!(h.node.state(), VRRPState::Master);
        assert_eq!(h.node.stats().adverts_sent, 1);
        assert_eq!(h.transport.sent().len(), 1);
        assert_eq!(h.node.timers().advert_deadline(), Some(h.clock.now() + 1_000_000));

        h.node.step().await;
        h.node.step().await;
        assert_eq!(h.node.stats().adverts_sent, 2);
        assert_eq!(h.transport.sent().len(), 2);
    }

    #[test]
    fn test_dominates() {
        let low = Ipv4Addr::new(10, 0, 0, 1);
        let high = Ipv4Addr::new(10, 0, 0, 2);

        assert!(dominates(101, low, 100, high));
        assert!(!dominates(99, high, 100, low));
        assert!(dominates(100, high, 100, low));
        assert!(!dominates(100, low, 100, high));
        assert!(!dominates(100, low, 100, low));

        // Numeric, not per-octet string order
        assert!(dominates(100, Ipv4Addr::new(10, 0, 0, 10), 100, Ipv4Addr::new(10, 0, 0, 9)));
    }
}
