//! The stack manager: one `NetworkStack` owns every table and protocol layer.
//!
//! Transport layers never touch a driver. They queue `PacketBasis` values on a channel which
//! `poll` drains, wraps in IPv4, routes and frames. Inbound frames come back through
//! `process_packet`, which demultiplexes them up to TCP, UDP or ICMP.

use crate::dhcp::DhcpClient;
use crate::dns::DnsResolver;
use crate::driver::NetDriver;
use crate::ethernet::{self, ethertype, BROADCAST_MAC};
use crate::firewall::{Firewall, FirewallAction, FiveTuple};
use crate::flags::{Features, SecurityCaps};
use crate::grpc::GrpcLayer;
use crate::http::HttpLayer;
use crate::icmp::IcmpLayer;
use crate::interface::{Interface, InterfaceConfig, InterfaceStatus, InterfaceTable};
use crate::ip_handler::IpLayer;
use crate::nat::NatTable;
use crate::prelude::*;
use crate::quic::QuicLayer;
use crate::router::RouteTable;
use crate::socket_manager::SocketManager;
use crate::tcp_utils::{mss_for_mtu, MSS};
use crate::udp::UdpLayer;
use crate::utils::*;
use crate::websocket::WebSocketLayer;

pub const MAX_DRIVERS: usize = 32;
pub const MAX_INTERFACES: usize = 64;
/// Frames taken from one driver per `poll`
const RX_BURST: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct StackConfig {
    pub max_interfaces: usize,
    pub max_connections: usize,
    pub max_sockets: usize,
    pub buffer_size: usize,
    pub queue_size: usize,
    pub timeout_ms: u64,
    pub retry_count: u32,
    pub features: Features,
    pub security_level: SecurityCaps,
    pub performance_level: u32,
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig {
            max_interfaces: MAX_INTERFACES,
            max_connections: 1024,
            max_sockets: 1024,
            buffer_size: 65536,
            queue_size: 256,
            timeout_ms: 30000,
            retry_count: 3,
            features: Features::empty(),
            security_level: SecurityCaps::empty(),
            performance_level: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackStatus {
    Running = 0,
    Stopped = 1,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackStats {
    pub packets_processed: u64,
    pub bytes_processed: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub errors: u64,
    pub dropped: u64,
    pub last_update: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SecurityStatus {
    pub security_level: SecurityCaps,
    pub firewall_enabled: bool,
    pub nat_enabled: bool,
    pub firewall_rules: usize,
    pub nat_rules: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthReport {
    pub issues: Vec<String>,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.healthy() {
            return write!(f, "healthy");
        }
        for issue in &self.issues {
            writeln!(f, "- {issue}")?;
        }
        Ok(())
    }
}

/// A layer brought up and torn down together with the stack
trait Subsystem {
    fn start(&self, config: &StackConfig) -> Result<()>;
    fn stop(&self) -> Result<()>;
}

macro_rules! plain_subsystem {
    ($($layer:ty),+) => {
        $(impl Subsystem for $layer {
            fn start(&self, _config: &StackConfig) -> Result<()> {
                self.init()
            }
            fn stop(&self) -> Result<()> {
                self.shutdown()
            }
        })+
    };
}

plain_subsystem!(IpLayer, RouteTable, NatTable, Firewall, IcmpLayer, HttpLayer, WebSocketLayer, GrpcLayer, QuicLayer, DnsResolver, DhcpClient);

impl Subsystem for SocketManager {
    fn start(&self, config: &StackConfig) -> Result<()> {
        self.init(config.max_sockets)
    }
    fn stop(&self) -> Result<()> {
        self.shutdown()
    }
}

impl Subsystem for UdpLayer {
    fn start(&self, config: &StackConfig) -> Result<()> {
        self.init(config.queue_size)
    }
    fn stop(&self) -> Result<()> {
        self.shutdown()
    }
}

pub struct NetworkStack {
    init: InitFlag,
    config: RwLock<StackConfig>,
    stats: Mutex<StackStats>,
    drivers: RwLock<Vec<Arc<dyn NetDriver>>>,
    interfaces: RwLock<InterfaceTable>,
    outbound: Mutex<Receiver<PacketBasis>>,
    pub ip: IpLayer,
    pub routes: RouteTable,
    pub nat: NatTable,
    pub firewall: Firewall,
    pub tcp: SocketManager,
    pub udp: UdpLayer,
    pub icmp: IcmpLayer,
    pub http: HttpLayer,
    pub websocket: WebSocketLayer,
    pub grpc: GrpcLayer,
    pub quic: QuicLayer,
    pub dns: DnsResolver,
    pub dhcp: DhcpClient,
}

impl fmt::Debug for NetworkStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkStack")
            .field("initialized", &self.init.is_set())
            .field("drivers", &self.get_driver_count())
            .field("interfaces", &self.get_interface_count())
            .finish_non_exhaustive()
    }
}

impl Default for NetworkStack {
    fn default() -> Self {
        NetworkStack::new()
    }
}

impl NetworkStack {
    pub fn new() -> NetworkStack {
        let (ip_sender, outbound) = channel::<PacketBasis>();
        NetworkStack {
            init: InitFlag::new(),
            config: RwLock::new(StackConfig::default()),
            stats: Mutex::new(StackStats::default()),
            drivers: RwLock::new(Vec::new()),
            interfaces: RwLock::new(Vec::new()),
            outbound: Mutex::new(outbound),
            ip: IpLayer::new(),
            routes: RouteTable::new(),
            nat: NatTable::new(),
            firewall: Firewall::new(),
            tcp: SocketManager::new(ip_sender.clone()),
            udp: UdpLayer::new(ip_sender.clone()),
            icmp: IcmpLayer::new(ip_sender),
            http: HttpLayer::new(),
            websocket: WebSocketLayer::new(),
            grpc: GrpcLayer::new(),
            quic: QuicLayer::new(),
            dns: DnsResolver::new(),
            dhcp: DhcpClient::new(),
        }
    }

    fn subsystems(&self) -> [(&'static str, &dyn Subsystem); 13] {
        [
            ("ip", &self.ip),
            ("routing", &self.routes),
            ("nat", &self.nat),
            ("firewall", &self.firewall),
            ("tcp", &self.tcp),
            ("udp", &self.udp),
            ("icmp", &self.icmp),
            ("http", &self.http),
            ("websocket", &self.websocket),
            ("grpc", &self.grpc),
            ("quic", &self.quic),
            ("dns", &self.dns),
            ("dhcp", &self.dhcp),
        ]
    }

    /// Stores `config`, empties the registries and brings up every protocol layer.
    /// If one layer fails, the ones already started are shut down again.
    pub fn init(&self, config: StackConfig) -> Result<()> {
        self.init.raise("network stack")?;
        self.drivers.write().clear();
        self.interfaces.write().clear();
        *self.stats.lock() = StackStats::default();

        let subsystems = self.subsystems();
        for (i, (name, sub)) in subsystems.iter().enumerate() {
            if let Err(e) = sub.start(&config) {
                error!("{name} failed to initialize: {e}");
                for (started, sub) in subsystems[..i].iter().rev() {
                    if let Err(e) = sub.stop() {
                        warn!("rolling back {started}: {e}");
                    }
                }
                self.init.lower("network stack")?;
                return Err(e);
            }
        }
        *self.config.write() = config;
        info!("network stack initialized");
        Ok(())
    }

    /// Shuts every layer down and releases all drivers. Calling it again does nothing.
    pub fn shutdown(&self) -> Result<()> {
        if self.init.lower("network stack").is_err() {
            return Ok(());
        }
        for (name, sub) in self.subsystems().iter().rev() {
            if let Err(e) = sub.stop() {
                warn!("{name} shutdown: {e}");
            }
        }
        for driver in self.drivers.write().drain(..) {
            if let Err(e) = driver.close() {
                warn!("closing driver {}: {e}", driver.name());
            }
        }
        self.interfaces.write().clear();
        let outbound = self.outbound.lock();
        while outbound.try_recv().is_ok() {}
        info!("network stack shut down");
        Ok(())
    }

    pub fn get_config(&self) -> StackConfig {
        self.config.read().clone()
    }
    pub fn set_config(&self, config: StackConfig) {
        *self.config.write() = config;
    }
    pub fn get_status(&self) -> StackStatus {
        match self.init.is_set() {
            true => StackStatus::Running,
            false => StackStatus::Stopped,
        }
    }
    pub fn get_stats(&self) -> StackStats {
        self.stats.lock().clone()
    }
    /// Stats snapshot stamped with the current time
    pub fn get_performance_metrics(&self) -> StackStats {
        let mut stats = self.stats.lock();
        stats.last_update = timestamp();
        stats.clone()
    }

    // DRIVERS

    /// Probes, opens and registers a driver. Registering a name twice is a logged no-op.
    pub fn register_driver(&self, driver: Arc<dyn NetDriver>) -> Result<()> {
        self.init.check("network stack")?;
        let name = driver.name().to_string();
        if name.is_empty() {
            return Err(NetError::invalid("driver without a name"));
        }
        if self.get_driver(&name).is_some() {
            warn!("driver {name} is already registered");
            return Ok(());
        }
        if self.get_driver_count() >= MAX_DRIVERS {
            return Err(NetError::full("driver", MAX_DRIVERS));
        }
        driver.probe()?;
        driver.open()?;
        // another thread may have registered in the meantime
        let refused = {
            let mut drivers = self.drivers.write();
            let duplicate = drivers.iter().any(|d| d.name() == name);
            if duplicate {
                None
            } else if drivers.len() >= MAX_DRIVERS {
                Some(NetError::full("driver", MAX_DRIVERS))
            } else {
                drivers.push(driver);
                info!("driver {name} registered");
                return Ok(());
            }
        };
        if let Err(e) = driver.close() {
            warn!("closing driver {name}: {e}");
        }
        match refused {
            Some(e) => Err(e),
            None => {
                warn!("driver {name} is already registered");
                Ok(())
            }
        }
    }
    pub fn unregister_driver(&self, name: &str) -> Result<()> {
        self.init.check("network stack")?;
        let driver = {
            let mut drivers = self.drivers.write();
            let i = drivers
                .iter()
                .position(|d| d.name() == name)
                .ok_or_else(|| NetError::not_found(format!("driver {name}")))?;
            drivers.remove(i)
        };
        if let Err(e) = driver.close() {
            warn!("closing driver {name}: {e}");
        }
        driver.remove()?;
        info!("driver {name} unregistered");
        Ok(())
    }
    pub fn get_driver(&self, name: &str) -> Option<Arc<dyn NetDriver>> {
        self.drivers.read().iter().find(|d| d.name() == name).cloned()
    }
    pub fn get_driver_count(&self) -> usize {
        self.drivers.read().len()
    }

    // INTERFACES

    pub fn get_interface(&self, name: &str) -> Option<Interface> {
        self.interfaces.read().iter().find(|i| i.name() == name).cloned()
    }
    /// At most `max` interfaces, in configuration order
    pub fn get_interfaces(&self, max: usize) -> Vec<Interface> {
        self.interfaces.read().iter().take(max).cloned().collect()
    }
    pub fn get_interface_count(&self) -> usize {
        self.interfaces.read().len()
    }
    /// Updates the interface named in `config`, or adds it
    pub fn configure_interface(&self, config: InterfaceConfig) -> Result<()> {
        self.init.check("network stack")?;
        if config.name.is_empty() {
            return Err(NetError::invalid("interface without a name"));
        }
        if !ethernet::is_valid_mtu(config.mtu) {
            return Err(NetError::invalid(format!("MTU {} out of range", config.mtu)));
        }
        let capacity = cmp::min(MAX_INTERFACES, self.config.read().max_interfaces);
        let mut interfaces = self.interfaces.write();
        if let Some(existing) = interfaces.iter_mut().find(|i| i.name() == config.name) {
            existing.reconfigure(config);
            debug!("interface {} reconfigured", existing.name());
            return Ok(());
        }
        if interfaces.len() >= capacity {
            return Err(NetError::full("interface", capacity));
        }
        info!("interface {} configured", config.name);
        interfaces.push(Interface::new(config));
        Ok(())
    }
    pub fn set_interface_state(&self, name: &str, status: InterfaceStatus) -> Result<()> {
        let mut interfaces = self.interfaces.write();
        let inter = interfaces
            .iter_mut()
            .find(|i| i.name() == name)
            .ok_or_else(|| NetError::not_found(format!("interface {name}")))?;
        inter.set_status(status);
        info!("interface {name} is {status}");
        Ok(())
    }
    pub fn is_local_addr(&self, addr: Ipv4Addr) -> bool {
        self.interfaces.read().iter().any(|i| i.is_up() && i.ip() == Some(addr))
    }
    /// Segment payload limit toward `dst`, from the MTU of the interface it is routed through
    pub fn path_mss(&self, dst: Ipv4Addr) -> usize {
        self.routes
            .lookup(dst)
            .and_then(|route| self.get_interface(&route.interface))
            .map_or(MSS, |inter| mss_for_mtu(inter.config.mtu))
    }
    /// Address of the interface that `dst` is routed through
    pub fn source_addr(&self, dst: Ipv4Addr) -> Result<Ipv4Addr> {
        let route = self
            .routes
            .lookup(dst)
            .ok_or_else(|| NetError::not_found(format!("route to {dst}")))?;
        self.get_interface(&route.interface)
            .and_then(|i| i.ip())
            .ok_or_else(|| NetError::not_found(format!("address on interface {}", route.interface)))
    }

    // FEATURES AND SECURITY

    pub fn enable_feature(&self, feature: Features) {
        self.config.write().features |= feature;
    }
    pub fn disable_feature(&self, feature: Features) {
        self.config.write().features &= !feature;
    }
    pub fn is_feature_enabled(&self, feature: Features) -> bool {
        self.config.read().features.contains(feature)
    }
    pub fn enable_security(&self, caps: SecurityCaps) {
        self.config.write().security_level |= caps;
    }
    pub fn disable_security(&self, caps: SecurityCaps) {
        self.config.write().security_level &= !caps;
    }
    pub fn is_security_enabled(&self, caps: SecurityCaps) -> bool {
        self.config.read().security_level.contains(caps)
    }
    pub fn get_security_status(&self) -> SecurityStatus {
        let config = self.config.read();
        SecurityStatus {
            security_level: config.security_level,
            firewall_enabled: config.features.contains(Features::FIREWALL),
            nat_enabled: config.features.contains(Features::NAT),
            firewall_rules: self.firewall.len(),
            nat_rules: self.nat.len(),
        }
    }

    // PACKET PATH

    /// Processes one inbound Ethernet frame of unknown origin
    pub fn process_packet(&self, frame: &[u8]) -> Result<()> {
        self.receive_frame(None, frame)
    }

    fn receive_frame(&self, iface: Option<&str>, frame: &[u8]) -> Result<()> {
        self.init.check("network stack")?;
        {
            let mut stats = self.stats.lock();
            stats.packets_processed += 1;
            stats.bytes_processed += frame.len() as u64;
        }
        match self.deliver(iface, frame) {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.stats.lock().dropped += 1;
                if let Some(name) = iface {
                    self.with_interface(name, |i| i.stats.rx_dropped += 1);
                }
                Ok(())
            }
            Err(e) => {
                self.stats.lock().errors += 1;
                if let Some(name) = iface {
                    self.with_interface(name, |i| i.stats.rx_errors += 1);
                }
                Err(e)
            }
        }
    }

    /// Ok(false) when the frame was dropped by policy
    fn deliver(&self, iface: Option<&str>, frame: &[u8]) -> Result<bool> {
        ethernet::validate_frame(frame)?;
        let eth = ethernet::parse_frame(frame)?;
        if eth.ether_type != ethertype::IPV4 {
            trace!("ethertype {:#06x} not handled", eth.ether_type);
            return Ok(false);
        }
        if let Some(name) = iface {
            match self.get_interface(name) {
                Some(inter) if inter.is_up() => {}
                _ => return Ok(false),
            }
        }
        let pack = self.ip.recv(eth.payload)?;
        if !self.is_local_addr(pack.dst_ip) {
            trace!("datagram for {} is not addressed to this node", pack.dst_ip);
            return Ok(false);
        }
        if self.is_feature_enabled(Features::FIREWALL) {
            let flow = five_tuple(&pack);
            if self.firewall.evaluate(&flow) == FirewallAction::Deny {
                debug!("firewall denied {} -> {} proto {}", pack.src_ip, pack.dst_ip, pack.protocol.0);
                return Ok(false);
            }
        }
        if let Some(name) = iface {
            self.with_interface(name, |i| {
                i.stats.record_rx(frame.len());
                i.stats.record_protocol(pack.protocol);
            });
        }
        match pack.protocol {
            IpNumber::TCP => self.tcp.handle_incoming_with_mss(&pack, self.path_mss(pack.src_ip))?,
            IpNumber::UDP => self.udp.handle_incoming(&pack)?,
            IpNumber::ICMP => self.icmp.handle_incoming(&pack)?,
            other => {
                trace!("ip protocol {} not handled", other.0);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Moves traffic: sends every queued outbound segment, then reads each driver once.
    /// Returns the number of frames moved in either direction.
    pub fn poll(&self) -> Result<usize> {
        self.init.check("network stack")?;
        let mut moved = 0;
        loop {
            let next = self.outbound.lock().try_recv();
            let pb = match next {
                Ok(pb) => pb,
                Err(_) => break,
            };
            match self.transmit(&pb) {
                Ok(()) => moved += 1,
                Err(e) => {
                    self.stats.lock().dropped += 1;
                    debug!("could not send to {}: {e}", pb.dst_ip);
                }
            }
        }
        self.tcp.reap_finished();
        let bindings: Vec<(String, String)> = self
            .interfaces
            .read()
            .iter()
            .map(|i| (i.name().to_string(), i.driver_name().to_string()))
            .collect();
        for (iface, driver_name) in bindings {
            let Some(driver) = self.get_driver(&driver_name) else {
                continue;
            };
            if !driver.link_up() {
                continue;
            }
            for _ in 0..RX_BURST {
                let frame = match driver.receive() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("driver {driver_name}: {e}");
                        break;
                    }
                };
                moved += 1;
                if let Err(e) = self.receive_frame(Some(&iface), &frame) {
                    debug!("{iface}: dropping frame: {e}");
                }
            }
        }
        Ok(moved)
    }

    /// Wraps a queued transport segment in IPv4 and Ethernet and hands it to the egress driver
    fn transmit(&self, pb: &PacketBasis) -> Result<()> {
        let route = self
            .routes
            .lookup(pb.dst_ip)
            .ok_or_else(|| NetError::not_found(format!("route to {}", pb.dst_ip)))?;
        let inter = self
            .get_interface(&route.interface)
            .ok_or_else(|| NetError::not_found(format!("interface {}", route.interface)))?;
        if !inter.is_up() {
            return Err(NetError::state(format!("interface {} is down", inter.name())));
        }
        let datagram = self.ip.build(pb.src_ip, pb.dst_ip, pb.protocol, &pb.msg)?;
        if datagram.len() > inter.config.mtu as usize {
            return Err(NetError::invalid(format!(
                "{} byte datagram exceeds the MTU of {}",
                datagram.len(),
                inter.name()
            )));
        }
        let frame = ethernet::create_frame(BROADCAST_MAC, inter.config.mac, ethertype::IPV4, &datagram)?;
        let driver = self
            .get_driver(inter.driver_name())
            .ok_or_else(|| NetError::not_found(format!("driver {}", inter.driver_name())))?;
        driver.transmit(&frame)?;
        self.with_interface(inter.name(), |i| {
            i.stats.record_tx(frame.len());
            i.stats.record_protocol(pb.protocol);
        });
        let mut stats = self.stats.lock();
        stats.packets_sent += 1;
        stats.bytes_sent += frame.len() as u64;
        Ok(())
    }

    fn with_interface(&self, name: &str, op: impl FnOnce(&mut Interface)) {
        if let Some(inter) = self.interfaces.write().iter_mut().find(|i| i.name() == name) {
            op(inter);
        }
    }

    /// Problems an operator should look at; empty when everything is fine
    pub fn check_health(&self) -> HealthReport {
        let mut issues = Vec::new();
        if !self.init.is_set() {
            issues.push(String::from("stack is not initialized"));
        }
        for inter in self.interfaces.read().iter() {
            match self.get_driver(inter.driver_name()) {
                None => issues.push(format!(
                    "interface {} is bound to unregistered driver {}",
                    inter.name(),
                    inter.driver_name()
                )),
                Some(driver) => {
                    if inter.is_up() && !driver.link_up() {
                        issues.push(format!("interface {} is up but its link is down", inter.name()));
                    }
                }
            }
        }
        for driver in self.drivers.read().iter() {
            let stats = driver.get_stats();
            if stats.rx_errors + stats.tx_errors > 0 {
                issues.push(format!(
                    "driver {} reports {} rx / {} tx errors",
                    driver.name(),
                    stats.rx_errors,
                    stats.tx_errors
                ));
            }
        }
        let stats = self.get_stats();
        if stats.errors > 0 {
            issues.push(format!("{} packets failed processing", stats.errors));
        }
        HealthReport { issues }
    }

    // CONVENIENCE

    /// Echo request to `dst` from the address of the egress interface
    pub fn ping(&self, dst: Ipv4Addr) -> Result<u16> {
        let src = self.source_addr(dst)?;
        self.icmp.ping(src, dst)
    }
    /// Opens a TCP connection to `dst:port` from an ephemeral port
    pub fn connect(&self, dst: Ipv4Addr, port: u16) -> Result<crate::socket_manager::SocketId> {
        let src = self.source_addr(dst)?;
        self.tcp.connect_ephemeral(src, dst, port, self.path_mss(dst))
    }
    pub fn udp_send(&self, src_port: u16, dst: SocketAddrV4, data: &[u8]) -> Result<usize> {
        let src = self.source_addr(*dst.ip())?;
        self.udp.send(SocketAddrV4::new(src, src_port), dst, data)
    }
}

/// Addresses, protocol and (for TCP and UDP) ports of an inbound datagram
fn five_tuple(pack: &Packet) -> FiveTuple {
    let (src_port, dst_port) = match (pack.protocol, pack.payload.get(..4)) {
        (IpNumber::TCP | IpNumber::UDP, Some(p)) => (u16::from_be_bytes([p[0], p[1]]), u16::from_be_bytes([p[2], p[3]])),
        _ => (0, 0),
    };
    FiveTuple {
        src_ip: pack.src_ip,
        dst_ip: pack.dst_ip,
        src_port,
        dst_port,
        protocol: pack.protocol,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{LinkConfig, LoopbackDriver};
    use crate::flags::{LinkFeatures, OffloadCaps};
    use crate::interface::InterfaceStats;

    /// Loopback driver that reads the stack's driver table while it is being opened
    struct Introspecting {
        inner: LoopbackDriver,
        stack: Arc<NetworkStack>,
        seen_while_opening: AtomicUsize,
    }

    impl NetDriver for Introspecting {
        fn name(&self) -> &str {
            self.inner.name()
        }
        fn features(&self) -> LinkFeatures {
            self.inner.features()
        }
        fn offload(&self) -> OffloadCaps {
            self.inner.offload()
        }
        fn open(&self) -> Result<()> {
            self.seen_while_opening.store(self.stack.get_driver_count(), Ordering::SeqCst);
            self.inner.open()
        }
        fn close(&self) -> Result<()> {
            self.inner.close()
        }
        fn transmit(&self, frame: &[u8]) -> Result<usize> {
            self.inner.transmit(frame)
        }
        fn receive(&self) -> Result<Option<Vec<u8>>> {
            self.inner.receive()
        }
        fn get_config(&self) -> LinkConfig {
            self.inner.get_config()
        }
        fn set_config(&self, config: LinkConfig) -> Result<()> {
            self.inner.set_config(config)
        }
        fn get_stats(&self) -> InterfaceStats {
            self.inner.get_stats()
        }
        fn reset_stats(&self) {
            self.inner.reset_stats()
        }
        fn suspend(&self) -> Result<()> {
            self.inner.suspend()
        }
        fn resume(&self) -> Result<()> {
            self.inner.resume()
        }
        fn link_up(&self) -> bool {
            self.inner.link_up()
        }
    }

    fn running() -> NetworkStack {
        let stack = NetworkStack::new();
        stack.init(StackConfig::default()).unwrap();
        stack
    }

    #[test]
    fn init_twice_fails_and_shutdown_is_idempotent() {
        let stack = running();
        assert_eq!(stack.get_status(), StackStatus::Running);
        assert!(matches!(stack.init(StackConfig::default()), Err(NetError::AlreadyInitialized(_))));
        stack.shutdown().unwrap();
        stack.shutdown().unwrap();
        assert_eq!(stack.get_status(), StackStatus::Stopped);
        stack.init(StackConfig::default()).unwrap();
    }

    #[test]
    fn failed_sub_init_rolls_back() {
        let stack = NetworkStack::new();
        // a layer that is already up makes the stack's own init of it fail
        stack.udp.init(16).unwrap();
        assert!(stack.init(StackConfig::default()).is_err());
        assert_eq!(stack.get_status(), StackStatus::Stopped);
        // everything started before udp was shut down again
        stack.ip.init().unwrap();
        stack.tcp.init(8).unwrap();
    }

    #[test]
    fn duplicate_driver_is_a_no_op() {
        let stack = running();
        stack.register_driver(Arc::new(LoopbackDriver::new("lo"))).unwrap();
        stack.register_driver(Arc::new(LoopbackDriver::new("lo"))).unwrap();
        assert_eq!(stack.get_driver_count(), 1);
        assert!(matches!(stack.unregister_driver("eth9"), Err(NetError::NotFound(_))));
        stack.unregister_driver("lo").unwrap();
        assert_eq!(stack.get_driver_count(), 0);
    }

    #[test]
    fn drivers_open_without_the_table_locked() {
        let stack = Arc::new(running());
        stack.register_driver(Arc::new(LoopbackDriver::new("lo"))).unwrap();
        let driver = Arc::new(Introspecting {
            inner: LoopbackDriver::new("eth0"),
            stack: stack.clone(),
            seen_while_opening: AtomicUsize::new(usize::MAX),
        });
        stack.register_driver(driver.clone()).unwrap();
        assert_eq!(driver.seen_while_opening.load(Ordering::SeqCst), 1);
        assert_eq!(stack.get_driver_count(), 2);
        assert!(driver.link_up());
        stack.shutdown().unwrap();
    }

    #[test]
    fn path_mss_follows_the_egress_mtu() {
        let stack = running();
        let mut cfg = InterfaceConfig::new("if0");
        cfg.addr = Some("10.0.0.1/24".parse().unwrap());
        cfg.mtu = 576;
        stack.configure_interface(cfg).unwrap();
        stack.routes.add_route(Ipv4Addr::new(10, 0, 0, 0), Ipv4Addr::new(255, 255, 255, 0), Ipv4Addr::UNSPECIFIED, "if0").unwrap();
        assert_eq!(stack.path_mss(Ipv4Addr::new(10, 0, 0, 9)), 536);
        assert_eq!(stack.path_mss(Ipv4Addr::new(192, 0, 2, 1)), MSS);
    }

    #[test]
    fn interfaces_update_in_place() {
        let stack = running();
        stack.configure_interface(InterfaceConfig::new("if0")).unwrap();
        let mut cfg = InterfaceConfig::new("if0");
        cfg.mtu = 9000;
        stack.configure_interface(cfg).unwrap();
        assert_eq!(stack.get_interface_count(), 1);
        assert_eq!(stack.get_interface("if0").unwrap().config.mtu, 9000);
        let mut bad = InterfaceConfig::new("if1");
        bad.mtu = 10;
        assert!(stack.configure_interface(bad).is_err());
        stack.set_interface_state("if0", InterfaceStatus::Down).unwrap();
        assert!(!stack.get_interface("if0").unwrap().is_up());
        assert!(stack.set_interface_state("nope", InterfaceStatus::Up).is_err());
    }

    #[test]
    fn feature_bits() {
        let stack = running();
        stack.enable_feature(Features::NAT | Features::FIREWALL);
        assert!(stack.is_feature_enabled(Features::NAT));
        stack.disable_feature(Features::NAT);
        assert!(!stack.is_feature_enabled(Features::NAT));
        assert!(stack.get_security_status().firewall_enabled);
        stack.enable_security(SecurityCaps::TLS_1_3);
        assert!(stack.is_security_enabled(SecurityCaps::TLS_1_3));
        assert!(!stack.is_security_enabled(SecurityCaps::TLS_1_3 | SecurityCaps::DTLS));
    }

    #[test]
    fn non_ipv4_frames_are_dropped() {
        let stack = running();
        let frame = ethernet::create_frame(BROADCAST_MAC, [2, 0, 0, 0, 0, 1], ethertype::ARP, &[0; 28]).unwrap();
        stack.process_packet(&frame).unwrap();
        let stats = stack.get_stats();
        assert_eq!((stats.packets_processed, stats.dropped, stats.errors), (1, 1, 0));
        assert!(stack.process_packet(&[0; 10]).is_err());
        assert_eq!(stack.get_stats().errors, 1);
    }

    #[test]
    fn health_reports_unbound_interfaces() {
        let stack = running();
        assert!(stack.check_health().healthy());
        let mut cfg = InterfaceConfig::new("if0");
        cfg.driver = Some(String::from("missing"));
        stack.configure_interface(cfg).unwrap();
        let report = stack.check_health();
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].contains("missing"));
    }
}
