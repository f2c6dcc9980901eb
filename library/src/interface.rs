use crate::ethernet::{Duplex, MacAddr, DEFAULT_MTU};
use crate::flags::{Features, InterfaceFlags, OffloadCaps, SecurityCaps};
use crate::prelude::*;
use crate::utils::timestamp;

pub type InterfaceTable = Vec<Interface>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterfaceType {
    #[default]
    Ethernet,
    Loopback,
    Wireless,
    Tunnel,
    Bridge,
    Vlan,
    Bond,
}

//Used to indicate if an Interface is down or up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterfaceStatus {
    #[default]
    Up,
    Down,
}

impl fmt::Display for InterfaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceStatus::Up => write!(f, "up"),
            InterfaceStatus::Down => write!(f, "down"),
        }
    }
}

/// Hardware capabilities of the NIC behind an interface
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HwFeatures {
    pub speed_mbps: u32,
    pub duplex: Duplex,
    pub autoneg: bool,
    pub pause: bool,
    pub wol: bool,
    pub eee: bool,
    pub fcoe: bool,
    pub iscsi: bool,
    pub rdma: bool,
    pub sr_iov: bool,
    pub macsec: bool,
    pub ptp: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InterfaceStats {
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
    pub rx_dropped: u64,
    pub tx_dropped: u64,
    pub tcp_segments: u64,
    pub udp_datagrams: u64,
    pub icmp_messages: u64,
    pub multicast: u64,
    pub collisions: u64,
    pub length_errors: u64,
    pub crc_errors: u64,
    pub frame_errors: u64,
    pub fifo_errors: u64,
    pub missed_errors: u64,
    pub carrier_errors: u64,
    pub compressed: u64,
    pub last_rx: u64,
    pub last_tx: u64,
    pub last_change: u64,
}

impl InterfaceStats {
    pub fn record_rx(&mut self, len: usize) {
        self.rx_packets += 1;
        self.rx_bytes += len as u64;
        self.last_rx = timestamp();
    }
    pub fn record_tx(&mut self, len: usize) {
        self.tx_packets += 1;
        self.tx_bytes += len as u64;
        self.last_tx = timestamp();
    }
    pub fn record_protocol(&mut self, protocol: IpNumber) {
        match protocol {
            IpNumber::TCP => self.tcp_segments += 1,
            IpNumber::UDP => self.udp_datagrams += 1,
            IpNumber::ICMP => self.icmp_messages += 1,
            _ => {}
        }
    }
}

/// Everything `configure_interface` sets on an interface; the name is the key
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceConfig {
    pub name: String,
    pub if_type: InterfaceType,
    pub status: InterfaceStatus,
    pub mac: MacAddr,
    pub mtu: u16,
    pub flags: InterfaceFlags,
    pub features: Features,
    pub offload: OffloadCaps,
    pub security: SecurityCaps,
    pub hw: HwFeatures,
    /// Address and on-link prefix assigned to the interface
    pub addr: Option<Ipv4Net>,
    /// Registered driver that moves this interface's frames (defaults to the interface name)
    pub driver: Option<String>,
}

impl InterfaceConfig {
    pub fn new(name: &str) -> InterfaceConfig {
        InterfaceConfig {
            name: name.to_string(),
            if_type: InterfaceType::Ethernet,
            status: InterfaceStatus::Up,
            mac: [0; 6],
            mtu: DEFAULT_MTU,
            flags: InterfaceFlags::UP | InterfaceFlags::BROADCAST | InterfaceFlags::MULTICAST,
            features: Features::empty(),
            offload: OffloadCaps::empty(),
            security: SecurityCaps::empty(),
            hw: HwFeatures::default(),
            addr: None,
            driver: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interface {
    pub config: InterfaceConfig,
    pub stats: InterfaceStats,
}

impl Interface {
    pub fn new(config: InterfaceConfig) -> Interface {
        let mut stats = InterfaceStats::default();
        stats.last_change = timestamp();
        Interface { config, stats }
    }
    pub fn name(&self) -> &str {
        &self.config.name
    }
    pub fn is_up(&self) -> bool {
        self.config.status == InterfaceStatus::Up
    }
    pub fn ip(&self) -> Option<Ipv4Addr> {
        self.config.addr.map(|net| net.addr())
    }
    pub fn driver_name(&self) -> &str {
        self.config.driver.as_deref().unwrap_or(&self.config.name)
    }
    /// True when `addr` is on this interface's attached network
    pub fn on_link(&self, addr: Ipv4Addr) -> bool {
        self.config.addr.is_some_and(|net| net.contains(&addr))
    }
    pub fn set_status(&mut self, status: InterfaceStatus) {
        if self.config.status != status {
            self.config.status = status;
            self.config.flags.set(InterfaceFlags::UP, status == InterfaceStatus::Up);
            self.stats.last_change = timestamp();
        }
    }
    /// Replaces the configuration in place, keeping the counters
    pub fn reconfigure(&mut self, config: InterfaceConfig) {
        if config.status != self.config.status {
            self.stats.last_change = timestamp();
        }
        self.config = config;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_changes_update_flags_and_timestamp() {
        let mut inter = Interface::new(InterfaceConfig::new("if0"));
        let before = inter.stats.last_change;
        inter.set_status(InterfaceStatus::Down);
        assert!(!inter.is_up());
        assert!(!inter.config.flags.contains(InterfaceFlags::UP));
        assert!(inter.stats.last_change > before);
    }

    #[test]
    fn on_link_follows_prefix() {
        let mut cfg = InterfaceConfig::new("if0");
        cfg.addr = Some("10.0.0.1/24".parse().unwrap());
        let inter = Interface::new(cfg);
        assert_eq!(inter.ip(), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(inter.on_link(Ipv4Addr::new(10, 0, 0, 200)));
        assert!(!inter.on_link(Ipv4Addr::new(10, 0, 1, 1)));
        assert_eq!(inter.driver_name(), "if0");
    }

    #[test]
    fn protocol_counters() {
        let mut stats = InterfaceStats::default();
        stats.record_protocol(IpNumber::TCP);
        stats.record_protocol(IpNumber::UDP);
        stats.record_protocol(IpNumber::ICMP);
        stats.record_protocol(IpNumber::TCP);
        assert_eq!((stats.tcp_segments, stats.udp_datagrams, stats.icmp_messages), (2, 1, 1));
    }
}
