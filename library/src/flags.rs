use bitflags::{bitflags, Flags};

use crate::prelude::*;

bitflags! {
    /// Stack-wide feature switches
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Features: u32 {
        const IPSEC = 1 << 0;
        const VPN = 1 << 1;
        const LOAD_BALANCER = 1 << 2;
        const PROXY = 1 << 3;
        const CACHE = 1 << 4;
        const CDN = 1 << 5;
        const DDOS_PROTECT = 1 << 6;
        const QOS = 1 << 7;
        const VLAN = 1 << 8;
        const BONDING = 1 << 9;
        const BRIDGING = 1 << 10;
        const ROUTING = 1 << 11;
        const NAT = 1 << 12;
        const FIREWALL = 1 << 13;
        const IDS = 1 << 14;
        const IPS = 1 << 15;
    }
}

bitflags! {
    /// Security protocols the stack (or an interface) is allowed to use
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SecurityCaps: u32 {
        const TLS_1_3 = 1 << 0;
        const TLS_1_2 = 1 << 1;
        const DTLS = 1 << 2;
        const QUIC = 1 << 3;
        const IPSEC = 1 << 4;
        const WIREGUARD = 1 << 5;
        const OPENVPN = 1 << 6;
        const L2TP = 1 << 7;
        const PPTP = 1 << 8;
        const SSTP = 1 << 9;
    }
}

bitflags! {
    /// Hardware offloads a driver advertises
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OffloadCaps: u32 {
        const TCP_CSUM = 1 << 0;
        const UDP_CSUM = 1 << 1;
        const IP_CSUM = 1 << 2;
        const TCP_SEGMENT = 1 << 3;
        const LRO = 1 << 4;
        const GRO = 1 << 5;
        const TSO = 1 << 6;
        const RSS = 1 << 7;
        const RPS = 1 << 8;
        const XPS = 1 << 9;
        const DMA = 1 << 10;
        const IRQ_COAL = 1 << 11;
    }
}

bitflags! {
    /// Link features of a driver. Bits 0..=8 are the supported speeds.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LinkFeatures: u32 {
        const SPEED_10M = 1 << 0;
        const SPEED_100M = 1 << 1;
        const SPEED_1G = 1 << 2;
        const SPEED_2_5G = 1 << 3;
        const SPEED_5G = 1 << 4;
        const SPEED_10G = 1 << 5;
        const SPEED_25G = 1 << 6;
        const SPEED_40G = 1 << 7;
        const SPEED_100G = 1 << 8;
        const AUTONEG = 1 << 9;
        const PAUSE = 1 << 10;
        const WOL = 1 << 11;
        const EEE = 1 << 12;
        const PTP = 1 << 13;
    }
}

bitflags! {
    /// Interface flags (IFF_* values)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InterfaceFlags: u32 {
        const UP = 0x1;
        const BROADCAST = 0x2;
        const LOOPBACK = 0x8;
        const POINTOPOINT = 0x10;
        const RUNNING = 0x40;
        const PROMISC = 0x100;
        const MULTICAST = 0x1000;
    }
}

/// Looks a flag up by name, case-insensitively; `.` and `-` stand in for `_` ("tls1.3" is TLS_1_3)
pub fn flag_by_name<F: Flags>(name: &str) -> Result<F> {
    let mut wanted = name.trim().to_ascii_uppercase().replace(['.', '-'], "_");
    if let Some(rest) = wanted.strip_prefix("TLS") {
        if !rest.starts_with('_') {
            wanted = format!("TLS_{rest}");
        }
    }
    F::from_name(&wanted).ok_or_else(|| NetError::invalid(format!("unknown flag {name:?}")))
}

/// Comma separated names of every set flag, "-" when empty
pub fn flag_names<F: Flags>(flags: &F) -> String {
    let names: Vec<&str> = flags.iter_names().map(|(name, _)| name).collect();
    if names.is_empty() {
        String::from("-")
    } else {
        names.join(",")
    }
}
