//! Ethernet II framing, MAC address helpers and link parameters.

use etherparse::{EtherType, Ethernet2Header};

use crate::flags::LinkFeatures;
use crate::prelude::*;

pub type MacAddr = [u8; 6];

pub const BROADCAST_MAC: MacAddr = [0xFF; 6];
pub const ETH_HEADER_LEN: usize = 14;
pub const ETH_MIN_FRAME: usize = 64;
pub const ETH_MAX_FRAME: usize = 1518;
pub const ETH_MIN_PAYLOAD: usize = 46;
/// Header plus frame check sequence
pub const ETH_OVERHEAD: usize = 18;
pub const MIN_MTU: u16 = 68;
pub const MAX_MTU: u16 = 9000;
pub const DEFAULT_MTU: u16 = 1500;

pub mod ethertype {
    pub const IPV4: u16 = 0x0800;
    pub const ARP: u16 = 0x0806;
    pub const RARP: u16 = 0x8035;
    pub const VLAN: u16 = 0x8100;
    pub const IPV6: u16 = 0x86DD;
    pub const MPLS: u16 = 0x8847;
    pub const PPPOE: u16 = 0x8864;
    pub const EAPOL: u16 = 0x888E;
    pub const LLDP: u16 = 0x88CC;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Duplex {
    Half = 1,
    Full = 2,
    #[default]
    Auto = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    #[default]
    None = 0,
    Tx = 1,
    Rx = 2,
    Both = 3,
}

/// Link speeds in Mb/s, indexed by their LinkFeatures bit
const SPEEDS: [u32; 9] = [10, 100, 1000, 2500, 5000, 10000, 25000, 40000, 100000];

/// A parsed frame borrowing its payload from the receive buffer
#[derive(Debug, PartialEq)]
pub struct EthernetFrame<'a> {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ether_type: u16,
    pub payload: &'a [u8],
}

pub fn mac_to_string(mac: &MacAddr) -> String {
    mac.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<String>>()
        .join(":")
}

pub fn string_to_mac(s: &str) -> Result<MacAddr> {
    let fields: Vec<&str> = s.trim().split(':').collect();
    if fields.len() != 6 {
        return Err(NetError::invalid(format!("malformed MAC address {s:?}")));
    }
    let mut mac = [0u8; 6];
    for (byte, field) in mac.iter_mut().zip(fields) {
        if field.is_empty() || field.len() > 2 {
            return Err(NetError::invalid(format!("malformed MAC address {s:?}")));
        }
        *byte = u8::from_str_radix(field, 16)
            .map_err(|_| NetError::invalid(format!("malformed MAC address {s:?}")))?;
    }
    Ok(mac)
}

pub fn is_broadcast(mac: &MacAddr) -> bool {
    *mac == BROADCAST_MAC
}

/// Group bit set; broadcast counts as multicast
pub fn is_multicast(mac: &MacAddr) -> bool {
    mac[0] & 0x01 != 0
}

pub fn is_unicast(mac: &MacAddr) -> bool {
    !is_multicast(mac)
}

/// Builds an Ethernet II frame, zero-padding short payloads up to the minimum frame size
pub fn create_frame(dst: MacAddr, src: MacAddr, ether_type: u16, payload: &[u8]) -> Result<Vec<u8>> {
    if ETH_HEADER_LEN + payload.len() > ETH_MAX_FRAME {
        return Err(NetError::invalid(format!(
            "payload of {} bytes does not fit in one frame",
            payload.len()
        )));
    }
    let header = Ethernet2Header {
        source: src,
        destination: dst,
        ether_type: EtherType(ether_type),
    };
    let mut frame = Vec::with_capacity(cmp::max(ETH_MIN_FRAME, ETH_HEADER_LEN + payload.len()));
    frame.extend_from_slice(&header.to_bytes());
    frame.extend_from_slice(payload);
    if frame.len() < ETH_MIN_FRAME {
        frame.resize(ETH_MIN_FRAME, 0);
    }
    Ok(frame)
}

pub fn parse_frame(bytes: &[u8]) -> Result<EthernetFrame<'_>> {
    if bytes.len() < ETH_HEADER_LEN {
        return Err(NetError::violation(format!(
            "frame of {} bytes is shorter than the Ethernet header",
            bytes.len()
        )));
    }
    let (header, payload) = Ethernet2Header::from_slice(bytes)
        .map_err(|e| NetError::violation(format!("bad Ethernet header: {e}")))?;
    Ok(EthernetFrame {
        dst: header.destination,
        src: header.source,
        ether_type: header.ether_type.0,
        payload,
    })
}

/// Checks the frame length bounds and logs group-addressed frames
pub fn validate_frame(bytes: &[u8]) -> Result<()> {
    if bytes.len() < ETH_MIN_FRAME || bytes.len() > ETH_MAX_FRAME {
        return Err(NetError::violation(format!(
            "frame length {} outside [{ETH_MIN_FRAME}, {ETH_MAX_FRAME}]",
            bytes.len()
        )));
    }
    let frame = parse_frame(bytes)?;
    if is_broadcast(&frame.dst) {
        trace!("broadcast frame from {}", mac_to_string(&frame.src));
    } else if is_multicast(&frame.dst) {
        trace!("multicast frame to {}", mac_to_string(&frame.dst));
    }
    Ok(())
}

pub fn is_valid_mtu(mtu: u16) -> bool {
    (MIN_MTU..=MAX_MTU).contains(&mtu)
}

/// Largest frame payload an interface with this MTU carries
pub fn max_payload(mtu: u16) -> usize {
    (mtu as usize).saturating_sub(ETH_OVERHEAD)
}

pub fn supports_speed(features: LinkFeatures, mbps: u32) -> bool {
    SPEEDS
        .iter()
        .position(|&s| s == mbps)
        .is_some_and(|bit| features.bits() & (1 << bit) != 0)
}

/// Fastest speed advertised, if any
pub fn max_speed(features: LinkFeatures) -> Option<u32> {
    SPEEDS
        .iter()
        .enumerate()
        .rev()
        .find(|(bit, _)| features.bits() & (1 << bit) != 0)
        .map(|(_, &speed)| speed)
}

/// Locally administered MAC derived from an IPv4 address (02:00:a.b.c.d)
pub fn mac_for_ip(ip: Ipv4Addr) -> MacAddr {
    let o = ip.octets();
    [0x02, 0x00, o[0], o[1], o[2], o[3]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_formats_lower_hex() {
        let mac = [0x02, 0x00, 0x0a, 0xff, 0x00, 0x01];
        assert_eq!(mac_to_string(&mac), "02:00:0a:ff:00:01");
        assert_eq!(string_to_mac("02:00:0A:FF:00:01").unwrap(), mac);
    }

    #[test]
    fn bad_mac_strings_are_rejected() {
        for s in ["", "02:00:0a:ff:00", "02:00:0a:ff:00:01:02", "zz:00:00:00:00:00", "002:0:0:0:0:0"] {
            assert!(matches!(string_to_mac(s), Err(NetError::InvalidArgument(_))), "{s}");
        }
    }

    #[test]
    fn address_classes() {
        assert!(is_broadcast(&BROADCAST_MAC));
        assert!(is_multicast(&BROADCAST_MAC));
        assert!(is_multicast(&[0x01, 0x00, 0x5e, 0, 0, 1]));
        assert!(is_unicast(&[0x02, 0, 0, 0, 0, 1]));
    }

    #[test]
    fn short_payloads_are_padded() {
        let frame = create_frame(BROADCAST_MAC, [2, 0, 0, 0, 0, 1], ethertype::IPV4, &[1, 2, 3]).unwrap();
        assert_eq!(frame.len(), ETH_MIN_FRAME);
        assert_eq!(&frame[12..14], &[0x08, 0x00]);
        validate_frame(&frame).unwrap();

        let parsed = parse_frame(&frame).unwrap();
        assert_eq!(parsed.dst, BROADCAST_MAC);
        assert_eq!(parsed.ether_type, ethertype::IPV4);
        assert_eq!(&parsed.payload[..3], &[1, 2, 3]);
    }

    #[test]
    fn frame_length_bounds() {
        assert!(matches!(validate_frame(&[0u8; 63]), Err(NetError::ProtocolViolation(_))));
        assert!(matches!(validate_frame(&[0u8; 1519]), Err(NetError::ProtocolViolation(_))));
        assert!(validate_frame(&[0u8; 1518]).is_ok());
        assert!(parse_frame(&[0u8; 13]).is_err());
        assert!(create_frame(BROADCAST_MAC, BROADCAST_MAC, ethertype::IPV4, &[0u8; 1505]).is_err());
    }

    #[test]
    fn mtu_helpers() {
        assert!(is_valid_mtu(68) && is_valid_mtu(9000));
        assert!(!is_valid_mtu(67) && !is_valid_mtu(9001));
        assert_eq!(max_payload(1500), 1482);
    }

    #[test]
    fn link_speeds() {
        let f = LinkFeatures::SPEED_100M | LinkFeatures::SPEED_1G | LinkFeatures::AUTONEG;
        assert!(supports_speed(f, 1000));
        assert!(!supports_speed(f, 10000));
        assert!(!supports_speed(f, 1234));
        assert_eq!(max_speed(f), Some(1000));
        assert_eq!(max_speed(LinkFeatures::AUTONEG), None);
    }
}
