use crate::prelude::*;
use crate::utils::IPV4_HEADER_LEN;
use std::str::FromStr;

/// Largest payload carried by one segment
pub const MSS: usize = 1460;
pub const TCP_HEADER_LEN: usize = 20;
pub const MAX_WINDOW: u16 = 65535;

// TCP FLAGS
pub const FIN: u8 = 0x01;
pub const SYN: u8 = 0x02;
pub const RST: u8 = 0x04;
pub const PSH: u8 = 0x08;
pub const ACK: u8 = 0x10;
pub const URG: u8 = 0x20;
pub const ECE: u8 = 0x40;
pub const CWR: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TcpState {
    #[default]
    Closed,
    Listen,      // Listener socket constant state
    SynSent,     // Active open, waiting for SYN|ACK
    SynReceived, // Spawned by a listener, SYN|ACK sent, waiting for the final ACK
    Established, // Handshake complete, both sides may send
    // Teardown
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

/// Payload bytes one segment may carry on a link with the given MTU, never more than `MSS`
pub fn mss_for_mtu(mtu: u16) -> usize {
    (mtu as usize)
        .saturating_sub(IPV4_HEADER_LEN + TCP_HEADER_LEN)
        .clamp(1, MSS)
}

impl fmt::Display for TcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TcpState::Closed => "CLOSED",
            TcpState::Listen => "LISTEN",
            TcpState::SynSent => "SYN_SENT",
            TcpState::SynReceived => "SYN_RECEIVED",
            TcpState::Established => "ESTABLISHED",
            TcpState::FinWait1 => "FIN_WAIT_1",
            TcpState::FinWait2 => "FIN_WAIT_2",
            TcpState::CloseWait => "CLOSE_WAIT",
            TcpState::Closing => "CLOSING",
            TcpState::LastAck => "LAST_ACK",
            TcpState::TimeWait => "TIME_WAIT",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TcpAddress {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl TcpAddress {
    pub fn new(ip: Ipv4Addr, port: u16) -> TcpAddress {
        TcpAddress { ip, port }
    }
}

impl fmt::Display for TcpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// A TCP segment with a TCP header and a payload ; encapsulated in IP upon send
#[derive(Debug, Clone)]
pub struct TcpPacket {
    pub header: TcpHeader,
    pub payload: Vec<u8>,
}

impl TcpPacket {
    pub fn new(header: TcpHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }
    /// True when the stored checksum matches the pseudo-header checksum for the given addresses
    pub fn checksum_valid(&self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> bool {
        match self
            .header
            .calc_checksum_ipv4_raw(src_ip.octets(), dst_ip.octets(), &self.payload)
        {
            Ok(sum) => sum == self.header.checksum,
            Err(_) => false,
        }
    }
}

/// Serializes a TcpPacket into the PAYLOAD of an IP packet
pub fn serialize_tcp(packet: &TcpPacket) -> Vec<u8> {
    let mut buffer = Vec::new();
    buffer.extend_from_slice(&packet.header.to_bytes());
    buffer.extend_from_slice(&packet.payload);
    buffer
}

/// Deserializes a TCP segment from the payload of an IP packet ; do not pass whole datagrams
pub fn deserialize_tcp(ip_payload: &[u8]) -> Result<TcpPacket> {
    if ip_payload.len() < TCP_HEADER_LEN {
        return Err(NetError::violation(format!(
            "segment of {} bytes is shorter than the TCP header",
            ip_payload.len()
        )));
    }
    let (header, payload) =
        TcpHeader::from_slice(ip_payload).map_err(|e| NetError::violation(format!("unreadable TCP header: {e}")))?;
    Ok(TcpPacket { header, payload: payload.to_vec() })
}

pub fn header_flags(head: &TcpHeader) -> u8 {
    let bits = [
        (head.fin, FIN),
        (head.syn, SYN),
        (head.rst, RST),
        (head.psh, PSH),
        (head.ack, ACK),
        (head.urg, URG),
        (head.ece, ECE),
        (head.cwr, CWR),
    ];
    bits.iter().filter(|(set, _)| *set).fold(0, |acc, (_, bit)| acc | bit)
}

/// Takes in a TCP header and a u8 representing flags and sets exactly those flags
pub fn set_flags(head: &mut TcpHeader, flags: u8) {
    head.fin = flags & FIN != 0;
    head.syn = flags & SYN != 0;
    head.rst = flags & RST != 0;
    head.psh = flags & PSH != 0;
    head.ack = flags & ACK != 0;
    head.urg = flags & URG != 0;
    head.ece = flags & ECE != 0;
    head.cwr = flags & CWR != 0;
}

pub fn has_only_flags(head: &TcpHeader, flags: u8) -> bool {
    header_flags(head) == flags
}

pub fn has_flags(head: &TcpHeader, flags: u8) -> bool {
    header_flags(head) & flags == flags
}

/// SYN and only SYN
pub fn is_syn(head: &TcpHeader) -> bool {
    !head.ns && has_only_flags(head, SYN)
}

/// Congestion control algorithms a connection can be switched to. Only the selection is kept;
/// window growth is the same for all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CongestionControl {
    Reno,
    NewReno,
    #[default]
    Cubic,
    Bbr,
    Vegas,
    Westwood,
    Htcp,
    Scalable,
    Hstcp,
    Bic,
    Yeah,
}

impl CongestionControl {
    pub const ALL: [CongestionControl; 11] = [
        CongestionControl::Reno,
        CongestionControl::NewReno,
        CongestionControl::Cubic,
        CongestionControl::Bbr,
        CongestionControl::Vegas,
        CongestionControl::Westwood,
        CongestionControl::Htcp,
        CongestionControl::Scalable,
        CongestionControl::Hstcp,
        CongestionControl::Bic,
        CongestionControl::Yeah,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CongestionControl::Reno => "reno",
            CongestionControl::NewReno => "newreno",
            CongestionControl::Cubic => "cubic",
            CongestionControl::Bbr => "bbr",
            CongestionControl::Vegas => "vegas",
            CongestionControl::Westwood => "westwood",
            CongestionControl::Htcp => "htcp",
            CongestionControl::Scalable => "scalable",
            CongestionControl::Hstcp => "hstcp",
            CongestionControl::Bic => "bic",
            CongestionControl::Yeah => "yeah",
        }
    }
}

impl fmt::Display for CongestionControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CongestionControl {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.to_ascii_lowercase();
        CongestionControl::ALL
            .iter()
            .find(|cc| cc.name() == wanted)
            .copied()
            .ok_or_else(|| NetError::invalid(format!("unknown congestion control algorithm {s:?}")))
    }
}

/// Protocol-wide TCP tunables
#[derive(Debug, Clone, PartialEq)]
pub struct TcpConfig {
    pub max_connections: usize,
    pub max_syn_backlog: usize,
    pub max_orphans: usize,
    pub fin_timeout: Duration,
    pub keepalive_time: Duration,
    pub keepalive_probes: u32,
    pub keepalive_interval: Duration,
    pub max_tw_buckets: usize,
    pub tw_reuse: bool,
    pub window_scaling: bool,
    pub timestamps: bool,
    pub sack: bool,
    pub fack: bool,
    pub ecn: bool,
    pub abc: bool,
    pub congestion_control: CongestionControl,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            max_connections: 10000,
            max_syn_backlog: 1024,
            max_orphans: 1000,
            fin_timeout: Duration::from_secs(60),
            keepalive_time: Duration::from_secs(7200),
            keepalive_probes: 9,
            keepalive_interval: Duration::from_secs(75),
            max_tw_buckets: 65536,
            tw_reuse: true,
            window_scaling: true,
            timestamps: true,
            sack: true,
            fack: true,
            ecn: true,
            abc: true,
            congestion_control: CongestionControl::Cubic,
        }
    }
}
