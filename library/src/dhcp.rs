use crate::prelude::*;
use crate::ethernet::{mac_to_string, MacAddr};
use crate::utils::*;

/// op through file; vend follows
pub const DHCP_FIXED_LEN: usize = 236;
pub const VEND_LEN: usize = 64;
pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;
pub const HTYPE_ETHERNET: u8 = 1;
pub const HLEN_ETHERNET: u8 = 6;
pub const DEFAULT_XID: u32 = 0x1234_5678;
pub const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

// Options
pub const OPT_PAD: u8 = 0;
pub const OPT_REQUESTED_IP: u8 = 50;
pub const OPT_MESSAGE_TYPE: u8 = 53;
pub const OPT_END: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DhcpMessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl TryFrom<u8> for DhcpMessageType {
    type Error = NetError;

    fn try_from(value: u8) -> Result<Self> {
        use DhcpMessageType::*;
        Ok(match value {
            1 => Discover,
            2 => Offer,
            3 => Request,
            4 => Decline,
            5 => Ack,
            6 => Nak,
            7 => Release,
            8 => Inform,
            other => return Err(NetError::invalid(format!("unknown DHCP message type {other}"))),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpMessage {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub sname: [u8; 64],
    pub file: [u8; 128],
    /// Options after the magic cookie, PAD and END excluded
    pub options: Vec<(u8, Vec<u8>)>,
}

impl DhcpMessage {
    /// Client message of the given type; `op` carries the message type as well as option 53
    pub fn new(message_type: DhcpMessageType, mac: MacAddr) -> DhcpMessage {
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(&mac);
        DhcpMessage {
            op: message_type as u8,
            htype: HTYPE_ETHERNET,
            hlen: HLEN_ETHERNET,
            hops: 0,
            xid: DEFAULT_XID,
            secs: 0,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            sname: [0; 64],
            file: [0; 128],
            options: vec![(OPT_MESSAGE_TYPE, vec![message_type as u8])],
        }
    }
    pub fn discover(mac: MacAddr) -> DhcpMessage {
        DhcpMessage::new(DhcpMessageType::Discover, mac)
    }
    pub fn request(mac: MacAddr, requested: Ipv4Addr) -> DhcpMessage {
        let mut msg = DhcpMessage::new(DhcpMessageType::Request, mac);
        msg.yiaddr = requested;
        msg.options.push((OPT_REQUESTED_IP, requested.octets().to_vec()));
        msg
    }
    pub fn release(mac: MacAddr, client: Ipv4Addr) -> DhcpMessage {
        let mut msg = DhcpMessage::new(DhcpMessageType::Release, mac);
        msg.ciaddr = client;
        msg
    }
    pub fn option(&self, code: u8) -> Option<&[u8]> {
        self.options.iter().find(|(c, _)| *c == code).map(|(_, v)| v.as_slice())
    }
    pub fn message_type(&self) -> Option<DhcpMessageType> {
        self.option(OPT_MESSAGE_TYPE)
            .and_then(|v| v.first())
            .and_then(|t| DhcpMessageType::try_from(*t).ok())
    }
    pub fn client_mac(&self) -> MacAddr {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.chaddr[..6]);
        mac
    }

    /// Fixed region, cookie, options, END, zero-padded to at least the 64-byte vend area.
    /// Option values must fit the one-byte length field.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(DHCP_FIXED_LEN + VEND_LEN);
        out.extend_from_slice(&[self.op, self.htype, self.hlen, self.hops]);
        out.extend_from_slice(&self.xid.to_be_bytes());
        out.extend_from_slice(&self.secs.to_be_bytes());
        out.extend_from_slice(&self.flags.to_be_bytes());
        for addr in [self.ciaddr, self.yiaddr, self.siaddr, self.giaddr] {
            out.extend_from_slice(&addr.octets());
        }
        out.extend_from_slice(&self.chaddr);
        out.extend_from_slice(&self.sname);
        out.extend_from_slice(&self.file);
        out.extend_from_slice(&MAGIC_COOKIE);
        for (code, value) in &self.options {
            let len = u8::try_from(value.len())
                .map_err(|_| NetError::invalid(format!("DHCP option {code} has {} bytes", value.len())))?;
            out.push(*code);
            out.push(len);
            out.extend_from_slice(value);
        }
        out.push(OPT_END);
        if out.len() < DHCP_FIXED_LEN + VEND_LEN {
            out.resize(DHCP_FIXED_LEN + VEND_LEN, 0);
        }
        Ok(out)
    }
}

fn ipv4_at(bytes: &[u8], at: usize) -> Ipv4Addr {
    Ipv4Addr::new(bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3])
}

fn parse_options(vend: &[u8]) -> Result<Vec<(u8, Vec<u8>)>> {
    let mut options = Vec::new();
    if vend.get(..4) != Some(&MAGIC_COOKIE[..]) {
        return Ok(options);
    }
    let mut at = 4;
    while let Some(&code) = vend.get(at) {
        match code {
            OPT_PAD => at += 1,
            OPT_END => break,
            _ => {
                let len = *vend
                    .get(at + 1)
                    .ok_or_else(|| NetError::violation(format!("DHCP option {code} has no length")))?
                    as usize;
                let value = vend
                    .get(at + 2..at + 2 + len)
                    .ok_or_else(|| NetError::violation(format!("DHCP option {code} is truncated")))?;
                options.push((code, value.to_vec()));
                at += 2 + len;
            }
        }
    }
    Ok(options)
}

pub fn parse_message(bytes: &[u8]) -> Result<DhcpMessage> {
    if bytes.len() < DHCP_FIXED_LEN {
        return Err(NetError::violation(format!(
            "{} byte DHCP message is shorter than its fixed header",
            bytes.len()
        )));
    }
    let mut chaddr = [0u8; 16];
    chaddr.copy_from_slice(&bytes[28..44]);
    let mut sname = [0u8; 64];
    sname.copy_from_slice(&bytes[44..108]);
    let mut file = [0u8; 128];
    file.copy_from_slice(&bytes[108..236]);
    Ok(DhcpMessage {
        op: bytes[0],
        htype: bytes[1],
        hlen: bytes[2],
        hops: bytes[3],
        xid: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        secs: u16::from_be_bytes([bytes[8], bytes[9]]),
        flags: u16::from_be_bytes([bytes[10], bytes[11]]),
        ciaddr: ipv4_at(bytes, 12),
        yiaddr: ipv4_at(bytes, 16),
        siaddr: ipv4_at(bytes, 20),
        giaddr: ipv4_at(bytes, 24),
        chaddr,
        sname,
        file,
        options: parse_options(&bytes[DHCP_FIXED_LEN..])?,
    })
}

/// Client side: builds the discover/request/release messages and remembers the lease it asked for
#[derive(Debug, Default)]
pub struct DhcpClient {
    init: InitFlag,
    lease: Mutex<Option<Ipv4Addr>>,
}

impl DhcpClient {
    pub fn new() -> DhcpClient {
        DhcpClient::default()
    }
    pub fn init(&self) -> Result<()> {
        self.init.raise("dhcp")?;
        *self.lease.lock() = None;
        info!("dhcp client initialized");
        Ok(())
    }
    pub fn shutdown(&self) -> Result<()> {
        self.init.lower("dhcp")?;
        *self.lease.lock() = None;
        Ok(())
    }
    pub fn discover(&self, mac: MacAddr) -> Result<Vec<u8>> {
        self.init.check("dhcp")?;
        debug!("dhcp discover from {}", mac_to_string(&mac));
        DhcpMessage::discover(mac).encode()
    }
    pub fn request(&self, mac: MacAddr, requested: Ipv4Addr) -> Result<Vec<u8>> {
        self.init.check("dhcp")?;
        *self.lease.lock() = Some(requested);
        debug!("dhcp request for {requested} from {}", mac_to_string(&mac));
        DhcpMessage::request(mac, requested).encode()
    }
    pub fn release(&self, mac: MacAddr) -> Result<Vec<u8>> {
        self.init.check("dhcp")?;
        let client = self
            .lease
            .lock()
            .take()
            .ok_or_else(|| NetError::state("no DHCP lease to release"))?;
        debug!("dhcp release of {client} from {}", mac_to_string(&mac));
        DhcpMessage::release(mac, client).encode()
    }
    pub fn lease(&self) -> Option<Ipv4Addr> {
        *self.lease.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: MacAddr = [0x02, 0, 0, 0, 0, 0x01];

    #[test]
    fn discover_layout() {
        let bytes = DhcpMessage::discover(MAC).encode().unwrap();
        assert_eq!(bytes.len(), DHCP_FIXED_LEN + VEND_LEN);
        assert_eq!(&bytes[..8], &[1, 1, 6, 0, 0x12, 0x34, 0x56, 0x78]);
        assert_eq!(&bytes[28..34], &MAC);
        assert_eq!(&bytes[236..243], &[99, 130, 83, 99, 53, 1, 1]);
        assert_eq!(bytes[243], OPT_END);
    }

    #[test]
    fn request_and_release_carry_addresses() {
        let want = Ipv4Addr::new(192, 168, 1, 50);
        let req = parse_message(&DhcpMessage::request(MAC, want).encode().unwrap()).unwrap();
        assert_eq!(req.op, 3);
        assert_eq!(req.yiaddr, want);
        assert_eq!(req.message_type(), Some(DhcpMessageType::Request));
        assert_eq!(req.option(OPT_REQUESTED_IP), Some(&want.octets()[..]));
        assert_eq!(req.client_mac(), MAC);

        let rel = parse_message(&DhcpMessage::release(MAC, want).encode().unwrap()).unwrap();
        assert_eq!((rel.op, rel.ciaddr), (7, want));
    }

    #[test]
    fn short_or_truncated_messages() {
        let bytes = DhcpMessage::discover(MAC).encode().unwrap();
        assert!(matches!(parse_message(&bytes[..235]), Err(NetError::ProtocolViolation(_))));
        let bare = parse_message(&bytes[..236]).unwrap();
        assert!(bare.options.is_empty());
        assert!(parse_message(&bytes[..241]).is_err());
    }

    #[test]
    fn oversized_option_is_refused() {
        let mut msg = DhcpMessage::discover(MAC);
        msg.options.push((12, vec![b'h'; 255]));
        assert!(msg.encode().is_ok());
        msg.options.push((15, vec![b'd'; 256]));
        assert!(matches!(msg.encode(), Err(NetError::InvalidArgument(_))));
    }

    #[test]
    fn client_tracks_its_lease() {
        let client = DhcpClient::new();
        client.init().unwrap();
        client.discover(MAC).unwrap();
        assert!(client.release(MAC).is_err());
        client.request(MAC, Ipv4Addr::new(10, 0, 0, 9)).unwrap();
        assert_eq!(client.lease(), Some(Ipv4Addr::new(10, 0, 0, 9)));
        let msg = parse_message(&client.release(MAC).unwrap()).unwrap();
        assert_eq!(msg.ciaddr, Ipv4Addr::new(10, 0, 0, 9));
        assert_eq!(client.lease(), None);
    }
}
