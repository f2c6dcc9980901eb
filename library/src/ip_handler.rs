use crate::prelude::*;
use crate::utils::*;

/// Fixed identification stamped on every datagram this stack originates
pub const IP_IDENTIFICATION: u16 = 0x1234;
pub const DEFAULT_TTL: u8 = 64;
const VERSION_IHL: u8 = 0x45;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IpStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub checksum_errors: u64,
    pub malformed: u64,
}

/// IPv4 send/receive path
#[derive(Debug, Default)]
pub struct IpLayer {
    init: InitFlag,
    stats: Mutex<IpStats>,
}

impl IpLayer {
    pub fn new() -> IpLayer {
        IpLayer::default()
    }
    pub fn init(&self) -> Result<()> {
        self.init.raise("ip")?;
        *self.stats.lock() = IpStats::default();
        debug!("ip layer initialized");
        Ok(())
    }
    pub fn shutdown(&self) -> Result<()> {
        self.init.lower("ip")
    }
    pub fn stats(&self) -> IpStats {
        self.stats.lock().clone()
    }

    /// Writes a 20-byte IPv4 header into `buf[..20]` for the `len` payload bytes already
    /// sitting at `buf[20..20 + len]`, then fills in the header checksum.
    /// Returns the total datagram length.
    pub fn send(&self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr, protocol: IpNumber, buf: &mut [u8], len: usize) -> Result<usize> {
        let total_len = IPV4_HEADER_LEN + len;
        if buf.len() < total_len {
            return Err(NetError::invalid(format!(
                "buffer of {} bytes cannot hold a {total_len} byte datagram",
                buf.len()
            )));
        }
        let total_len_u16 = u16::try_from(total_len)
            .map_err(|_| NetError::invalid(format!("datagram of {total_len} bytes is too large")))?;

        let header = &mut buf[..IPV4_HEADER_LEN];
        header[0] = VERSION_IHL;
        header[1] = 0;
        header[2..4].copy_from_slice(&total_len_u16.to_be_bytes());
        header[4..6].copy_from_slice(&IP_IDENTIFICATION.to_be_bytes());
        header[6..8].copy_from_slice(&[0, 0]);
        header[8] = DEFAULT_TTL;
        header[9] = protocol.0;
        header[10..12].copy_from_slice(&[0, 0]);
        header[12..16].copy_from_slice(&src_ip.octets());
        header[16..20].copy_from_slice(&dst_ip.octets());
        let sum = checksum(header);
        header[10..12].copy_from_slice(&sum.to_be_bytes());

        let mut stats = self.stats.lock();
        stats.packets_sent += 1;
        stats.bytes_sent += total_len as u64;
        Ok(total_len)
    }

    /// Allocates a datagram for `payload` and runs it through `send`
    pub fn build(&self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr, protocol: IpNumber, payload: &[u8]) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; IPV4_HEADER_LEN + payload.len()];
        buf[IPV4_HEADER_LEN..].copy_from_slice(payload);
        self.send(src_ip, dst_ip, protocol, &mut buf, payload.len())?;
        Ok(buf)
    }

    /// Validates an inbound datagram (length, version, header checksum) and splits it into
    /// addresses, protocol and payload. Bytes beyond the total length (link padding) are ignored.
    pub fn recv(&self, packet: &[u8]) -> Result<Packet> {
        if packet.len() < IPV4_HEADER_LEN {
            self.stats.lock().malformed += 1;
            return Err(NetError::violation(format!(
                "datagram of {} bytes is shorter than the IPv4 header",
                packet.len()
            )));
        }
        let ihl = ((packet[0] & 0x0F) as usize) * 4;
        if packet[0] >> 4 != 4 || ihl < IPV4_HEADER_LEN || packet.len() < ihl {
            self.stats.lock().malformed += 1;
            return Err(NetError::violation("bad IPv4 version or header length"));
        }
        if !header_checksum_valid(&packet[..ihl]) {
            self.stats.lock().checksum_errors += 1;
            warn!("dropping datagram with bad header checksum");
            return Err(NetError::violation("IPv4 header checksum mismatch"));
        }
        let (head, _) = Ipv4Header::from_slice(packet).map_err(|e| {
            self.stats.lock().malformed += 1;
            NetError::violation(format!("unreadable IPv4 header: {e}"))
        })?;
        let total_len = head.total_len as usize;
        if total_len < ihl || total_len > packet.len() {
            self.stats.lock().malformed += 1;
            return Err(NetError::violation(format!(
                "total length {total_len} does not match {} received bytes",
                packet.len()
            )));
        }
        let pack = Packet {
            src_ip: Ipv4Addr::from(head.source),
            dst_ip: Ipv4Addr::from(head.destination),
            protocol: head.protocol,
            ttl: head.time_to_live,
            payload: packet[ihl..total_len].to_vec(),
        };
        trace!("ip recv {} -> {} proto {} ttl {}", pack.src_ip, pack.dst_ip, pack.protocol.0, pack.ttl);
        let mut stats = self.stats.lock();
        stats.packets_received += 1;
        stats.bytes_received += total_len as u64;
        Ok(pack)
    }
}

/// Recomputes the checksum with the checksum field zeroed and compares it to the stored one
pub fn header_checksum_valid(header: &[u8]) -> bool {
    if header.len() < IPV4_HEADER_LEN {
        return false;
    }
    let stored = u16::from_be_bytes([header[10], header[11]]);
    let mut scratch = header.to_vec();
    scratch[10] = 0;
    scratch[11] = 0;
    checksum(&scratch) == stored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs() -> (Ipv4Addr, Ipv4Addr) {
        (Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2))
    }

    #[test]
    fn header_layout() {
        let ip = IpLayer::new();
        let (src, dst) = addrs();
        let dgram = ip.build(src, dst, IpNumber::UDP, b"hello").unwrap();
        assert_eq!(dgram.len(), 25);
        assert_eq!(dgram[0], 0x45);
        assert_eq!(dgram[1], 0);
        assert_eq!(u16::from_be_bytes([dgram[2], dgram[3]]), 25);
        assert_eq!(u16::from_be_bytes([dgram[4], dgram[5]]), IP_IDENTIFICATION);
        assert_eq!(&dgram[6..8], &[0, 0]);
        assert_eq!(dgram[8], 64);
        assert_eq!(dgram[9], 17);
        assert_eq!(&dgram[12..16], &[10, 0, 0, 1]);
        assert_eq!(&dgram[16..20], &[10, 0, 0, 2]);
        assert_eq!(&dgram[20..], b"hello");
        assert!(header_checksum_valid(&dgram[..20]));
    }

    #[test]
    fn send_writes_ahead_of_payload_in_place() {
        let ip = IpLayer::new();
        let (src, dst) = addrs();
        let mut buf = vec![0u8; 24];
        buf[20..].copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(ip.send(src, dst, IpNumber::TCP, &mut buf, 4).unwrap(), 24);
        assert_eq!(&buf[20..], &[1, 2, 3, 4]);
        assert!(matches!(ip.send(src, dst, IpNumber::TCP, &mut buf, 5), Err(NetError::InvalidArgument(_))));
    }

    #[test]
    fn recv_round_trips_and_ignores_padding() {
        let ip = IpLayer::new();
        let (src, dst) = addrs();
        let mut dgram = ip.build(src, dst, IpNumber::ICMP, &[9; 8]).unwrap();
        dgram.extend_from_slice(&[0; 18]);
        let pack = ip.recv(&dgram).unwrap();
        assert_eq!((pack.src_ip, pack.dst_ip, pack.protocol), (src, dst, IpNumber::ICMP));
        assert_eq!(pack.ttl, DEFAULT_TTL);
        assert_eq!(pack.payload, vec![9; 8]);
        assert_eq!(ip.stats().packets_received, 1);
    }

    #[test]
    fn corrupted_header_is_rejected() {
        let ip = IpLayer::new();
        let (src, dst) = addrs();
        let mut dgram = ip.build(src, dst, IpNumber::TCP, &[0; 4]).unwrap();
        dgram[15] ^= 0x01;
        assert!(matches!(ip.recv(&dgram), Err(NetError::ProtocolViolation(_))));
        assert_eq!(ip.stats().checksum_errors, 1);
    }

    #[test]
    fn short_datagrams_are_rejected() {
        let ip = IpLayer::new();
        assert!(matches!(ip.recv(&[0x45; 19]), Err(NetError::ProtocolViolation(_))));
        let (src, dst) = addrs();
        let dgram = ip.build(src, dst, IpNumber::TCP, &[0; 10]).unwrap();
        assert!(ip.recv(&dgram[..25]).is_err());
    }

    #[test]
    fn init_shutdown_guards() {
        let ip = IpLayer::new();
        ip.init().unwrap();
        assert!(matches!(ip.init(), Err(NetError::AlreadyInitialized("ip"))));
        ip.shutdown().unwrap();
        assert!(matches!(ip.shutdown(), Err(NetError::NotInitialized("ip"))));
    }
}
