use crate::prelude::*;
use crate::utils::*;

pub const ICMP_HEADER_LEN: usize = 8;
pub const ECHO_REPLY: u8 = 0;
pub const DEST_UNREACHABLE: u8 = 3;
pub const ECHO_REQUEST: u8 = 8;
pub const TIME_EXCEEDED: u8 = 11;

pub const PING_IDENTIFIER: u16 = 0x1234;
pub const PING_PAYLOAD_LEN: usize = 64;
pub const PING_FILL: u8 = 0xAA;
const MAX_KEPT_REPLIES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpMessage {
    pub icmp_type: u8,
    pub code: u8,
    pub identifier: u16,
    pub sequence: u16,
    pub data: Vec<u8>,
}

impl IcmpMessage {
    pub fn new(icmp_type: u8, code: u8, data: &[u8]) -> IcmpMessage {
        IcmpMessage { icmp_type, code, identifier: PING_IDENTIFIER, sequence: 1, data: data.to_vec() }
    }
    /// Header plus data, checksum computed over both
    pub fn encode(&self) -> Vec<u8> {
        let mut msg = Vec::with_capacity(ICMP_HEADER_LEN + self.data.len());
        msg.push(self.icmp_type);
        msg.push(self.code);
        msg.extend_from_slice(&[0, 0]);
        msg.extend_from_slice(&self.identifier.to_be_bytes());
        msg.extend_from_slice(&self.sequence.to_be_bytes());
        msg.extend_from_slice(&self.data);
        let sum = checksum(&msg);
        msg[2..4].copy_from_slice(&sum.to_be_bytes());
        msg
    }
    pub fn decode(msg: &[u8]) -> Result<IcmpMessage> {
        if msg.len() < ICMP_HEADER_LEN {
            return Err(NetError::violation(format!("ICMP message of {} bytes is too short", msg.len())));
        }
        let stored = u16::from_be_bytes([msg[2], msg[3]]);
        let mut scratch = msg.to_vec();
        scratch[2..4].copy_from_slice(&[0, 0]);
        if checksum(&scratch) != stored {
            return Err(NetError::violation("ICMP checksum mismatch"));
        }
        Ok(IcmpMessage {
            icmp_type: msg[0],
            code: msg[1],
            identifier: u16::from_be_bytes([msg[4], msg[5]]),
            sequence: u16::from_be_bytes([msg[6], msg[7]]),
            data: msg[ICMP_HEADER_LEN..].to_vec(),
        })
    }
}

/// An echo reply that answered one of our pings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoReply {
    pub from: Ipv4Addr,
    pub identifier: u16,
    pub sequence: u16,
    pub data_len: usize,
    pub received_at: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IcmpStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub echo_requests_answered: u64,
    pub checksum_errors: u64,
}

#[derive(Debug)]
pub struct IcmpLayer {
    init: InitFlag,
    next_sequence: AtomicU32,
    replies: Mutex<VecDeque<EchoReply>>,
    stats: Mutex<IcmpStats>,
    ip_sender: Sender<PacketBasis>,
}

impl IcmpLayer {
    pub fn new(ip_sender: Sender<PacketBasis>) -> IcmpLayer {
        IcmpLayer {
            init: InitFlag::new(),
            next_sequence: AtomicU32::new(1),
            replies: Mutex::new(VecDeque::new()),
            stats: Mutex::new(IcmpStats::default()),
            ip_sender,
        }
    }
    pub fn init(&self) -> Result<()> {
        self.init.raise("icmp")?;
        self.next_sequence.store(1, Ordering::SeqCst);
        self.replies.lock().clear();
        *self.stats.lock() = IcmpStats::default();
        Ok(())
    }
    pub fn shutdown(&self) -> Result<()> {
        self.init.lower("icmp")?;
        self.replies.lock().clear();
        Ok(())
    }
    pub fn stats(&self) -> IcmpStats {
        self.stats.lock().clone()
    }

    pub fn send(&self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr, msg: &IcmpMessage) -> Result<()> {
        self.init.check("icmp")?;
        queue_outbound(
            &self.ip_sender,
            PacketBasis { src_ip, dst_ip, protocol: IpNumber::ICMP, msg: msg.encode() },
        )?;
        self.stats.lock().messages_sent += 1;
        Ok(())
    }
    /// Sends an echo request carrying 64 bytes of 0xAA and returns its sequence number
    pub fn ping(&self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> Result<u16> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst) as u16;
        let msg = IcmpMessage { sequence, ..IcmpMessage::new(ECHO_REQUEST, 0, &[PING_FILL; PING_PAYLOAD_LEN]) };
        self.send(src_ip, dst_ip, &msg)?;
        debug!("ping {dst_ip} seq {sequence}");
        Ok(sequence)
    }
    /// Answers echo requests and records echo replies
    pub fn handle_incoming(&self, pack: &Packet) -> Result<()> {
        self.init.check("icmp")?;
        let msg = IcmpMessage::decode(&pack.payload).map_err(|e| {
            self.stats.lock().checksum_errors += 1;
            e
        })?;
        self.stats.lock().messages_received += 1;
        match msg.icmp_type {
            ECHO_REQUEST => {
                let reply = IcmpMessage { icmp_type: ECHO_REPLY, code: 0, ..msg };
                self.send(pack.dst_ip, pack.src_ip, &reply)?;
                self.stats.lock().echo_requests_answered += 1;
            }
            ECHO_REPLY => {
                info!("echo reply from {} seq {} ({} bytes)", pack.src_ip, msg.sequence, msg.data.len());
                let mut replies = self.replies.lock();
                if replies.len() >= MAX_KEPT_REPLIES {
                    replies.pop_front();
                }
                replies.push_back(EchoReply {
                    from: pack.src_ip,
                    identifier: msg.identifier,
                    sequence: msg.sequence,
                    data_len: msg.data.len(),
                    received_at: timestamp(),
                });
            }
            other => debug!("icmp type {other} code {} from {}", msg.code, pack.src_ip),
        }
        Ok(())
    }
    pub fn take_replies(&self) -> Vec<EchoReply> {
        self.replies.lock().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_request_wire_layout() {
        let msg = IcmpMessage::new(ECHO_REQUEST, 0, &[PING_FILL; PING_PAYLOAD_LEN]);
        let bytes = msg.encode();
        assert_eq!(bytes.len(), 72);
        assert_eq!(&bytes[..2], &[8, 0]);
        assert_eq!(&bytes[4..8], &[0x12, 0x34, 0x00, 0x01]);
        assert!(bytes[8..].iter().all(|b| *b == 0xAA));
        // a correct checksum makes the whole message sum to zero
        assert_eq!(checksum(&bytes), 0);
        assert_eq!(IcmpMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn corrupt_messages_are_rejected() {
        let mut bytes = IcmpMessage::new(ECHO_REQUEST, 0, b"x").encode();
        bytes[8] ^= 1;
        assert!(matches!(IcmpMessage::decode(&bytes), Err(NetError::ProtocolViolation(_))));
        assert!(IcmpMessage::decode(&[8, 0, 0]).is_err());
    }

    #[test]
    fn requests_are_answered_and_replies_kept() {
        let (tx, rx) = channel();
        let icmp = IcmpLayer::new(tx);
        icmp.init().unwrap();
        let (a, b) = (Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(icmp.ping(a, b).unwrap(), 1);
        let request = rx.try_recv().unwrap();
        icmp.handle_incoming(&Packet { src_ip: a, dst_ip: b, protocol: IpNumber::ICMP, ttl: 64, payload: request.msg })
            .unwrap();
        let reply = rx.try_recv().unwrap();
        assert_eq!((reply.src_ip, reply.dst_ip), (b, a));
        icmp.handle_incoming(&Packet { src_ip: b, dst_ip: a, protocol: IpNumber::ICMP, ttl: 64, payload: reply.msg })
            .unwrap();
        let replies = icmp.take_replies();
        assert_eq!(replies.len(), 1);
        assert_eq!((replies[0].from, replies[0].sequence, replies[0].data_len), (b, 1, 64));
        assert!(icmp.take_replies().is_empty());
    }
}
