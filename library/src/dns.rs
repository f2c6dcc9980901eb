use crate::prelude::*;
use crate::utils::*;

pub const DNS_HEADER_LEN: usize = 12;
pub const DNS_PORT: u16 = 53;
pub const QUERY_ID: u16 = 0x1234;
/// Standard query, recursion desired
pub const QUERY_FLAGS: u16 = 0x0100;
pub const CLASS_IN: u16 = 1;
const MAX_NAME_LEN: usize = 255;
const MAX_LABEL_LEN: usize = 63;
const MAX_POINTER_JUMPS: usize = 16;

// Record types
pub const TYPE_A: u16 = 1;
pub const TYPE_NS: u16 = 2;
pub const TYPE_CNAME: u16 = 5;
pub const TYPE_SOA: u16 = 6;
pub const TYPE_PTR: u16 = 12;
pub const TYPE_MX: u16 = 15;
pub const TYPE_TXT: u16 = 16;
pub const TYPE_AAAA: u16 = 28;
pub const TYPE_SRV: u16 = 33;
pub const TYPE_NAPTR: u16 = 35;
pub const TYPE_OPT: u16 = 41;
pub const TYPE_DS: u16 = 43;
pub const TYPE_RRSIG: u16 = 46;
pub const TYPE_NSEC: u16 = 47;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DnsHeader {
    pub id: u16,
    pub flags: u16,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl DnsHeader {
    fn to_bytes(self) -> [u8; DNS_HEADER_LEN] {
        let mut out = [0u8; DNS_HEADER_LEN];
        let fields = [self.id, self.flags, self.qdcount, self.ancount, self.nscount, self.arcount];
        for (slot, field) in out.chunks_exact_mut(2).zip(fields) {
            slot.copy_from_slice(&field.to_be_bytes());
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: String,
    pub rtype: u16,
    pub rclass: u16,
    pub ttl: u32,
    pub data: Vec<u8>,
}

impl DnsRecord {
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        match (self.rtype, self.data.as_slice()) {
            (TYPE_A, &[a, b, c, d]) => Some(Ipv4Addr::new(a, b, c, d)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsMessage {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
}

fn encode_name(name: &str, out: &mut Vec<u8>) -> Result<()> {
    let name = name.trim_end_matches('.');
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(NetError::invalid(format!("bad domain name {name:?}")));
    }
    for label in name.split('.') {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(NetError::invalid(format!("bad label {label:?} in {name:?}")));
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    Ok(())
}

/// A one-question query with the fixed ID and the recursion-desired flag
pub fn encode_query(name: &str, qtype: u16) -> Result<Vec<u8>> {
    let header = DnsHeader { id: QUERY_ID, flags: QUERY_FLAGS, qdcount: 1, ..Default::default() };
    let mut out = header.to_bytes().to_vec();
    encode_name(name, &mut out)?;
    out.extend_from_slice(&qtype.to_be_bytes());
    out.extend_from_slice(&CLASS_IN.to_be_bytes());
    Ok(out)
}

struct Reader<'a> {
    msg: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let bytes = self
            .msg
            .get(self.pos..self.pos + n)
            .ok_or_else(|| NetError::violation(format!("DNS message truncated at offset {}", self.pos)))?;
        self.pos += n;
        Ok(bytes)
    }
    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }
    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
    /// Reads a possibly compressed name; the cursor ends after its first pointer or terminator
    fn name(&mut self) -> Result<String> {
        let mut labels: Vec<String> = Vec::new();
        let mut at = self.pos;
        let mut resume = None;
        let mut jumps = 0;
        loop {
            let len = *self
                .msg
                .get(at)
                .ok_or_else(|| NetError::violation("DNS name runs past the message"))? as usize;
            match len {
                0 => {
                    at += 1;
                    break;
                }
                l if l & 0xC0 == 0xC0 => {
                    let low = *self
                        .msg
                        .get(at + 1)
                        .ok_or_else(|| NetError::violation("truncated DNS compression pointer"))?;
                    jumps += 1;
                    if jumps > MAX_POINTER_JUMPS {
                        return Err(NetError::violation("DNS compression pointer loop"));
                    }
                    resume.get_or_insert(at + 2);
                    at = ((l & 0x3F) << 8) | low as usize;
                }
                l if l <= MAX_LABEL_LEN => {
                    let label = self
                        .msg
                        .get(at + 1..at + 1 + l)
                        .ok_or_else(|| NetError::violation("DNS label runs past the message"))?;
                    labels.push(String::from_utf8_lossy(label).into_owned());
                    at += 1 + l;
                }
                l => return Err(NetError::violation(format!("bad DNS label length {l:#x}"))),
            }
        }
        self.pos = resume.unwrap_or(at);
        Ok(labels.join("."))
    }
}

/// Decodes the header, the question section and the answer section
pub fn parse_response(msg: &[u8]) -> Result<DnsMessage> {
    if msg.len() < DNS_HEADER_LEN {
        return Err(NetError::violation(format!("{} byte DNS message is shorter than its header", msg.len())));
    }
    let mut r = Reader { msg, pos: 0 };
    let header = DnsHeader {
        id: r.u16()?,
        flags: r.u16()?,
        qdcount: r.u16()?,
        ancount: r.u16()?,
        nscount: r.u16()?,
        arcount: r.u16()?,
    };
    let mut questions = Vec::with_capacity(header.qdcount as usize);
    for _ in 0..header.qdcount {
        questions.push(DnsQuestion { name: r.name()?, qtype: r.u16()?, qclass: r.u16()? });
    }
    let mut answers = Vec::with_capacity(header.ancount as usize);
    for _ in 0..header.ancount {
        let name = r.name()?;
        let (rtype, rclass, ttl) = (r.u16()?, r.u16()?, r.u32()?);
        let rdlen = r.u16()? as usize;
        let data = r.take(rdlen)?.to_vec();
        answers.push(DnsRecord { name, rtype, rclass, ttl, data });
    }
    Ok(DnsMessage { header, questions, answers })
}

/// Holds the resolver's server and query counter. Resolution itself is not performed.
#[derive(Debug, Default)]
pub struct DnsResolver {
    init: InitFlag,
    server: RwLock<Option<Ipv4Addr>>,
    queries: AtomicU64,
}

impl DnsResolver {
    pub fn new() -> DnsResolver {
        DnsResolver::default()
    }
    pub fn init(&self) -> Result<()> {
        self.init.raise("dns")?;
        self.queries.store(0, Ordering::Relaxed);
        info!("dns resolver initialized");
        Ok(())
    }
    pub fn shutdown(&self) -> Result<()> {
        self.init.lower("dns")
    }
    pub fn set_server(&self, server: Ipv4Addr) {
        *self.server.write() = Some(server);
    }
    pub fn server(&self) -> Option<Ipv4Addr> {
        *self.server.read()
    }
    /// Builds the query for `name` and returns no records
    pub fn resolve(&self, name: &str, qtype: u16) -> Result<Vec<DnsRecord>> {
        self.init.check("dns")?;
        let query = encode_query(name, qtype)?;
        self.queries.fetch_add(1, Ordering::Relaxed);
        debug!("dns resolve {name} (type {qtype}): {} byte query, no resolver attached", query.len());
        Ok(Vec::new())
    }
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }
}
