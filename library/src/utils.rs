use crate::prelude::*;
use std::sync::OnceLock;

pub const IPV4_HEADER_LEN: usize = 20;

/// Data a transport layer hands down so the stack can wrap it in IPv4 and route it
#[derive(Debug, Clone, PartialEq)]
pub struct PacketBasis {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub protocol: IpNumber,
    pub msg: Vec<u8>,
}

/// A received IPv4 datagram after header validation
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub protocol: IpNumber,
    pub ttl: u8,
    pub payload: Vec<u8>,
}

/// 16-bit one's-complement Internet checksum.
///
/// Words are read big-endian, a trailing odd byte counts as `byte << 8`, carries are folded
/// back in and the complement is returned. Store the result with `to_be_bytes`.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u64 = 0;
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u16::from_be_bytes([word[0], word[1]]) as u64;
    }
    if let [last] = words.remainder() {
        sum += (*last as u64) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Monotonic timestamp in microseconds since the stack first asked for the time.
/// Successive calls never return the same value.
pub fn timestamp() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    static LAST: AtomicU64 = AtomicU64::new(0);

    let now = START.get_or_init(Instant::now).elapsed().as_micros() as u64;
    let mut last = LAST.load(Ordering::Relaxed);
    loop {
        let next = cmp::max(now, last + 1);
        match LAST.compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// Per-subsystem "initialized" flag guarding an init/shutdown pair
#[derive(Debug, Default)]
pub struct InitFlag(AtomicBool);

impl InitFlag {
    pub fn new() -> InitFlag {
        InitFlag(AtomicBool::new(false))
    }
    /// Raises the flag, failing if it was already up
    pub fn raise(&self, subsystem: &'static str) -> Result<()> {
        if self.0.swap(true, Ordering::SeqCst) {
            return Err(NetError::AlreadyInitialized(subsystem));
        }
        Ok(())
    }
    /// Lowers the flag, failing if it was already down
    pub fn lower(&self, subsystem: &'static str) -> Result<()> {
        if !self.0.swap(false, Ordering::SeqCst) {
            return Err(NetError::NotInitialized(subsystem));
        }
        Ok(())
    }
    pub fn check(&self, subsystem: &'static str) -> Result<()> {
        match self.is_set() {
            true => Ok(()),
            false => Err(NetError::NotInitialized(subsystem)),
        }
    }
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Hands a transport segment to the outbound queue
pub fn queue_outbound(sender: &Sender<PacketBasis>, pb: PacketBasis) -> Result<()> {
    sender
        .send(pb)
        .map_err(|_| NetError::Disconnected("outbound queue"))
}

/// Converts a dotted netmask into a prefix length, rejecting non-contiguous masks
pub fn mask_to_prefix(mask: Ipv4Addr) -> Result<u8> {
    let bits = u32::from(mask);
    let prefix = bits.leading_ones();
    if bits.checked_shl(prefix).unwrap_or(0) != 0 {
        return Err(NetError::invalid(format!("non-contiguous netmask {mask}")));
    }
    Ok(prefix as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_two_words() {
        let sum = checksum(&[0x00, 0x01, 0x00, 0x02]);
        assert_eq!(sum, 0xFFFC);
        assert_eq!(sum.to_be_bytes(), [0xFF, 0xFC]);
    }

    #[test]
    fn checksum_pads_odd_byte_on_the_right() {
        assert_eq!(checksum(&[0x01]), !0x0100);
        assert_eq!(checksum(&[0x00, 0x01, 0x02]), !(0x0001u16 + 0x0200));
    }

    #[test]
    fn checksum_folds_carries() {
        // 0xFFFF + 0x0001 = 0x10000 -> folds to 0x0001
        assert_eq!(checksum(&[0xFF, 0xFF, 0x00, 0x01]), !0x0001);
    }

    #[test]
    fn timestamps_strictly_increase() {
        let a = timestamp();
        let b = timestamp();
        let c = timestamp();
        assert!(a < b && b < c);
    }

    #[test]
    fn init_flag_guards_both_directions() {
        let flag = InitFlag::new();
        assert!(matches!(flag.lower("x"), Err(NetError::NotInitialized("x"))));
        flag.raise("x").unwrap();
        assert!(matches!(flag.raise("x"), Err(NetError::AlreadyInitialized("x"))));
        flag.lower("x").unwrap();
        assert!(!flag.is_set());
    }

    #[test]
    fn netmask_prefixes() {
        assert_eq!(mask_to_prefix(Ipv4Addr::new(255, 255, 255, 0)).unwrap(), 24);
        assert_eq!(mask_to_prefix(Ipv4Addr::new(0, 0, 0, 0)).unwrap(), 0);
        assert_eq!(mask_to_prefix(Ipv4Addr::new(255, 255, 255, 255)).unwrap(), 32);
        assert!(mask_to_prefix(Ipv4Addr::new(255, 0, 255, 0)).is_err());
    }
}
