use crate::prelude::*;
use crate::tcp_utils::MAX_WINDOW;

/// Capacity of each per-connection send and receive buffer (64 KiB)
pub const BUFFER_CAPACITY: usize = 65536;

pub type ByteRing = CircularBuffer<BUFFER_CAPACITY, u8>;

/// Outbound byte stream. Holds every byte from the oldest unacknowledged one (`una`) to the
/// last one the application queued; `nxt` is the offset of the first byte not yet transmitted.
#[derive(Debug)]
pub struct SendBuf {
    circ_buffer: Box<ByteRing>,
    una: u32,
    nxt: usize,
    rem_window: u16,
}

impl Default for SendBuf {
    fn default() -> Self {
        SendBuf::new()
    }
}

impl SendBuf {
    pub fn new() -> SendBuf {
        SendBuf {
            circ_buffer: ByteRing::boxed(),
            una: 0,
            nxt: 0,
            rem_window: 0,
        }
    }
    /// Our initial sequence number; the first data byte follows the SYN
    pub fn set_init_seq(&mut self, our_init_seq: u32) {
        self.una = our_init_seq.wrapping_add(1);
    }
    /// Queues all of `data` or nothing
    pub fn fill(&mut self, data: &[u8]) -> Result<usize> {
        if data.len() > self.available() {
            return Err(NetError::full("send buffer", BUFFER_CAPACITY));
        }
        self.circ_buffer.extend_from_slice(data);
        Ok(data.len())
    }
    /// Returns the next chunk to transmit (at most `max` bytes), taking into account the
    /// receiver's window and the bytes already in flight
    pub fn next_data(&mut self, max: usize) -> Option<Vec<u8>> {
        let usable = (self.rem_window as usize).saturating_sub(self.nxt);
        let amount = cmp::min(cmp::min(usable, max), self.unsent());
        if amount == 0 {
            return None;
        }
        let data: Vec<u8> = self.circ_buffer.range(self.nxt..self.nxt + amount).copied().collect();
        self.nxt += amount;
        Some(data)
    }
    /// Acknowledges (drops) all sent bytes before `most_recent_ack`. Returns how many bytes
    /// were released; old or out-of-range acks release nothing.
    pub fn ack_data(&mut self, most_recent_ack: u32) -> usize {
        let relative_ack = most_recent_ack.wrapping_sub(self.una) as usize;
        // one past nxt is our FIN
        if relative_ack > self.nxt + 1 {
            return 0;
        }
        let acked = cmp::min(relative_ack, self.nxt);
        self.circ_buffer.drain(..acked);
        self.nxt -= acked;
        self.una = self.una.wrapping_add(acked as u32);
        acked
    }
    ///Updates the SendBuf's internal tracker of how many bytes the receiver will take
    pub fn update_window(&mut self, new_window: u16) {
        self.rem_window = new_window;
    }
    pub fn una(&self) -> u32 {
        self.una
    }
    pub fn in_flight(&self) -> usize {
        self.nxt
    }
    pub fn unsent(&self) -> usize {
        self.circ_buffer.len() - self.nxt
    }
    pub fn used(&self) -> usize {
        self.circ_buffer.len()
    }
    pub fn available(&self) -> usize {
        self.circ_buffer.capacity() - self.circ_buffer.len()
    }
    pub fn capacity(&self) -> usize {
        self.circ_buffer.capacity()
    }
    pub fn remote_window(&self) -> u16 {
        self.rem_window
    }
}

/// Inbound byte stream with reassembly of segments that arrive ahead of `rcv_nxt`
#[derive(Debug)]
pub struct RecvBuf {
    circ_buffer: Box<ByteRing>,
    early_arrivals: PayloadMap,
    rcv_nxt: u32,
    fin_seq: Option<u32>,
}

impl Default for RecvBuf {
    fn default() -> Self {
        RecvBuf::new()
    }
}

impl RecvBuf {
    pub fn new() -> RecvBuf {
        RecvBuf {
            circ_buffer: ByteRing::boxed(),
            early_arrivals: PayloadMap::new(),
            rcv_nxt: 0,
            fin_seq: None,
        }
    }
    /// Remote initial sequence number, taken from its SYN
    pub fn set_init_seq(&mut self, rem_init_seq: u32) {
        self.rcv_nxt = rem_init_seq.wrapping_add(1);
    }
    /// Copies up to `out.len()` in-order bytes out of the buffer
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let amount = cmp::min(out.len(), self.circ_buffer.len());
        for (slot, byte) in out.iter_mut().zip(self.circ_buffer.drain(..amount)) {
            *slot = byte;
        }
        amount
    }

    ///Adds the segment to the buffer if it starts at (or overlaps) the next expected byte,
    ///otherwise parks it with the early arrivals. Whenever data is added the early arrivals
    ///are checked for the following segment. Returns the next expected sequence number.
    pub fn add(&mut self, seq_num: u32, data: &[u8]) -> u32 {
        let offset = seq_num.wrapping_sub(self.rcv_nxt) as i32;
        if offset > 0 {
            if offset as usize + data.len() <= self.window() as usize {
                self.early_arrivals.insert(seq_num, data.to_vec());
            } else {
                trace!("dropping early segment {seq_num} beyond the window");
            }
            return self.rcv_nxt;
        }
        self.append_from(offset.unsigned_abs() as usize, data);
        while let Some((seq, next)) = self.early_arrivals.take_ready(self.rcv_nxt) {
            let skip = self.rcv_nxt.wrapping_sub(seq) as usize;
            self.append_from(skip, &next);
        }
        self.rcv_nxt
    }
    fn append_from(&mut self, skip: usize, data: &[u8]) {
        if skip >= data.len() {
            return; // stale
        }
        let room = self.circ_buffer.capacity() - self.circ_buffer.len();
        let fresh = &data[skip..];
        let fresh = &fresh[..cmp::min(fresh.len(), room)];
        self.circ_buffer.extend_from_slice(fresh);
        self.rcv_nxt = self.rcv_nxt.wrapping_add(fresh.len() as u32);
    }
    /// Records where the peer's FIN sits in sequence space
    pub fn set_fin(&mut self, fin_seq: u32) {
        self.fin_seq = Some(fin_seq);
    }
    /// Consumes the FIN once every byte before it has arrived. True exactly once.
    pub fn take_fin(&mut self) -> bool {
        match self.fin_seq {
            Some(seq) if seq == self.rcv_nxt => {
                self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
                self.fin_seq = None;
                true
            }
            _ => false,
        }
    }
    ///Returns the next expected sequence number
    pub fn expected_seq(&self) -> u32 {
        self.rcv_nxt
    }
    ///Returns the buffer's current window size
    pub fn window(&self) -> u16 {
        let free = (self.circ_buffer.capacity() - self.circ_buffer.len()).saturating_sub(self.early_arrivals.len());
        cmp::min(free, MAX_WINDOW as usize) as u16
    }
    pub fn used(&self) -> usize {
        self.circ_buffer.len()
    }
    pub fn capacity(&self) -> usize {
        self.circ_buffer.capacity()
    }
}

//A wrapper for a HashMap<u32, Vec<u8>> that keeps track of the cumulative size of the data stored in the map
#[derive(Debug, Default)]
struct PayloadMap {
    hash_map: HashMap<u32, Vec<u8>>,
    size: usize,
}

impl PayloadMap {
    fn new() -> PayloadMap {
        PayloadMap::default()
    }
    fn insert(&mut self, key: u32, val: Vec<u8>) {
        self.size += val.len();
        if let Some(old) = self.hash_map.insert(key, val) {
            self.size -= old.len();
        }
    }
    /// Removes a segment that starts at or before `rcv_nxt`
    fn take_ready(&mut self, rcv_nxt: u32) -> Option<(u32, Vec<u8>)> {
        let key = *self
            .hash_map
            .keys()
            .find(|seq| rcv_nxt.wrapping_sub(**seq) as i32 >= 0)?;
        let payload = self.hash_map.remove(&key)?;
        self.size -= payload.len();
        Some((key, payload))
    }
    fn len(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_is_all_or_nothing() {
        let mut buf = SendBuf::new();
        buf.fill(&vec![1; BUFFER_CAPACITY - 10]).unwrap();
        assert!(matches!(buf.fill(&[0; 11]), Err(NetError::ResourceExhausted { .. })));
        assert_eq!(buf.used(), BUFFER_CAPACITY - 10);
        assert_eq!(buf.fill(&[0; 10]).unwrap(), 10);
        assert_eq!(buf.available(), 0);
    }

    #[test]
    fn next_data_respects_window_and_mss() {
        let mut buf = SendBuf::new();
        buf.set_init_seq(100);
        buf.fill(&[7; 5000]).unwrap();
        assert!(buf.next_data(1460).is_none());
        buf.update_window(2000);
        assert_eq!(buf.next_data(1460).unwrap().len(), 1460);
        assert_eq!(buf.next_data(1460).unwrap().len(), 540);
        assert!(buf.next_data(1460).is_none());
        assert_eq!(buf.in_flight(), 2000);
    }

    #[test]
    fn acks_release_space() {
        let mut buf = SendBuf::new();
        buf.set_init_seq(u32::MAX - 2);
        buf.update_window(65535);
        buf.fill(b"hello world").unwrap();
        buf.next_data(1460).unwrap();
        assert_eq!(buf.una(), u32::MAX - 1);
        // wraps through zero
        assert_eq!(buf.ack_data(3), 5);
        assert_eq!(buf.used(), 6);
        assert_eq!(buf.ack_data(2), 0);
        assert_eq!(buf.ack_data(9), 6);
        assert_eq!(buf.used(), 0);
        assert_eq!(buf.ack_data(1000), 0);
    }

    #[test]
    fn in_order_and_early_segments_reassemble() {
        let mut buf = RecvBuf::new();
        buf.set_init_seq(999);
        assert_eq!(buf.add(1006, b"world"), 1000);
        assert_eq!(buf.window() as usize, BUFFER_CAPACITY - 5);
        assert_eq!(buf.add(1000, b"hello "), 1011);
        let mut out = [0u8; 32];
        let n = buf.read(&mut out);
        assert_eq!(&out[..n], b"hello world");
        assert_eq!(buf.used(), 0);
    }

    #[test]
    fn overlapping_and_stale_segments_are_trimmed() {
        let mut buf = RecvBuf::new();
        buf.set_init_seq(0);
        buf.add(1, b"abcd");
        assert_eq!(buf.add(3, b"cdef"), 7);
        assert_eq!(buf.add(1, b"ab"), 7);
        let mut out = [0u8; 3];
        assert_eq!(buf.read(&mut out), 3);
        assert_eq!(&out, b"abc");
        let mut rest = [0u8; 8];
        assert_eq!(buf.read(&mut rest), 3);
        assert_eq!(&rest[..3], b"def");
    }

    #[test]
    fn fin_is_taken_after_preceding_data() {
        let mut buf = RecvBuf::new();
        buf.set_init_seq(10);
        buf.set_fin(14);
        assert!(!buf.take_fin());
        buf.add(11, b"abc");
        assert!(buf.take_fin());
        assert_eq!(buf.expected_seq(), 15);
        assert!(!buf.take_fin());
    }
}
