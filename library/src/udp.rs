use crate::prelude::*;
use crate::utils::*;

pub const UDP_HEADER_LEN: usize = 8;

/// Builds a UDP datagram. The checksum is left zero (optional over IPv4).
pub fn encode(src_port: u16, dst_port: u16, data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Err(NetError::invalid("empty UDP payload"));
    }
    let length = u16::try_from(UDP_HEADER_LEN + data.len())
        .map_err(|_| NetError::invalid(format!("UDP payload of {} bytes is too large", data.len())))?;
    let header = UdpHeader { source_port: src_port, destination_port: dst_port, length, checksum: 0 };
    let mut datagram = Vec::with_capacity(length as usize);
    datagram.extend_from_slice(&header.to_bytes());
    datagram.extend_from_slice(data);
    Ok(datagram)
}

/// Splits a datagram into header and payload, trusting the length field over trailing bytes
pub fn decode(datagram: &[u8]) -> Result<(UdpHeader, &[u8])> {
    if datagram.len() < UDP_HEADER_LEN {
        return Err(NetError::violation(format!(
            "datagram of {} bytes is shorter than the UDP header",
            datagram.len()
        )));
    }
    let (header, _) =
        UdpHeader::from_slice(datagram).map_err(|e| NetError::violation(format!("unreadable UDP header: {e}")))?;
    let length = header.length as usize;
    if length < UDP_HEADER_LEN || length > datagram.len() {
        return Err(NetError::violation(format!(
            "UDP length {length} does not match {} received bytes",
            datagram.len()
        )));
    }
    Ok((header, &datagram[UDP_HEADER_LEN..length]))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UdpStats {
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub no_port: u64,
    pub queue_drops: u64,
}

/// Port table and per-port receive queues
#[derive(Debug)]
pub struct UdpLayer {
    init: InitFlag,
    queue_size: AtomicUsize,
    ports: Mutex<HashMap<u16, VecDeque<Datagram>>>,
    stats: Mutex<UdpStats>,
    ip_sender: Sender<PacketBasis>,
}

impl UdpLayer {
    pub fn new(ip_sender: Sender<PacketBasis>) -> UdpLayer {
        UdpLayer {
            init: InitFlag::new(),
            queue_size: AtomicUsize::new(256),
            ports: Mutex::new(HashMap::new()),
            stats: Mutex::new(UdpStats::default()),
            ip_sender,
        }
    }
    pub fn init(&self, queue_size: usize) -> Result<()> {
        self.init.raise("udp")?;
        self.queue_size.store(queue_size, Ordering::SeqCst);
        self.ports.lock().clear();
        *self.stats.lock() = UdpStats::default();
        Ok(())
    }
    pub fn shutdown(&self) -> Result<()> {
        self.init.lower("udp")?;
        self.ports.lock().clear();
        Ok(())
    }
    pub fn stats(&self) -> UdpStats {
        self.stats.lock().clone()
    }

    pub fn bind(&self, port: u16) -> Result<()> {
        self.init.check("udp")?;
        let mut ports = self.ports.lock();
        if ports.contains_key(&port) {
            return Err(NetError::invalid(format!("udp port {port} is already bound")));
        }
        ports.insert(port, VecDeque::new());
        Ok(())
    }
    pub fn unbind(&self, port: u16) -> Result<()> {
        match self.ports.lock().remove(&port) {
            Some(_) => Ok(()),
            None => Err(NetError::not_found(format!("udp port {port}"))),
        }
    }
    pub fn send(&self, src: SocketAddrV4, dst: SocketAddrV4, data: &[u8]) -> Result<usize> {
        self.init.check("udp")?;
        let datagram = encode(src.port(), dst.port(), data)?;
        queue_outbound(
            &self.ip_sender,
            PacketBasis { src_ip: *src.ip(), dst_ip: *dst.ip(), protocol: IpNumber::UDP, msg: datagram },
        )?;
        self.stats.lock().datagrams_sent += 1;
        Ok(data.len())
    }
    /// Oldest queued datagram for a bound port
    pub fn recv_from(&self, port: u16) -> Result<Option<Datagram>> {
        match self.ports.lock().get_mut(&port) {
            Some(queue) => Ok(queue.pop_front()),
            None => Err(NetError::not_found(format!("udp port {port}"))),
        }
    }
    pub fn handle_incoming(&self, pack: &Packet) -> Result<()> {
        self.init.check("udp")?;
        let (header, data) = decode(&pack.payload)?;
        let mut ports = self.ports.lock();
        let mut stats = self.stats.lock();
        stats.datagrams_received += 1;
        let Some(queue) = ports.get_mut(&header.destination_port) else {
            stats.no_port += 1;
            trace!("no udp socket on port {}, dropping", header.destination_port);
            return Ok(());
        };
        if queue.len() >= self.queue_size.load(Ordering::SeqCst) {
            stats.queue_drops += 1;
            warn!("udp port {} queue full, dropping datagram", header.destination_port);
            return Ok(());
        }
        queue.push_back(Datagram {
            src: SocketAddrV4::new(pack.src_ip, header.source_port),
            dst: SocketAddrV4::new(pack.dst_ip, header.destination_port),
            data: data.to_vec(),
        });
        Ok(())
    }
}
