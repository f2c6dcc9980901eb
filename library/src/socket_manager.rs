use crate::conn_socket::{ConnInfo, TcpConnection};
use crate::prelude::*;
use crate::tcp_utils::*;
use crate::utils::*;

pub type SocketId = u32;
pub type SocketTable = HashMap<SocketId, SocketEntry>;

const EPHEMERAL_PORTS: std::ops::RangeInclusive<u16> = 49152..=65535;

#[derive(Debug)]
pub enum SocketEntry {
    Connection(TcpConnection),
    Listener(ListenerEntry),
}

#[derive(Debug)]
pub struct ListenerEntry {
    pub local: TcpAddress, // ip 0.0.0.0 accepts on every local address
    pub backlog: usize,
    pub pending_connections: VecDeque<SocketId>, // children not yet handed out by accept
}

impl ListenerEntry {
    pub fn new(local: TcpAddress, backlog: usize) -> ListenerEntry {
        ListenerEntry { local, backlog, pending_connections: VecDeque::new() }
    }
    fn wants(&self, dst: TcpAddress) -> bool {
        self.local.port == dst.port && (self.local.ip.is_unspecified() || self.local.ip == dst.ip)
    }
}

/// One row of the socket listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketSummary {
    pub id: SocketId,
    pub local: TcpAddress,
    pub remote: Option<TcpAddress>,
    pub state: TcpState,
}

/// Byte-stream transport the framing protocols write through
pub trait ByteStream {
    fn send(&self, conn: SocketId, data: &[u8]) -> Result<usize>;
    fn recv(&self, conn: SocketId, buf: &mut [u8]) -> Result<usize>;
}

/// Owns every TCP socket. Segments produced by any connection go out through `ip_sender`.
#[derive(Debug)]
pub struct SocketManager {
    init: InitFlag,
    max_sockets: AtomicUsize,
    config: RwLock<TcpConfig>,
    socket_table: Mutex<SocketTable>,
    next_sid: AtomicU32,
    ip_sender: Sender<PacketBasis>,
}

impl SocketManager {
    pub fn new(ip_sender: Sender<PacketBasis>) -> SocketManager {
        SocketManager {
            init: InitFlag::new(),
            max_sockets: AtomicUsize::new(TcpConfig::default().max_connections),
            config: RwLock::new(TcpConfig::default()),
            socket_table: Mutex::new(HashMap::new()),
            next_sid: AtomicU32::new(0),
            ip_sender,
        }
    }
    pub fn init(&self, max_sockets: usize) -> Result<()> {
        self.init.raise("tcp")?;
        self.max_sockets.store(max_sockets, Ordering::SeqCst);
        self.socket_table.lock().clear();
        debug!("tcp initialized, {max_sockets} sockets max");
        Ok(())
    }
    /// Drops every socket without sending anything
    pub fn shutdown(&self) -> Result<()> {
        self.init.lower("tcp")?;
        self.socket_table.lock().clear();
        Ok(())
    }
    pub fn config(&self) -> TcpConfig {
        self.config.read().clone()
    }
    pub fn set_config(&self, config: TcpConfig) {
        *self.config.write() = config;
    }

    /// Opens a connection from `local` to `remote` and sends the SYN
    pub fn connect(&self, local_ip: Ipv4Addr, local_port: u16, remote_ip: Ipv4Addr, remote_port: u16) -> Result<SocketId> {
        self.open(TcpAddress::new(local_ip, local_port), TcpAddress::new(remote_ip, remote_port), MSS)
    }
    /// `connect` from a random unused port in the ephemeral range, with segments limited to `mss`
    pub fn connect_ephemeral(&self, local_ip: Ipv4Addr, remote_ip: Ipv4Addr, remote_port: u16, mss: usize) -> Result<SocketId> {
        let port = self.unused_port(local_ip)?;
        self.open(TcpAddress::new(local_ip, port), TcpAddress::new(remote_ip, remote_port), mss)
    }
    fn open(&self, local: TcpAddress, remote: TcpAddress, mss: usize) -> Result<SocketId> {
        self.init.check("tcp")?;
        let mut socket_table = self.socket_table.lock();
        self.check_capacity(&socket_table)?;
        if find_connection(&socket_table, local, remote).is_some() {
            return Err(NetError::invalid(format!("{local} -> {remote} is already in use")));
        }
        let mut conn = TcpConnection::new(local, remote, self.config.read().congestion_control, self.ip_sender.clone());
        conn.set_mss(mss);
        conn.first_syn()?;
        let sid = self.insert(&mut socket_table, SocketEntry::Connection(conn));
        info!("socket {sid}: connecting {local} -> {remote}");
        Ok(sid)
    }
    /// Creates a listener socket in LISTEN
    pub fn listen(&self, local_ip: Ipv4Addr, local_port: u16, backlog: usize) -> Result<SocketId> {
        self.init.check("tcp")?;
        if backlog == 0 {
            return Err(NetError::invalid("listen backlog must be positive"));
        }
        let local = TcpAddress::new(local_ip, local_port);
        let mut socket_table = self.socket_table.lock();
        self.check_capacity(&socket_table)?;
        let taken = socket_table.values().any(|ent| match ent {
            SocketEntry::Listener(l) => l.local == local,
            SocketEntry::Connection(_) => false,
        });
        if taken {
            return Err(NetError::invalid(format!("already listening on {local}")));
        }
        let backlog = cmp::min(backlog, self.config.read().max_syn_backlog);
        let sid = self.insert(&mut socket_table, SocketEntry::Listener(ListenerEntry::new(local, backlog)));
        info!("socket {sid}: listening on {local}");
        Ok(sid)
    }
    /// Hands out the oldest fully established connection of a listener, if any
    pub fn accept(&self, listener: SocketId) -> Result<Option<SocketId>> {
        let mut socket_table = self.socket_table.lock();
        let pending: Vec<SocketId> = match socket_table.get(&listener) {
            Some(SocketEntry::Listener(ent)) => ent.pending_connections.iter().copied().collect(),
            Some(SocketEntry::Connection(conn)) => {
                return Err(NetError::state(format!("accept on socket {listener} in {}", conn.state())));
            }
            None => return Err(NetError::not_found(format!("socket {listener}"))),
        };
        let ready = pending.into_iter().find(|sid| match socket_table.get(sid) {
            Some(SocketEntry::Connection(conn)) => !matches!(conn.state(), TcpState::SynReceived),
            _ => false,
        });
        if let (Some(sid), Some(SocketEntry::Listener(ent))) = (ready, socket_table.get_mut(&listener)) {
            ent.pending_connections.retain(|p| *p != sid);
            debug!("socket {listener}: accepted {sid}");
        }
        Ok(ready)
    }
    pub fn send(&self, sid: SocketId, data: &[u8]) -> Result<usize> {
        self.with_connection(sid, |conn| conn.send(data))
    }
    pub fn recv(&self, sid: SocketId, buf: &mut [u8]) -> Result<usize> {
        self.with_connection(sid, |conn| conn.recv(buf))
    }
    /// Sends FIN once queued data is out
    pub fn shutdown_write(&self, sid: SocketId) -> Result<()> {
        self.with_connection(sid, |conn| conn.shutdown_write())
    }
    /// Removes the socket and frees its buffers. Closing a listener drops its unaccepted children.
    pub fn close(&self, sid: SocketId) -> Result<()> {
        let mut socket_table = self.socket_table.lock();
        if !remove_socket(&mut socket_table, sid) {
            return Err(NetError::not_found(format!("socket {sid}")));
        }
        debug!("socket {sid} closed");
        Ok(())
    }
    /// Drops connections that finished on their own (reset, LAST_ACK acknowledged, TIME_WAIT).
    /// Returns how many were removed.
    pub fn reap_finished(&self) -> usize {
        let mut socket_table = self.socket_table.lock();
        let finished: Vec<SocketId> = socket_table
            .iter()
            .filter_map(|(sid, ent)| match ent {
                SocketEntry::Connection(conn) if matches!(conn.state(), TcpState::Closed | TcpState::TimeWait) => Some(*sid),
                _ => None,
            })
            .collect();
        for sid in &finished {
            remove_socket(&mut socket_table, *sid);
            debug!("socket {sid} finished, removed");
        }
        finished.len()
    }
    pub fn set_congestion_control(&self, sid: SocketId, algorithm: CongestionControl) -> Result<()> {
        self.with_connection(sid, |conn| {
            conn.set_congestion_control(algorithm);
            Ok(())
        })
    }
    /// CLOSED for sockets that do not exist
    pub fn state(&self, sid: SocketId) -> TcpState {
        match self.socket_table.lock().get(&sid) {
            Some(SocketEntry::Connection(conn)) => conn.state(),
            Some(SocketEntry::Listener(_)) => TcpState::Listen,
            None => TcpState::Closed,
        }
    }
    pub fn info(&self, sid: SocketId) -> Result<ConnInfo> {
        self.with_connection(sid, |conn| Ok(conn.info()))
    }
    pub fn list(&self) -> Vec<SocketSummary> {
        let socket_table = self.socket_table.lock();
        let mut rows: Vec<SocketSummary> = socket_table
            .iter()
            .map(|(id, ent)| match ent {
                SocketEntry::Connection(conn) => SocketSummary {
                    id: *id,
                    local: conn.local(),
                    remote: Some(conn.remote()),
                    state: conn.state(),
                },
                SocketEntry::Listener(l) => SocketSummary { id: *id, local: l.local, remote: None, state: TcpState::Listen },
            })
            .collect();
        rows.sort_by_key(|row| row.id);
        rows
    }
    pub fn len(&self) -> usize {
        self.socket_table.lock().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Number of sockets that are connections (listeners excluded)
    pub fn connection_count(&self) -> usize {
        self.socket_table
            .lock()
            .values()
            .filter(|ent| matches!(ent, SocketEntry::Connection(_)))
            .count()
    }

    /// Routes an inbound segment to its connection, or to a listener when it opens a new one.
    /// Segments nobody wants are dropped.
    pub fn handle_incoming(&self, pack: &Packet) -> Result<()> {
        self.handle_incoming_with_mss(pack, MSS)
    }
    /// `handle_incoming` where connections a listener spawns send at most `mss` bytes per segment
    pub fn handle_incoming_with_mss(&self, pack: &Packet, mss: usize) -> Result<()> {
        self.init.check("tcp")?;
        if pack.protocol != IpNumber::TCP {
            return Err(NetError::invalid(format!("protocol {} handed to tcp", pack.protocol.0)));
        }
        let tcp_pack = deserialize_tcp(&pack.payload)?;
        if !tcp_pack.checksum_valid(pack.src_ip, pack.dst_ip) {
            warn!("dropping segment from {} with bad checksum", pack.src_ip);
            return Err(NetError::violation("TCP checksum mismatch"));
        }
        let src = TcpAddress::new(pack.src_ip, tcp_pack.header.source_port);
        let dst = TcpAddress::new(pack.dst_ip, tcp_pack.header.destination_port);

        let mut socket_table = self.socket_table.lock();
        if let Some(sid) = find_connection(&socket_table, dst, src) {
            if let Some(SocketEntry::Connection(conn)) = socket_table.get_mut(&sid) {
                conn.handle_packet(&tcp_pack)?;
            }
            return Ok(());
        }
        if is_syn(&tcp_pack.header) {
            if let Some(lid) = find_listener(&socket_table, dst) {
                return self.listener_recv(&mut socket_table, lid, dst, src, &tcp_pack, mss);
            }
        }
        trace!("no socket for {src} -> {dst}, dropping");
        Ok(())
    }
    /// Creates a SYN_RECEIVED child for a listener and queues it for accept
    fn listener_recv(
        &self,
        socket_table: &mut MutexGuard<SocketTable>,
        lid: SocketId,
        local: TcpAddress,
        remote: TcpAddress,
        syn: &TcpPacket,
        mss: usize,
    ) -> Result<()> {
        let full = match socket_table.get(&lid) {
            Some(SocketEntry::Listener(l)) => l.pending_connections.len() >= l.backlog,
            _ => return Ok(()),
        };
        if full || socket_table.len() >= self.max_sockets.load(Ordering::SeqCst) {
            warn!("listener {lid}: backlog full, dropping SYN from {remote}");
            return Ok(());
        }
        let mut conn = TcpConnection::new(local, remote, self.config.read().congestion_control, self.ip_sender.clone());
        conn.set_mss(mss);
        conn.first_syn_ack(syn)?;
        let sid = self.insert(socket_table, SocketEntry::Connection(conn));
        if let Some(SocketEntry::Listener(l)) = socket_table.get_mut(&lid) {
            l.pending_connections.push_back(sid);
        }
        debug!("listener {lid}: new connection {sid} from {remote}");
        Ok(())
    }

    fn with_connection<T>(&self, sid: SocketId, op: impl FnOnce(&mut TcpConnection) -> Result<T>) -> Result<T> {
        let mut socket_table = self.socket_table.lock();
        match socket_table.get_mut(&sid) {
            Some(SocketEntry::Connection(conn)) => op(conn),
            Some(SocketEntry::Listener(_)) => Err(NetError::state(format!("socket {sid} is a listener"))),
            None => Err(NetError::not_found(format!("socket {sid}"))),
        }
    }
    fn check_capacity(&self, socket_table: &SocketTable) -> Result<()> {
        let max = self.max_sockets.load(Ordering::SeqCst);
        if socket_table.len() >= max {
            return Err(NetError::full("socket", max));
        }
        Ok(())
    }
    fn insert(&self, socket_table: &mut SocketTable, ent: SocketEntry) -> SocketId {
        let sid = self.next_sid.fetch_add(1, Ordering::SeqCst);
        socket_table.insert(sid, ent);
        sid
    }
    /// Picks a random ephemeral port no socket on `local_ip` is using
    fn unused_port(&self, local_ip: Ipv4Addr) -> Result<u16> {
        let socket_table = self.socket_table.lock();
        let in_use = |port: u16| {
            socket_table.values().any(|ent| match ent {
                SocketEntry::Connection(conn) => conn.local() == TcpAddress::new(local_ip, port),
                SocketEntry::Listener(l) => l.local.port == port,
            })
        };
        let mut rng = rand::thread_rng();
        for _ in 0..64 {
            let port = rng.gen_range(EPHEMERAL_PORTS);
            if !in_use(port) {
                return Ok(port);
            }
        }
        EPHEMERAL_PORTS
            .into_iter()
            .find(|port| !in_use(*port))
            .ok_or_else(|| NetError::full("ephemeral port", EPHEMERAL_PORTS.len()))
    }
}

impl ByteStream for SocketManager {
    fn send(&self, conn: SocketId, data: &[u8]) -> Result<usize> {
        SocketManager::send(self, conn, data)
    }
    fn recv(&self, conn: SocketId, buf: &mut [u8]) -> Result<usize> {
        SocketManager::recv(self, conn, buf)
    }
}

/// Removes a socket, its unaccepted children if it is a listener, and any listener's reference to it
fn remove_socket(socket_table: &mut SocketTable, sid: SocketId) -> bool {
    match socket_table.remove(&sid) {
        Some(SocketEntry::Listener(ent)) => {
            for child in ent.pending_connections {
                socket_table.remove(&child);
            }
        }
        Some(SocketEntry::Connection(_)) => {
            for ent in socket_table.values_mut() {
                if let SocketEntry::Listener(l) = ent {
                    l.pending_connections.retain(|p| *p != sid);
                }
            }
        }
        None => return false,
    }
    true
}

///Finds the connection whose local end is `local` and remote end is `remote`
fn find_connection(socket_table: &SocketTable, local: TcpAddress, remote: TcpAddress) -> Option<SocketId> {
    socket_table.iter().find_map(|(sid, ent)| match ent {
        SocketEntry::Connection(conn) if conn.local() == local && conn.remote() == remote => Some(*sid),
        _ => None,
    })
}

/// Exact-address listeners win over wildcard ones
fn find_listener(socket_table: &SocketTable, dst: TcpAddress) -> Option<SocketId> {
    let mut wildcard = None;
    for (sid, ent) in socket_table {
        if let SocketEntry::Listener(l) = ent {
            if l.wants(dst) {
                if l.local.ip == dst.ip {
                    return Some(*sid);
                }
                wildcard = Some(*sid);
            }
        }
    }
    wildcard
}
