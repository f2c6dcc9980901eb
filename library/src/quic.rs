use crate::prelude::*;
use crate::utils::*;

pub const QUIC_VERSION: u32 = 1;
pub const DEFAULT_MAX_DATA: u64 = 1 << 20;
pub const DEFAULT_MAX_STREAM_DATA: u64 = 65536;
pub const DEFAULT_MAX_STREAMS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QuicPacketType {
    Initial = 0,
    ZeroRtt = 1,
    Handshake = 2,
    Retry = 3,
    OneRtt = 4,
}

impl TryFrom<u8> for QuicPacketType {
    type Error = NetError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => QuicPacketType::Initial,
            1 => QuicPacketType::ZeroRtt,
            2 => QuicPacketType::Handshake,
            3 => QuicPacketType::Retry,
            4 => QuicPacketType::OneRtt,
            other => return Err(NetError::invalid(format!("unknown QUIC packet type {other}"))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuicState {
    #[default]
    Handshaking,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuicConnection {
    pub connection_id: u64,
    pub host: String,
    pub port: u16,
    pub version: u32,
    pub state: QuicState,
    pub max_data: u64,
    pub max_stream_data: u64,
    pub max_bidi_streams: u64,
    pub max_uni_streams: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
}

/// Connection bookkeeping only. Packets are counted and logged, never put on the wire.
#[derive(Debug, Default)]
pub struct QuicLayer {
    init: InitFlag,
    connections: Mutex<HashMap<u64, QuicConnection>>,
}

impl QuicLayer {
    pub fn new() -> QuicLayer {
        QuicLayer::default()
    }
    pub fn init(&self) -> Result<()> {
        self.init.raise("quic")?;
        self.connections.lock().clear();
        info!("quic stack initialized");
        Ok(())
    }
    pub fn shutdown(&self) -> Result<()> {
        self.init.lower("quic")?;
        self.connections.lock().clear();
        Ok(())
    }
    /// Registers a connection to `host:port` and returns its ID
    pub fn connect(&self, host: &str, port: u16) -> Result<u64> {
        self.init.check("quic")?;
        if host.is_empty() || port == 0 {
            return Err(NetError::invalid(format!("bad QUIC peer {host:?}:{port}")));
        }
        let connection_id = timestamp();
        let conn = QuicConnection {
            connection_id,
            host: host.to_string(),
            port,
            version: QUIC_VERSION,
            state: QuicState::default(),
            max_data: DEFAULT_MAX_DATA,
            max_stream_data: DEFAULT_MAX_STREAM_DATA,
            max_bidi_streams: DEFAULT_MAX_STREAMS,
            max_uni_streams: DEFAULT_MAX_STREAMS,
            bytes_sent: 0,
            bytes_received: 0,
            packets_sent: 0,
            packets_received: 0,
        };
        self.connections.lock().insert(connection_id, conn);
        info!("quic connection {connection_id} to {host}:{port}");
        Ok(connection_id)
    }

    fn with_connection<T>(&self, id: u64, f: impl FnOnce(&mut QuicConnection) -> Result<T>) -> Result<T> {
        self.init.check("quic")?;
        let mut connections = self.connections.lock();
        let conn = connections
            .get_mut(&id)
            .ok_or_else(|| NetError::not_found(format!("quic connection {id}")))?;
        f(conn)
    }

    pub fn send_packet(&self, id: u64, packet_type: QuicPacketType, data: &[u8]) -> Result<usize> {
        self.with_connection(id, |conn| {
            let total = conn.bytes_sent + data.len() as u64;
            if total > conn.max_data {
                return Err(NetError::state(format!("quic connection {id} would exceed max_data {}", conn.max_data)));
            }
            conn.bytes_sent = total;
            conn.packets_sent += 1;
            debug!("quic send {packet_type:?} on {id}: {} bytes", data.len());
            Ok(data.len())
        })
    }

    /// Accounts an inbound packet. Handshake and 1-RTT packets complete the handshake.
    pub fn recv_packet(&self, id: u64, packet_type: QuicPacketType, data: &[u8]) -> Result<usize> {
        self.with_connection(id, |conn| {
            let total = conn.bytes_received + data.len() as u64;
            if total > conn.max_data {
                return Err(NetError::state(format!("quic connection {id} would exceed max_data {}", conn.max_data)));
            }
            conn.bytes_received = total;
            conn.packets_received += 1;
            if matches!(packet_type, QuicPacketType::Handshake | QuicPacketType::OneRtt) {
                conn.state = QuicState::Connected;
            }
            debug!("quic recv {packet_type:?} on {id}: {} bytes", data.len());
            Ok(data.len())
        })
    }
    /// Forgets the connection; later calls with its ID fail with NotFound
    pub fn close(&self, id: u64) -> Result<()> {
        self.init.check("quic")?;
        let conn = self
            .connections
            .lock()
            .remove(&id)
            .ok_or_else(|| NetError::not_found(format!("quic connection {id}")))?;
        info!(
            "quic connection {id} closed after {} bytes out, {} in",
            conn.bytes_sent, conn.bytes_received
        );
        Ok(())
    }
    pub fn connection(&self, id: u64) -> Option<QuicConnection> {
        self.connections.lock().get(&id).cloned()
    }
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
