use crate::prelude::*;
use crate::socket_manager::{ByteStream, SocketId};
use crate::utils::*;

// Opcodes
pub const OP_CONTINUATION: u8 = 0x0;
pub const OP_TEXT: u8 = 0x1;
pub const OP_BINARY: u8 = 0x2;
pub const OP_CLOSE: u8 = 0x8;
pub const OP_PING: u8 = 0x9;
pub const OP_PONG: u8 = 0xA;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
pub const DEFAULT_PING_INTERVAL_MS: u64 = 30000;
const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: u8,
    pub payload: Vec<u8>,
}

/// Builds a single final frame. Lengths above 125 use the 16-bit or 64-bit extended forms;
/// a `mask` key produces a client-to-server frame.
pub fn encode_frame(opcode: u8, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 14);
    out.push(FIN_BIT | (opcode & 0x0F));
    let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
    match payload.len() {
        len @ 0..=125 => out.push(mask_bit | len as u8),
        len @ 126..=0xFFFF => {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        len => {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }
    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            out.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
        }
        None => out.extend_from_slice(payload),
    }
    out
}

/// Decodes the frame at the start of `bytes`. `Ok(None)` means more bytes are needed;
/// otherwise the frame is returned with the number of bytes it occupied.
pub fn decode_frame(bytes: &[u8]) -> Result<Option<(Frame, usize)>> {
    if bytes.len() < 2 {
        return Ok(None);
    }
    let fin = bytes[0] & FIN_BIT != 0;
    let opcode = bytes[0] & 0x0F;
    let masked = bytes[1] & MASK_BIT != 0;
    let (len, mut pos) = match bytes[1] & 0x7F {
        126 => match bytes.get(2..4) {
            Some(ext) => (u16::from_be_bytes([ext[0], ext[1]]) as u64, 4),
            None => return Ok(None),
        },
        127 => match bytes.get(2..10) {
            Some(ext) => {
                let mut be = [0u8; 8];
                be.copy_from_slice(ext);
                (u64::from_be_bytes(be), 10)
            }
            None => return Ok(None),
        },
        len => (len as u64, 2),
    };
    if len >> 63 != 0 {
        return Err(NetError::violation("websocket payload length has its high bit set"));
    }
    let len = usize::try_from(len).map_err(|_| NetError::violation("websocket payload too large"))?;
    let key = if masked {
        let Some(key) = bytes.get(pos..pos + 4) else {
            return Ok(None);
        };
        pos += 4;
        Some([key[0], key[1], key[2], key[3]])
    } else {
        None
    };
    let end = pos
        .checked_add(len)
        .ok_or_else(|| NetError::violation("websocket payload too large"))?;
    let Some(body) = bytes.get(pos..end) else {
        return Ok(None);
    };
    let payload = match key {
        Some(key) => body.iter().enumerate().map(|(i, b)| b ^ key[i % 4]).collect(),
        None => body.to_vec(),
    };
    Ok(Some((Frame { fin, opcode, payload }, end)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketConnection {
    pub conn: SocketId,
    pub subprotocol: Option<String>,
    pub extensions: Vec<String>,
    pub ping_interval_ms: u64,
    pub last_ping: u64,
    pending: Vec<u8>, // received bytes not yet decoded into a frame
}

/// What `recv_frame` found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    /// A text, binary or continuation frame copied into the caller's buffer
    Data { opcode: u8, len: usize },
    Ping,
    Pong,
    Close { code: Option<u16> },
}

#[derive(Debug, Default)]
pub struct WebSocketLayer {
    init: InitFlag,
    connections: Mutex<HashMap<SocketId, WebSocketConnection>>,
}

impl WebSocketLayer {
    pub fn new() -> WebSocketLayer {
        WebSocketLayer::default()
    }
    pub fn init(&self) -> Result<()> {
        self.init.raise("websocket")?;
        self.connections.lock().clear();
        info!("websocket stack initialized");
        Ok(())
    }
    pub fn shutdown(&self) -> Result<()> {
        self.init.lower("websocket")?;
        self.connections.lock().clear();
        Ok(())
    }
    /// Upgrades the TCP connection `conn` to a WebSocket
    pub fn accept(&self, conn: SocketId) -> Result<()> {
        self.init.check("websocket")?;
        let mut connections = self.connections.lock();
        if connections.contains_key(&conn) {
            return Err(NetError::invalid(format!("connection {conn} is already a websocket")));
        }
        connections.insert(
            conn,
            WebSocketConnection {
                conn,
                subprotocol: None,
                extensions: Vec::new(),
                ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
                last_ping: timestamp(),
                pending: Vec::new(),
            },
        );
        info!("websocket accepted on connection {conn}");
        Ok(())
    }
    pub fn connection(&self, conn: SocketId) -> Option<WebSocketConnection> {
        self.connections.lock().get(&conn).cloned()
    }
    pub fn set_subprotocol(&self, conn: SocketId, subprotocol: &str) -> Result<()> {
        let mut connections = self.connections.lock();
        let ws = connections
            .get_mut(&conn)
            .ok_or_else(|| NetError::not_found(format!("websocket {conn}")))?;
        ws.subprotocol = Some(subprotocol.to_string());
        Ok(())
    }
    pub fn send_frame<S: ByteStream + ?Sized>(&self, stream: &S, conn: SocketId, opcode: u8, data: &[u8]) -> Result<usize> {
        self.init.check("websocket")?;
        if !self.connections.lock().contains_key(&conn) {
            return Err(NetError::not_found(format!("websocket {conn}")));
        }
        let frame = encode_frame(opcode, data, None);
        stream.send(conn, &frame)?;
        debug!("websocket frame sent: opcode {opcode:#x}, {} bytes", data.len());
        Ok(data.len())
    }

    /// Pulls whatever bytes the stream has and handles the first complete frame.
    /// `Ok(None)` when no complete frame has arrived yet. A data frame larger than `buf`
    /// is an error and stays queued.
    pub fn recv_frame<S: ByteStream + ?Sized>(&self, stream: &S, conn: SocketId, buf: &mut [u8]) -> Result<Option<WsEvent>> {
        self.init.check("websocket")?;
        let mut incoming = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = stream.recv(conn, &mut chunk)?;
            if n == 0 {
                break;
            }
            incoming.extend_from_slice(&chunk[..n]);
        }

        let frame = {
            let mut connections = self.connections.lock();
            let ws = connections
                .get_mut(&conn)
                .ok_or_else(|| NetError::not_found(format!("websocket {conn}")))?;
            ws.pending.extend_from_slice(&incoming);
            let Some((frame, used)) = decode_frame(&ws.pending)? else {
                return Ok(None);
            };
            let is_data = matches!(frame.opcode, OP_TEXT | OP_BINARY | OP_CONTINUATION);
            if is_data && frame.payload.len() > buf.len() {
                return Err(NetError::invalid(format!(
                    "{} byte frame does not fit a {} byte buffer",
                    frame.payload.len(),
                    buf.len()
                )));
            }
            ws.pending.drain(..used);
            if frame.opcode == OP_PING {
                ws.last_ping = timestamp();
            }
            frame
        };

        match frame.opcode {
            OP_PING => {
                self.send_frame(stream, conn, OP_PONG, &[])?;
                Ok(Some(WsEvent::Ping))
            }
            OP_PONG => Ok(Some(WsEvent::Pong)),
            OP_CLOSE => {
                let code = frame.payload.get(..2).map(|c| u16::from_be_bytes([c[0], c[1]]));
                info!("websocket close frame on connection {conn} (code {code:?})");
                Ok(Some(WsEvent::Close { code }))
            }
            OP_TEXT | OP_BINARY | OP_CONTINUATION => {
                let len = frame.payload.len();
                buf[..len].copy_from_slice(&frame.payload);
                Ok(Some(WsEvent::Data { opcode: frame.opcode, len }))
            }
            other => Err(NetError::violation(format!("unknown websocket opcode {other:#x}"))),
        }
    }
    /// Forgets the websocket; the TCP connection is left alone
    pub fn close(&self, conn: SocketId) -> Result<()> {
        match self.connections.lock().remove(&conn) {
            Some(_) => Ok(()),
            None => Err(NetError::not_found(format!("websocket {conn}"))),
        }
    }
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
