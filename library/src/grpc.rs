use crate::prelude::*;
use crate::socket_manager::{ByteStream, SocketId};
use crate::utils::*;

pub const FRAME_HEADER_LEN: usize = 9;
pub const MAX_FRAME_PAYLOAD: usize = 0x00FF_FFFF;
/// Initial flow-control window of a new stream
pub const DEFAULT_WINDOW: u32 = 65535;
const MAX_WINDOW: u32 = 0x7FFF_FFFF;
const STREAM_ID_MASK: u32 = 0x7FFF_FFFF;
const MESSAGE_PREFIX_LEN: usize = 5;

// Frame types
pub const DATA: u8 = 0x0;
pub const HEADERS: u8 = 0x1;
pub const RST_STREAM: u8 = 0x3;
pub const SETTINGS: u8 = 0x4;
pub const PING: u8 = 0x6;
pub const GOAWAY: u8 = 0x7;
pub const WINDOW_UPDATE: u8 = 0x8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrpcFrame {
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32,
    pub payload: Vec<u8>,
}

impl GrpcFrame {
    pub fn new(frame_type: u8, stream_id: u32, payload: Vec<u8>) -> GrpcFrame {
        GrpcFrame { frame_type, flags: 0, stream_id, payload }
    }
    pub fn window_update(stream_id: u32, increment: u32) -> GrpcFrame {
        GrpcFrame::new(WINDOW_UPDATE, stream_id, (increment & MAX_WINDOW).to_be_bytes().to_vec())
    }
}

/// length(3) type(1) flags(1) stream id(4, reserved bit cleared) payload
pub fn encode_frame(frame: &GrpcFrame) -> Result<Vec<u8>> {
    let len = frame.payload.len();
    if len > MAX_FRAME_PAYLOAD {
        return Err(NetError::invalid(format!("{len} byte payload does not fit a frame")));
    }
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + len);
    out.extend_from_slice(&(len as u32).to_be_bytes()[1..]);
    out.push(frame.frame_type);
    out.push(frame.flags);
    out.extend_from_slice(&(frame.stream_id & STREAM_ID_MASK).to_be_bytes());
    out.extend_from_slice(&frame.payload);
    Ok(out)
}

/// Decodes the frame at the start of `bytes`, returning it with the number of bytes used
pub fn decode_frame(bytes: &[u8]) -> Result<(GrpcFrame, usize)> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(NetError::violation(format!(
            "{} bytes is shorter than a frame header",
            bytes.len()
        )));
    }
    let len = u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]) as usize;
    let stream_id = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & STREAM_ID_MASK;
    let end = FRAME_HEADER_LEN + len;
    let payload = bytes
        .get(FRAME_HEADER_LEN..end)
        .ok_or_else(|| NetError::violation(format!("frame declares {len} payload bytes")))?;
    let frame = GrpcFrame { frame_type: bytes[3], flags: bytes[4], stream_id, payload: payload.to_vec() };
    Ok((frame, end))
}

/// Prefixes a message with the compressed flag (0) and its 4-byte length
pub fn encode_message(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MESSAGE_PREFIX_LEN + message.len());
    out.push(0);
    out.extend_from_slice(&(message.len() as u32).to_be_bytes());
    out.extend_from_slice(message);
    out
}

/// Returns (compressed, message)
pub fn decode_message(bytes: &[u8]) -> Result<(bool, &[u8])> {
    if bytes.len() < MESSAGE_PREFIX_LEN {
        return Err(NetError::violation("message shorter than its length prefix"));
    }
    let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    let message = MESSAGE_PREFIX_LEN
        .checked_add(len)
        .and_then(|end| bytes.get(MESSAGE_PREFIX_LEN..end))
        .ok_or_else(|| NetError::violation(format!("message declares {len} bytes")))?;
    Ok((bytes[0] != 0, message))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrpcStream {
    pub stream_id: u32,
    pub window_size: u32,
    pub priority: u8,
    pub user_data: Vec<u8>,
}

#[derive(Debug)]
pub struct GrpcLayer {
    init: InitFlag,
    streams: Mutex<HashMap<u32, GrpcStream>>,
    next_stream_id: AtomicU32,
}

impl Default for GrpcLayer {
    fn default() -> Self {
        GrpcLayer::new()
    }
}

impl GrpcLayer {
    pub fn new() -> GrpcLayer {
        GrpcLayer {
            init: InitFlag::new(),
            streams: Mutex::new(HashMap::new()),
            next_stream_id: AtomicU32::new(1),
        }
    }
    pub fn init(&self) -> Result<()> {
        self.init.raise("grpc")?;
        self.streams.lock().clear();
        self.next_stream_id.store(1, Ordering::SeqCst);
        info!("grpc stack initialized");
        Ok(())
    }
    pub fn shutdown(&self) -> Result<()> {
        self.init.lower("grpc")?;
        self.streams.lock().clear();
        Ok(())
    }
    /// Opens a client stream (odd IDs) with the default window
    pub fn create_stream(&self) -> Result<u32> {
        self.init.check("grpc")?;
        let stream_id = self.next_stream_id.fetch_add(2, Ordering::SeqCst);
        if stream_id > STREAM_ID_MASK {
            return Err(NetError::full("grpc stream id", STREAM_ID_MASK as usize));
        }
        let stream = GrpcStream { stream_id, window_size: DEFAULT_WINDOW, priority: 0, user_data: Vec::new() };
        self.streams.lock().insert(stream_id, stream);
        debug!("grpc stream {stream_id} created");
        Ok(stream_id)
    }
    pub fn close_stream(&self, stream_id: u32) -> Result<()> {
        match self.streams.lock().remove(&stream_id) {
            Some(_) => Ok(()),
            None => Err(NetError::not_found(format!("grpc stream {stream_id}"))),
        }
    }
    pub fn stream(&self, stream_id: u32) -> Option<GrpcStream> {
        self.streams.lock().get(&stream_id).cloned()
    }
    /// Frames `data` as DATA on `stream_id`, charging it against the stream's window
    pub fn send_data<S: ByteStream + ?Sized>(&self, stream: &S, conn: SocketId, stream_id: u32, data: &[u8]) -> Result<usize> {
        self.init.check("grpc")?;
        let bytes = encode_frame(&GrpcFrame::new(DATA, stream_id, data.to_vec()))?;
        {
            let mut streams = self.streams.lock();
            let entry = streams
                .get_mut(&stream_id)
                .ok_or_else(|| NetError::not_found(format!("grpc stream {stream_id}")))?;
            if data.len() > entry.window_size as usize {
                return Err(NetError::state(format!(
                    "stream {stream_id} window of {} bytes cannot take {}",
                    entry.window_size,
                    data.len()
                )));
            }
            entry.window_size -= data.len() as u32;
        }
        stream.send(conn, &bytes)?;
        Ok(data.len())
    }
    /// Applies an inbound frame to the stream registry. Returns the DATA payload, if any.
    pub fn handle_frame(&self, frame: &GrpcFrame) -> Result<Option<Vec<u8>>> {
        self.init.check("grpc")?;
        let mut streams = self.streams.lock();
        match frame.frame_type {
            WINDOW_UPDATE => {
                let Some(inc) = frame.payload.get(..4) else {
                    return Err(NetError::violation("short WINDOW_UPDATE"));
                };
                let increment = u32::from_be_bytes([inc[0], inc[1], inc[2], inc[3]]) & MAX_WINDOW;
                if frame.stream_id == 0 {
                    return Ok(None); // connection-level window is not tracked
                }
                let entry = streams
                    .get_mut(&frame.stream_id)
                    .ok_or_else(|| NetError::not_found(format!("grpc stream {}", frame.stream_id)))?;
                let window = entry.window_size as u64 + increment as u64;
                if window > MAX_WINDOW as u64 {
                    return Err(NetError::violation(format!("stream {} window overflow", frame.stream_id)));
                }
                entry.window_size = window as u32;
                Ok(None)
            }
            RST_STREAM => {
                streams.remove(&frame.stream_id);
                debug!("grpc stream {} reset by peer", frame.stream_id);
                Ok(None)
            }
            DATA => {
                if !streams.contains_key(&frame.stream_id) {
                    return Err(NetError::not_found(format!("grpc stream {}", frame.stream_id)));
                }
                Ok(Some(frame.payload.clone()))
            }
            other => {
                trace!("grpc frame type {other} ignored");
                Ok(None)
            }
        }
    }
    pub fn len(&self) -> usize {
        self.streams.lock().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
