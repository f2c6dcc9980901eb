pub use crate::error::{NetError, Result};
pub use circular_buffer::CircularBuffer;
pub use etherparse::{IpNumber, Ipv4Header, TcpHeader, UdpHeader};
pub use ipnet::Ipv4Net;
pub use rand::Rng;
pub use spin::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use std::cmp;
pub use std::collections::{HashMap, VecDeque};
pub use std::fmt;
pub use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
pub use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering},
    mpsc::{channel, Receiver, Sender, TryRecvError},
    Arc,
};
pub use std::time::{Duration, Instant};
pub use tracing::{debug, error, info, trace, warn};
