/* NETWORK STACK LAYOUT

drivers (NetDriver)  ->  ethernet framing  ->  IpLayer  ->  TCP (SocketManager) / UDP / ICMP
                                                   ^
                  RouteTable, NatTable, Firewall --+

HTTP, WebSocket and gRPC frame byte streams carried by TCP connections (ByteStream).
QUIC, DNS and DHCP keep their own state and codecs.

NetworkStack (stack.rs) owns one of everything; config::initialize builds it from a netcfg file.
*/

mod error;
mod prelude;
pub mod utils; //pub for integration tests
pub mod tcp_utils;
mod send_recv_utils;
mod retransmission;
pub mod conn_socket;
pub mod flags;
pub mod ethernet;
pub mod driver;
pub mod link;
pub mod interface;
pub mod ip_handler;
pub mod router;
pub mod nat;
pub mod firewall;
pub mod socket_manager;
pub mod udp;
pub mod icmp;
pub mod http;
pub mod codec;
pub mod websocket;
pub mod grpc;
pub mod quic;
pub mod dns;
pub mod dhcp;
pub mod stack;
pub mod config;

pub use error::{NetError, Result};
pub use stack::{NetworkStack, StackConfig};
