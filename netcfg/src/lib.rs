//! Parser for node configuration files.
//!
//! One directive per line; `#` starts a comment.
//!
//! ```text
//! stack queue_size 128
//! feature firewall
//! security tls1.3
//! interface if0 10.0.0.1/24 127.0.0.1:5000 mac 02:00:0a:00:00:01 mtu 1500
//! neighbor 10.0.0.2 at 127.0.0.1:5001 via if0
//! route 0.0.0.0/0 via 10.0.0.2 dev if0
//! nat tcp 10.0.0.1:8080 192.0.2.1:80
//! firewall deny udp 0.0.0.0:0 10.0.0.1:53
//! ```

use ipnet::Ipv4Net;
use std::fs;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, ConfigError>;

/// Stack settings a `stack` line may set
pub const STACK_KEYS: [&str; 8] = [
    "max_interfaces",
    "max_connections",
    "max_sockets",
    "buffer_size",
    "queue_size",
    "timeout_ms",
    "retry_count",
    "performance_level",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Any,
    Tcp,
    Udp,
    Icmp,
}

impl Protocol {
    /// IP protocol number, 0 for any
    pub fn number(&self) -> u8 {
        match self {
            Protocol::Any => 0,
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
            Protocol::Icmp => 1,
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(Protocol::Any),
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "icmp" => Ok(Protocol::Icmp),
            _ => Err(format!("unknown protocol {s:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceConfig {
    pub name: String,
    pub assigned: Ipv4Net, // interface address with its prefix length
    pub udp_addr: SocketAddr,
    pub mac: Option<String>,
    pub mtu: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborConfig {
    pub dest_addr: Ipv4Addr,
    pub udp_addr: SocketAddr,
    pub interface_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticRoute {
    pub prefix: Ipv4Net,
    pub gateway: Ipv4Addr,
    pub interface_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatConfig {
    pub protocol: Protocol,
    pub internal: SocketAddrV4,
    pub external: SocketAddrV4,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallConfig {
    pub action: Action,
    pub protocol: Protocol,
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeConfig {
    pub stack: Vec<(String, u64)>,
    pub features: Vec<String>,
    pub security: Vec<String>,
    pub interfaces: Vec<InterfaceConfig>,
    pub neighbors: Vec<NeighborConfig>,
    pub routes: Vec<StaticRoute>,
    pub nat_rules: Vec<NatConfig>,
    pub firewall_rules: Vec<FirewallConfig>,
}

impl NodeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<NodeConfig> {
        let text = fs::read_to_string(path)?;
        text.parse()
    }
    pub fn interface(&self, name: &str) -> Option<&InterfaceConfig> {
        self.interfaces.iter().find(|i| i.name == name)
    }
    /// Neighbours reachable through the named interface
    pub fn neighbors_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a NeighborConfig> + 'a {
        self.neighbors.iter().filter(move |n| n.interface_name == name)
    }
}

impl FromStr for NodeConfig {
    type Err = ConfigError;

    fn from_str(text: &str) -> Result<NodeConfig> {
        let mut config = NodeConfig::default();
        for (i, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let words: Vec<&str> = line.split_whitespace().collect();
            parse_directive(&mut config, &words).map_err(|message| ConfigError::Parse { line: i + 1, message })?;
        }
        validate(&config)?;
        Ok(config)
    }
}

fn parse_directive(config: &mut NodeConfig, words: &[&str]) -> std::result::Result<(), String> {
    match words {
        ["stack", key, value] => {
            if !STACK_KEYS.contains(key) {
                return Err(format!("unknown stack setting {key:?}"));
            }
            config.stack.push((key.to_string(), parse(value, "number")?));
        }
        ["feature", name] => config.features.push(name.to_string()),
        ["security", name] => config.security.push(name.to_string()),
        ["interface", name, assigned, udp_addr, rest @ ..] => {
            let mut inter = InterfaceConfig {
                name: name.to_string(),
                assigned: parse(assigned, "address/prefix")?,
                udp_addr: parse(udp_addr, "UDP address")?,
                mac: None,
                mtu: None,
            };
            for option in rest.chunks(2) {
                match option {
                    ["mac", mac] => inter.mac = Some(mac.to_string()),
                    ["mtu", mtu] => inter.mtu = Some(parse(mtu, "MTU")?),
                    other => return Err(format!("unexpected interface option {:?}", other.join(" "))),
                }
            }
            config.interfaces.push(inter);
        }
        ["neighbor", dest, "at", udp_addr, "via", ifname] => config.neighbors.push(NeighborConfig {
            dest_addr: parse(dest, "IPv4 address")?,
            udp_addr: parse(udp_addr, "UDP address")?,
            interface_name: ifname.to_string(),
        }),
        ["route", prefix, "via", gateway, "dev", ifname] => config.routes.push(StaticRoute {
            prefix: parse(prefix, "prefix")?,
            gateway: parse(gateway, "gateway")?,
            interface_name: ifname.to_string(),
        }),
        ["nat", protocol, internal, external] => config.nat_rules.push(NatConfig {
            protocol: protocol.parse()?,
            internal: parse(internal, "ip:port")?,
            external: parse(external, "ip:port")?,
        }),
        ["firewall", action, protocol, src, dst] => config.firewall_rules.push(FirewallConfig {
            action: match *action {
                "allow" => Action::Allow,
                "deny" => Action::Deny,
                other => return Err(format!("firewall action must be allow or deny, not {other:?}")),
            },
            protocol: protocol.parse()?,
            src: parse(src, "ip:port")?,
            dst: parse(dst, "ip:port")?,
        }),
        [directive, ..] => return Err(format!("malformed {directive:?} directive")),
        [] => {}
    }
    Ok(())
}

fn parse<T: FromStr>(word: &str, what: &str) -> std::result::Result<T, String> {
    word.parse().map_err(|_| format!("expected {what}, found {word:?}"))
}

/// Cross-line checks: unique interface names, neighbours and routes on known interfaces
fn validate(config: &NodeConfig) -> Result<()> {
    let fail = |message: String| ConfigError::Parse { line: 0, message };
    for (i, inter) in config.interfaces.iter().enumerate() {
        if config.interfaces[..i].iter().any(|other| other.name == inter.name) {
            return Err(fail(format!("interface {} is defined twice", inter.name)));
        }
    }
    for neighbor in &config.neighbors {
        if config.interface(&neighbor.interface_name).is_none() {
            return Err(fail(format!("neighbor {} uses unknown interface {}", neighbor.dest_addr, neighbor.interface_name)));
        }
    }
    for route in &config.routes {
        if config.interface(&route.interface_name).is_none() {
            return Err(fail(format!("route {} uses unknown interface {}", route.prefix, route.interface_name)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# two interfaces
stack queue_size 128
feature firewall
security tls1.3
interface if0 10.0.0.1/24 127.0.0.1:5000 mac 02:00:0a:00:00:01
interface if1 10.1.0.1/24 127.0.0.1:5002 mtu 9000
neighbor 10.0.0.2 at 127.0.0.1:5001 via if0
route 0.0.0.0/0 via 10.0.0.2 dev if0   # default
nat tcp 10.0.0.1:8080 192.0.2.1:80
firewall deny udp 0.0.0.0:0 10.0.0.1:53
";

    #[test]
    fn parses_every_directive() {
        let config: NodeConfig = SAMPLE.parse().unwrap();
        assert_eq!(config.stack, vec![(String::from("queue_size"), 128)]);
        assert_eq!(config.features, vec!["firewall"]);
        assert_eq!(config.interfaces.len(), 2);
        let if0 = config.interface("if0").unwrap();
        assert_eq!(if0.assigned.addr(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(if0.assigned.prefix_len(), 24);
        assert_eq!(if0.mac.as_deref(), Some("02:00:0a:00:00:01"));
        assert_eq!(config.interface("if1").unwrap().mtu, Some(9000));
        assert_eq!(config.neighbors_of("if0").count(), 1);
        assert_eq!(config.routes[0].gateway, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(config.nat_rules[0].protocol.number(), 6);
        assert_eq!(config.firewall_rules[0].action, Action::Deny);
        assert_eq!(config.firewall_rules[0].dst.port(), 53);
    }

    #[test]
    fn errors_carry_line_numbers() {
        let err = "feature nat\n\ninterface if0 10.0.0.1 127.0.0.1:5000\n".parse::<NodeConfig>().unwrap_err();
        match err {
            ConfigError::Parse { line, message } => {
                assert_eq!(line, 3);
                assert!(message.contains("address/prefix"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!("stack warp 9".parse::<NodeConfig>(), Err(ConfigError::Parse { line: 1, .. })));
        assert!(matches!("nat sctp 1.1.1.1:1 2.2.2.2:2".parse::<NodeConfig>(), Err(ConfigError::Parse { line: 1, .. })));
    }

    #[test]
    fn neighbors_need_a_known_interface() {
        let text = "neighbor 10.0.0.2 at 127.0.0.1:5001 via if9";
        assert!(text.parse::<NodeConfig>().is_err());
    }

    #[test]
    fn missing_file() {
        assert!(matches!(NodeConfig::from_file("/nonexistent/node.cfg"), Err(ConfigError::Io(_))));
    }
}
