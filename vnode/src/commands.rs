use crate::repl::{CommandData, NumArgs};
use netstack::ethernet::mac_to_string;
use netstack::flags::{flag_by_name, flag_names, Features};
use netstack::interface::InterfaceStatus;
use netstack::socket_manager::SocketId;
use netstack::stack::MAX_INTERFACES;
use netstack::tcp_utils::CongestionControl;
use netstack::NetworkStack;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::result;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

type CmdResult = result::Result<(), String>;

const ACCEPT_BACKLOG: usize = 16;
const PING_TIMEOUT: Duration = Duration::from_secs(1);

macro_rules! command {
    ($name:expr, $handler:expr, $num_args:expr, $usage:expr) => {
        ($name, CommandData { handler: Box::new($handler), num_args: $num_args, usage: $usage })
    };
}

pub fn all_commands() -> Vec<(&'static str, CommandData)> {
    vec![
        command!("li", li_handler, NumArgs::Exactly(0), "li"),
        command!("ln", ln_handler, NumArgs::Exactly(0), "ln"),
        command!("lr", lr_handler, NumArgs::Exactly(0), "lr"),
        command!("up", up_handler, NumArgs::Exactly(1), "up <ifname>"),
        command!("down", down_handler, NumArgs::Exactly(1), "down <ifname>"),
        command!("stats", stats_handler, NumArgs::Exactly(0), "stats"),
        command!("health", health_handler, NumArgs::Exactly(0), "health"),
        command!("features", features_handler, NumArgs::Exactly(0), "features"),
        command!("feature", feature_handler, NumArgs::Exactly(2), "feature <on|off> <name>"),
        command!("nat", nat_handler, NumArgs::Exactly(0), "nat"),
        command!("fw", fw_handler, NumArgs::Exactly(0), "fw"),
        command!("ping", ping_handler, NumArgs::Exactly(1), "ping <ip>"),
        command!("ub", ub_handler, NumArgs::Exactly(1), "ub <port>"),
        command!("udp", udp_handler, NumArgs::AtLeast(3), "udp <ip> <port> <message...>"),
        command!("ur", ur_handler, NumArgs::Exactly(1), "ur <port>"),
        command!("a", a_handler, NumArgs::Exactly(1), "a <port>"),
        command!("c", c_handler, NumArgs::Exactly(2), "c <ip> <port>"),
        command!("ls", ls_handler, NumArgs::Exactly(0), "ls"),
        command!("s", s_handler, NumArgs::AtLeast(2), "s <socket> <message...>"),
        command!("r", r_handler, NumArgs::Exactly(2), "r <socket> <bytes>"),
        command!("sf", sf_handler, NumArgs::Exactly(1), "sf <socket>"),
        command!("cl", cl_handler, NumArgs::Exactly(1), "cl <socket>"),
        command!("cc", cc_handler, NumArgs::Exactly(2), "cc <socket> <algorithm>"),
    ]
}

fn arg<T: FromStr>(args: &[String], i: usize, what: &str) -> result::Result<T, String> {
    args[i].parse().map_err(|_| format!("{:?} is not a valid {what}", args[i]))
}

// LISTINGS

fn li_handler(stack: &Arc<NetworkStack>, _args: Vec<String>) -> CmdResult {
    println!("{:<8} {:<18} {:<6} {:<6} {}", "Name", "Addr/Prefix", "State", "MTU", "MAC");
    for inter in stack.get_interfaces(MAX_INTERFACES) {
        let addr = inter.config.addr.map_or_else(|| String::from("-"), |net| net.to_string());
        println!(
            "{:<8} {:<18} {:<6} {:<6} {}",
            inter.name(),
            addr,
            inter.config.status,
            inter.config.mtu,
            mac_to_string(&inter.config.mac)
        );
    }
    Ok(())
}

/// Links under each interface and their driver counters
fn ln_handler(stack: &Arc<NetworkStack>, _args: Vec<String>) -> CmdResult {
    println!("{:<8} {:<6} {:<10} {}", "Driver", "Link", "RX", "TX");
    for inter in stack.get_interfaces(MAX_INTERFACES) {
        let Some(driver) = stack.get_driver(inter.driver_name()) else {
            continue;
        };
        let stats = driver.get_stats();
        let link = if driver.link_up() { "up" } else { "down" };
        println!("{:<8} {:<6} {:<10} {}", driver.name(), link, stats.rx_packets, stats.tx_packets);
    }
    Ok(())
}

fn lr_handler(stack: &Arc<NetworkStack>, _args: Vec<String>) -> CmdResult {
    println!("{:<18} {:<16} {}", "Prefix", "Next hop", "Interface");
    for route in stack.routes.routes() {
        let prefix = route.prefix().map(|net| net.to_string()).unwrap_or_else(|_| format!("{}/{}", route.dst, route.mask));
        let via = if route.gateway.is_unspecified() { String::from("LOCAL") } else { route.gateway.to_string() };
        println!("{:<18} {:<16} {}", prefix, via, route.interface);
    }
    Ok(())
}

fn up_handler(stack: &Arc<NetworkStack>, args: Vec<String>) -> CmdResult {
    stack.set_interface_state(&args[0], InterfaceStatus::Up).map_err(|e| e.to_string())
}

fn down_handler(stack: &Arc<NetworkStack>, args: Vec<String>) -> CmdResult {
    stack.set_interface_state(&args[0], InterfaceStatus::Down).map_err(|e| e.to_string())
}

fn stats_handler(stack: &Arc<NetworkStack>, _args: Vec<String>) -> CmdResult {
    let stats = stack.get_performance_metrics();
    println!("received  {} packets / {} bytes", stats.packets_processed, stats.bytes_processed);
    println!("sent      {} packets / {} bytes", stats.packets_sent, stats.bytes_sent);
    println!("dropped   {}", stats.dropped);
    println!("errors    {}", stats.errors);
    let udp = stack.udp.stats();
    println!("udp       {} in / {} out / {} dropped", udp.datagrams_received, udp.datagrams_sent, udp.queue_drops + udp.no_port);
    println!("tcp       {} sockets, {} connections", stack.tcp.len(), stack.tcp.connection_count());
    Ok(())
}

fn health_handler(stack: &Arc<NetworkStack>, _args: Vec<String>) -> CmdResult {
    let report = stack.check_health();
    if report.healthy() {
        println!("{report}");
    } else {
        print!("{report}");
    }
    Ok(())
}

fn features_handler(stack: &Arc<NetworkStack>, _args: Vec<String>) -> CmdResult {
    let config = stack.get_config();
    println!("features: {}", flag_names(&config.features));
    println!("security: {}", flag_names(&config.security_level));
    Ok(())
}

fn feature_handler(stack: &Arc<NetworkStack>, args: Vec<String>) -> CmdResult {
    let feature = flag_by_name::<Features>(&args[1]).map_err(|e| e.to_string())?;
    match args[0].as_str() {
        "on" => stack.enable_feature(feature),
        "off" => stack.disable_feature(feature),
        other => return Err(format!("expected on or off, not {other:?}")),
    }
    Ok(())
}

fn nat_handler(stack: &Arc<NetworkStack>, _args: Vec<String>) -> CmdResult {
    println!("{:<6} {:<22} {}", "Proto", "Internal", "External");
    for rule in stack.nat.rules() {
        println!("{:<6} {:<22} {}", rule.protocol.0, rule.internal, rule.external);
    }
    Ok(())
}

fn fw_handler(stack: &Arc<NetworkStack>, _args: Vec<String>) -> CmdResult {
    println!("{:<4} {:<6} {:<6} {:<22} {}", "ID", "Action", "Proto", "Source", "Destination");
    for rule in stack.firewall.rules() {
        let m = rule.matcher;
        println!(
            "{:<4} {:<6} {:<6} {:<22} {}",
            rule.rule_id,
            rule.action,
            m.protocol.0,
            SocketAddrV4::new(m.src_ip, m.src_port),
            SocketAddrV4::new(m.dst_ip, m.dst_port)
        );
    }
    Ok(())
}

// ICMP AND UDP

fn ping_handler(stack: &Arc<NetworkStack>, args: Vec<String>) -> CmdResult {
    let dst: Ipv4Addr = arg(&args, 0, "IPv4 address")?;
    let sequence = stack.ping(dst).map_err(|e| e.to_string())?;
    let sent = Instant::now();
    while sent.elapsed() < PING_TIMEOUT {
        let replies = stack.icmp.take_replies();
        if let Some(reply) = replies.iter().find(|r| r.from == dst && r.sequence == sequence) {
            println!(
                "{} bytes from {}: icmp_seq={} time={:.2?}",
                reply.data_len,
                reply.from,
                reply.sequence,
                sent.elapsed()
            );
            return Ok(());
        }
        thread::sleep(Duration::from_millis(5));
    }
    Err(format!("no reply from {dst} (icmp_seq={sequence})"))
}

fn ub_handler(stack: &Arc<NetworkStack>, args: Vec<String>) -> CmdResult {
    stack.udp.bind(arg(&args, 0, "port")?).map_err(|e| e.to_string())
}

/// Sends from the same port number it sends to
fn udp_handler(stack: &Arc<NetworkStack>, args: Vec<String>) -> CmdResult {
    let ip: Ipv4Addr = arg(&args, 0, "IPv4 address")?;
    let port: u16 = arg(&args, 1, "port")?;
    let message = args[2..].join(" ");
    let sent = stack
        .udp_send(port, SocketAddrV4::new(ip, port), message.as_bytes())
        .map_err(|e| e.to_string())?;
    println!("Sent {sent} bytes");
    Ok(())
}

fn ur_handler(stack: &Arc<NetworkStack>, args: Vec<String>) -> CmdResult {
    match stack.udp.recv_from(arg(&args, 0, "port")?).map_err(|e| e.to_string())? {
        Some(datagram) => println!("{} -> {}: {}", datagram.src, datagram.dst, String::from_utf8_lossy(&datagram.data)),
        None => println!("No datagram waiting"),
    }
    Ok(())
}

// TCP

/// Listens on every local address and announces connections as they are accepted
fn a_handler(stack: &Arc<NetworkStack>, args: Vec<String>) -> CmdResult {
    let port: u16 = arg(&args, 0, "port")?;
    let listener = stack
        .tcp
        .listen(Ipv4Addr::UNSPECIFIED, port, ACCEPT_BACKLOG)
        .map_err(|e| e.to_string())?;
    println!("Listening on port {port} (socket {listener})");
    let stack = Arc::clone(stack);
    thread::spawn(move || loop {
        match stack.tcp.accept(listener) {
            Ok(Some(sid)) => println!("New connection on socket {sid}"),
            Ok(None) => thread::sleep(Duration::from_millis(10)),
            Err(_) => break,
        }
    });
    Ok(())
}

fn c_handler(stack: &Arc<NetworkStack>, args: Vec<String>) -> CmdResult {
    let dst: Ipv4Addr = arg(&args, 0, "IPv4 address")?;
    let port: u16 = arg(&args, 1, "port")?;
    let sid = stack.connect(dst, port).map_err(|e| e.to_string())?;
    println!("Created socket {sid}");
    Ok(())
}

fn ls_handler(stack: &Arc<NetworkStack>, _args: Vec<String>) -> CmdResult {
    println!("{:<5} {:<22} {:<22} {}", "SID", "Local", "Remote", "Status");
    for row in stack.tcp.list() {
        let remote = row.remote.map_or_else(|| String::from("*"), |r| r.to_string());
        println!("{:<5} {:<22} {:<22} {}", row.id, row.local.to_string(), remote, row.state);
    }
    Ok(())
}

fn s_handler(stack: &Arc<NetworkStack>, args: Vec<String>) -> CmdResult {
    let sid: SocketId = arg(&args, 0, "socket id")?;
    let message = args[1..].join(" ");
    let sent = stack.tcp.send(sid, message.as_bytes()).map_err(|e| e.to_string())?;
    println!("Sent {sent} bytes");
    Ok(())
}

fn r_handler(stack: &Arc<NetworkStack>, args: Vec<String>) -> CmdResult {
    let sid: SocketId = arg(&args, 0, "socket id")?;
    let len: usize = arg(&args, 1, "byte count")?;
    let mut buf = vec![0u8; len];
    let read = stack.tcp.recv(sid, &mut buf).map_err(|e| e.to_string())?;
    println!("Read {read} bytes: {}", String::from_utf8_lossy(&buf[..read]));
    Ok(())
}

fn sf_handler(stack: &Arc<NetworkStack>, args: Vec<String>) -> CmdResult {
    stack.tcp.shutdown_write(arg(&args, 0, "socket id")?).map_err(|e| e.to_string())
}

fn cl_handler(stack: &Arc<NetworkStack>, args: Vec<String>) -> CmdResult {
    stack.tcp.close(arg(&args, 0, "socket id")?).map_err(|e| e.to_string())
}

fn cc_handler(stack: &Arc<NetworkStack>, args: Vec<String>) -> CmdResult {
    let sid: SocketId = arg(&args, 0, "socket id")?;
    let algorithm: CongestionControl = args[1].parse().map_err(|e: netstack::NetError| e.to_string())?;
    stack.tcp.set_congestion_control(sid, algorithm).map_err(|e| e.to_string())
}
