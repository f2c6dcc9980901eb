mod common;

use common::{loopback_stack, pump_until, LO};
use netstack::firewall::{FirewallAction, FiveTuple};
use netstack::flags::Features;
use netstack::interface::InterfaceStatus;
use netstack::tcp_utils::TcpState;
use std::net::{Ipv4Addr, SocketAddrV4};

#[test]
fn tcp_handshake_and_data_over_loopback() {
    let (stack, _lo) = loopback_stack();
    let listener = stack.tcp.listen(LO, 8080, 4).unwrap();
    let client = stack.connect(LO, 8080).unwrap();
    assert_eq!(stack.tcp.state(client), TcpState::SynSent);

    let mut server = None;
    assert!(pump_until(&stack, || {
        server = stack.tcp.accept(listener).unwrap();
        server.is_some()
    }));
    let server = server.unwrap();
    assert!(pump_until(&stack, || stack.tcp.state(client) == TcpState::Established));
    assert_eq!(stack.tcp.state(server), TcpState::Established);

    let msg = b"hello over loopback";
    assert_eq!(stack.tcp.send(client, msg).unwrap(), msg.len());
    let mut received = Vec::new();
    assert!(pump_until(&stack, || {
        let mut buf = [0u8; 64];
        let n = stack.tcp.recv(server, &mut buf).unwrap();
        received.extend_from_slice(&buf[..n]);
        received.len() >= msg.len()
    }));
    assert_eq!(received, msg);

    stack.tcp.shutdown_write(client).unwrap();
    assert!(pump_until(&stack, || stack.tcp.state(server) == TcpState::CloseWait));
    assert_eq!(stack.tcp.connection_count(), 2);

    stack.tcp.close(listener).unwrap();
    stack.tcp.close(client).unwrap();
    assert!(stack.tcp.close(client).is_err());
    stack.shutdown().unwrap();
}

/// Opens a connection over `lo` and returns (client, accepted server)
fn connected_pair(stack: &netstack::NetworkStack, port: u16) -> (u32, u32) {
    let listener = stack.tcp.listen(LO, port, 4).unwrap();
    let client = stack.connect(LO, port).unwrap();
    let mut server = None;
    assert!(pump_until(stack, || {
        server = stack.tcp.accept(listener).unwrap();
        server.is_some()
    }));
    assert!(pump_until(stack, || stack.tcp.state(client) == TcpState::Established));
    (client, server.unwrap())
}

#[test]
fn small_mtu_stream_arrives_whole() {
    let (stack, _lo) = loopback_stack();
    let mut config = stack.get_interface("lo").unwrap().config;
    config.mtu = 576;
    stack.configure_interface(config).unwrap();

    let (client, server) = connected_pair(&stack, 8081);
    assert_eq!(stack.tcp.info(client).unwrap().mss, 536);
    assert_eq!(stack.tcp.info(server).unwrap().mss, 536);

    let data = vec![7u8; 2000];
    assert_eq!(stack.tcp.send(client, &data).unwrap(), 2000);
    let mut received = Vec::new();
    assert!(pump_until(&stack, || {
        let mut buf = [0u8; 4096];
        let n = stack.tcp.recv(server, &mut buf).unwrap();
        received.extend_from_slice(&buf[..n]);
        received.len() >= data.len()
    }));
    assert_eq!(received, data);
    assert_eq!(stack.get_stats().dropped, 0);
}

#[test]
fn finished_connections_leave_the_table() {
    let (stack, _lo) = loopback_stack();
    let (client, server) = connected_pair(&stack, 8082);
    stack.tcp.shutdown_write(client).unwrap();
    assert!(pump_until(&stack, || stack.tcp.state(server) == TcpState::CloseWait));
    assert!(matches!(stack.tcp.send(server, b"x"), Err(netstack::NetError::StateViolation(_))));
    stack.tcp.shutdown_write(server).unwrap();
    assert!(pump_until(&stack, || stack.tcp.connection_count() == 0));
    assert_eq!(stack.tcp.state(client), TcpState::Closed);
}

#[test]
fn ping_is_answered_by_the_stack_itself() {
    let (stack, _lo) = loopback_stack();
    let sequence = stack.ping(LO).unwrap();
    let mut replies = Vec::new();
    assert!(pump_until(&stack, || {
        replies.extend(stack.icmp.take_replies());
        !replies.is_empty()
    }));
    assert_eq!(replies[0].from, LO);
    assert_eq!(replies[0].sequence, sequence);
    assert_eq!(replies[0].data_len, 64);
    assert!(stack.get_stats().packets_sent >= 2);
}

#[test]
fn udp_datagram_reaches_bound_port() {
    let (stack, _lo) = loopback_stack();
    stack.udp.bind(5000).unwrap();
    stack.udp_send(6000, SocketAddrV4::new(LO, 5000), b"datagram").unwrap();
    let mut got = None;
    assert!(pump_until(&stack, || {
        got = stack.udp.recv_from(5000).unwrap();
        got.is_some()
    }));
    let datagram = got.unwrap();
    assert_eq!(datagram.data, b"datagram");
    assert_eq!(datagram.src, SocketAddrV4::new(LO, 6000));
}

#[test]
fn firewall_drops_only_when_enabled() {
    let (stack, _lo) = loopback_stack();
    stack.udp.bind(5000).unwrap();
    let deny = FiveTuple {
        src_ip: Ipv4Addr::UNSPECIFIED,
        dst_ip: Ipv4Addr::UNSPECIFIED,
        src_port: 0,
        dst_port: 5000,
        protocol: etherparse::IpNumber::UDP,
    };
    stack.firewall.add_rule(deny, FirewallAction::Deny).unwrap();

    // rule is ignored until the feature is on
    stack.udp_send(6000, SocketAddrV4::new(LO, 5000), b"one").unwrap();
    assert!(pump_until(&stack, || stack.udp.recv_from(5000).unwrap().is_some()));

    stack.enable_feature(Features::FIREWALL);
    let dropped_before = stack.get_stats().dropped;
    stack.udp_send(6000, SocketAddrV4::new(LO, 5000), b"two").unwrap();
    for _ in 0..5 {
        stack.poll().unwrap();
    }
    assert!(stack.udp.recv_from(5000).unwrap().is_none());
    assert_eq!(stack.get_stats().dropped, dropped_before + 1);
}

#[test]
fn downed_interface_carries_nothing() {
    let (stack, lo) = loopback_stack();
    stack.set_interface_state("lo", InterfaceStatus::Down).unwrap();
    assert!(!stack.is_local_addr(LO));
    stack.ping(LO).unwrap();
    for _ in 0..5 {
        stack.poll().unwrap();
    }
    assert!(stack.icmp.take_replies().is_empty());
    assert_eq!(lo.pending(), 0);

    stack.set_interface_state("lo", InterfaceStatus::Up).unwrap();
    stack.ping(LO).unwrap();
    assert!(pump_until(&stack, || !stack.icmp.take_replies().is_empty()));
}

#[test]
fn unrouted_destination_is_an_error() {
    let (stack, _lo) = loopback_stack();
    assert!(stack.ping(Ipv4Addr::new(192, 0, 2, 1)).is_err());
    assert!(stack.connect(Ipv4Addr::new(192, 0, 2, 1), 80).is_err());
}
