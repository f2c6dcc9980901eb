mod common;

use common::loopback_stack;
use netstack::driver::LoopbackDriver;
use netstack::firewall::{FirewallAction, FiveTuple};
use netstack::stack::{StackStatus, MAX_DRIVERS};
use netstack::{NetError, NetworkStack, StackConfig};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

#[test]
fn init_and_shutdown() {
    let stack = NetworkStack::new();
    assert_eq!(stack.get_status(), StackStatus::Stopped);
    assert!(matches!(stack.poll(), Err(NetError::NotInitialized(_))));
    stack.init(StackConfig::default()).unwrap();
    assert!(matches!(stack.init(StackConfig::default()), Err(NetError::AlreadyInitialized(_))));
    assert_eq!(stack.get_status(), StackStatus::Running);
    stack.shutdown().unwrap();
    stack.shutdown().unwrap();
    assert_eq!(stack.get_status(), StackStatus::Stopped);
    // a stopped stack can be brought back up
    stack.init(StackConfig::default()).unwrap();
    assert_eq!(stack.get_driver_count(), 0);
    assert!(stack.check_health().healthy());
}

#[test]
fn driver_table_holds_thirty_two() {
    let stack = NetworkStack::new();
    stack.init(StackConfig::default()).unwrap();
    for i in 0..MAX_DRIVERS {
        stack.register_driver(Arc::new(LoopbackDriver::new(&format!("lo{i}")))).unwrap();
    }
    let extra = stack.register_driver(Arc::new(LoopbackDriver::new("one-too-many")));
    assert!(matches!(extra, Err(NetError::ResourceExhausted { .. })));
    // a repeated name is not a new driver
    stack.register_driver(Arc::new(LoopbackDriver::new("lo0"))).unwrap();
    assert_eq!(stack.get_driver_count(), MAX_DRIVERS);

    stack.unregister_driver("lo3").unwrap();
    assert!(stack.get_driver("lo3").is_none());
    assert!(matches!(stack.unregister_driver("lo3"), Err(NetError::NotFound(_))));
}

#[test]
fn route_table_capacity() {
    let (stack, _lo) = loopback_stack();
    let mask = Ipv4Addr::new(255, 255, 255, 0);
    // the loopback route already holds one slot
    for i in 1..256u32 {
        let dst = Ipv4Addr::new(10, (i >> 8) as u8, i as u8, 0);
        stack.routes.add_route(dst, mask, Ipv4Addr::UNSPECIFIED, "lo").unwrap();
    }
    assert_eq!(stack.routes.len(), 256);
    let overflow = stack.routes.add_route(Ipv4Addr::new(11, 0, 0, 0), mask, Ipv4Addr::UNSPECIFIED, "lo");
    assert!(matches!(overflow, Err(NetError::ResourceExhausted { .. })));
    // updating an existing prefix still works when full
    stack.routes.add_route(Ipv4Addr::new(10, 0, 1, 0), mask, Ipv4Addr::new(10, 0, 1, 1), "lo").unwrap();
    assert_eq!(stack.routes.len(), 256);
}

#[test]
fn nat_table_capacity() {
    let (stack, _lo) = loopback_stack();
    let external = SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 1), 80);
    for port in 0..1024u16 {
        let internal = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 1000 + port);
        stack.nat.add_rule(internal, external, etherparse::IpNumber::TCP).unwrap();
    }
    let overflow = stack.nat.add_rule(
        SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 1),
        external,
        etherparse::IpNumber::TCP,
    );
    assert!(matches!(overflow, Err(NetError::ResourceExhausted { .. })));
    assert_eq!(stack.get_security_status().nat_rules, 1024);
}

#[test]
fn firewall_ids_are_never_reused() {
    let (stack, _lo) = loopback_stack();
    let any = FiveTuple {
        src_ip: Ipv4Addr::UNSPECIFIED,
        dst_ip: Ipv4Addr::UNSPECIFIED,
        src_port: 0,
        dst_port: 0,
        protocol: etherparse::IpNumber(0),
    };
    let first = stack.firewall.add_rule(any, FirewallAction::Allow).unwrap();
    let second = stack.firewall.add_rule(any, FirewallAction::Deny).unwrap();
    assert!(second > first);
    stack.firewall.remove_rule(second).unwrap();
    let third = stack.firewall.add_rule(any, FirewallAction::Deny).unwrap();
    assert!(third > second);
    assert!(stack.firewall.remove_rule(second).is_err());
}
