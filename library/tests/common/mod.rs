#![allow(dead_code)]

use netstack::driver::LoopbackDriver;
use netstack::interface::{InterfaceConfig, InterfaceType};
use netstack::router::Route;
use netstack::{NetworkStack, StackConfig};
use std::net::Ipv4Addr;
use std::sync::Arc;

pub const LO: Ipv4Addr = Ipv4Addr::LOCALHOST;

/// A running stack with one interface, `lo` at 127.0.0.1/8, on a loopback driver
pub fn loopback_stack() -> (NetworkStack, Arc<LoopbackDriver>) {
    let stack = NetworkStack::new();
    stack.init(StackConfig::default()).unwrap();
    let lo = Arc::new(LoopbackDriver::new("lo"));
    stack.register_driver(lo.clone()).unwrap();

    let mut config = InterfaceConfig::new("lo");
    config.if_type = InterfaceType::Loopback;
    config.addr = Some("127.0.0.1/8".parse().unwrap());
    stack.configure_interface(config).unwrap();
    let local = Route::local("127.0.0.0/8".parse().unwrap(), "lo");
    stack.routes.add_route(local.dst, local.mask, local.gateway, &local.interface).unwrap();
    (stack, lo)
}

/// Polls until `done` holds, at most 100 rounds
pub fn pump_until(stack: &NetworkStack, mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        stack.poll().unwrap();
        if done() {
            return true;
        }
    }
    false
}
