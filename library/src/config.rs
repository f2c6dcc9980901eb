use crate::ethernet::{mac_for_ip, string_to_mac};
use crate::firewall::{FirewallAction, FiveTuple};
use crate::flags::{flag_by_name, Features, SecurityCaps};
use crate::interface::InterfaceConfig;
use crate::link::UdpLinkDriver;
use crate::prelude::*;
use crate::router::Route;
use crate::stack::{NetworkStack, StackConfig};
use netcfg::{Action, NodeConfig};

fn stack_config(config_info: &NodeConfig) -> Result<StackConfig> {
    let mut config = StackConfig::default();
    for (key, value) in &config_info.stack {
        let value = *value;
        let too_big = || NetError::invalid(format!("stack {key} {value} is out of range"));
        match key.as_str() {
            "max_interfaces" => config.max_interfaces = usize::try_from(value).map_err(|_| too_big())?,
            "max_connections" => config.max_connections = usize::try_from(value).map_err(|_| too_big())?,
            "max_sockets" => config.max_sockets = usize::try_from(value).map_err(|_| too_big())?,
            "buffer_size" => config.buffer_size = usize::try_from(value).map_err(|_| too_big())?,
            "queue_size" => config.queue_size = usize::try_from(value).map_err(|_| too_big())?,
            "timeout_ms" => config.timeout_ms = value,
            "retry_count" => config.retry_count = u32::try_from(value).map_err(|_| too_big())?,
            "performance_level" => config.performance_level = u32::try_from(value).map_err(|_| too_big())?,
            other => return Err(NetError::invalid(format!("unknown stack setting {other}"))),
        }
    }
    for name in &config_info.features {
        config.features |= flag_by_name::<Features>(name)?;
    }
    for name in &config_info.security {
        config.security_level |= flag_by_name::<SecurityCaps>(name)?;
    }
    Ok(config)
}

/// Binds one UDP link per interface and configures the matching stack interface on it
fn init_interfaces(stack: &NetworkStack, config_info: &NodeConfig) -> Result<()> {
    for inter_conf in &config_info.interfaces {
        let neighbors: HashMap<Ipv4Addr, SocketAddr> = config_info
            .neighbors_of(&inter_conf.name)
            .map(|neigh| (neigh.dest_addr, neigh.udp_addr))
            .collect();
        let link = UdpLinkDriver::bind(&inter_conf.name, inter_conf.udp_addr, neighbors)?;
        stack.register_driver(Arc::new(link))?;

        let mut inter = InterfaceConfig::new(&inter_conf.name);
        inter.addr = Some(inter_conf.assigned);
        inter.mac = match &inter_conf.mac {
            Some(mac) => string_to_mac(mac)?,
            None => mac_for_ip(inter_conf.assigned.addr()),
        };
        if let Some(mtu) = inter_conf.mtu {
            inter.mtu = mtu;
        }
        stack.configure_interface(inter)?;

        let local = Route::local(inter_conf.assigned.trunc(), &inter_conf.name);
        stack.routes.add_route(local.dst, local.mask, local.gateway, &local.interface)?;
    }
    Ok(())
}

fn add_static_routes(stack: &NetworkStack, config_info: &NodeConfig) -> Result<()> {
    for route in &config_info.routes {
        stack
            .routes
            .add_route(route.prefix.network(), route.prefix.netmask(), route.gateway, &route.interface_name)?;
    }
    Ok(())
}

fn add_policy(stack: &NetworkStack, config_info: &NodeConfig) -> Result<()> {
    for rule in &config_info.nat_rules {
        stack.nat.add_rule(rule.internal, rule.external, IpNumber(rule.protocol.number()))?;
    }
    for rule in &config_info.firewall_rules {
        let matcher = FiveTuple {
            src_ip: *rule.src.ip(),
            dst_ip: *rule.dst.ip(),
            src_port: rule.src.port(),
            dst_port: rule.dst.port(),
            protocol: IpNumber(rule.protocol.number()),
        };
        let action = match rule.action {
            Action::Allow => FirewallAction::Allow,
            Action::Deny => FirewallAction::Deny,
        };
        stack.firewall.add_rule(matcher, action)?;
    }
    Ok(())
}

/// Builds a running stack from a parsed node configuration. Nothing is left running on failure.
pub fn initialize(config_info: NodeConfig) -> Result<NetworkStack> {
    let stack = NetworkStack::new();
    stack.init(stack_config(&config_info)?)?;
    let populated = init_interfaces(&stack, &config_info)
        .and_then(|_| add_static_routes(&stack, &config_info))
        .and_then(|_| add_policy(&stack, &config_info));
    if let Err(e) = populated {
        error!("node configuration rejected: {e}");
        stack.shutdown()?;
        return Err(e);
    }
    info!(
        "node up with {} interfaces and {} routes",
        stack.get_interface_count(),
        stack.routes.len()
    );
    Ok(stack)
}
