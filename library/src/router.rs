use crate::prelude::*;
use crate::utils::*;

pub const MAX_ROUTES: usize = 256;

pub type RoutingTable = Vec<Route>;

/// Static route keyed by (dst, mask)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub dst: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gateway: Ipv4Addr, // 0.0.0.0 for on-link destinations
    pub interface: String,
}

impl Route {
    pub fn new(dst: Ipv4Addr, mask: Ipv4Addr, gateway: Ipv4Addr, interface: &str) -> Route {
        Route { dst, mask, gateway, interface: interface.to_string() }
    }
    /// Route covering the network of `net`, on-link through `interface`
    pub fn local(net: Ipv4Net, interface: &str) -> Route {
        Route::new(net.network(), net.netmask(), Ipv4Addr::UNSPECIFIED, interface)
    }
    pub fn prefix(&self) -> Result<Ipv4Net> {
        let len = mask_to_prefix(self.mask)?;
        Ipv4Net::new(self.dst, len).map_err(|e| NetError::invalid(e.to_string()))
    }
    pub fn matches(&self, addr: Ipv4Addr) -> bool {
        let mask = u32::from(self.mask);
        u32::from(addr) & mask == u32::from(self.dst) & mask
    }
    fn key_eq(&self, dst: Ipv4Addr, mask: Ipv4Addr) -> bool {
        self.dst == dst && self.mask == mask
    }
    /// Next hop for `addr`: the gateway, or the address itself when on-link
    pub fn next_hop(&self, addr: Ipv4Addr) -> Ipv4Addr {
        if self.gateway.is_unspecified() {
            addr
        } else {
            self.gateway
        }
    }
}

#[derive(Debug, Default)]
pub struct RouteTable {
    init: InitFlag,
    routes: Mutex<RoutingTable>,
}

impl RouteTable {
    pub fn new() -> RouteTable {
        RouteTable::default()
    }
    pub fn init(&self) -> Result<()> {
        self.init.raise("routing")?;
        self.routes.lock().clear();
        Ok(())
    }
    pub fn shutdown(&self) -> Result<()> {
        self.init.lower("routing")?;
        self.routes.lock().clear();
        Ok(())
    }

    /// Inserts a route, or updates gateway and interface in place when (dst, mask) exists
    pub fn add_route(&self, dst: Ipv4Addr, mask: Ipv4Addr, gateway: Ipv4Addr, interface: &str) -> Result<()> {
        if interface.is_empty() {
            return Err(NetError::invalid("route needs an interface"));
        }
        mask_to_prefix(mask)?;
        let mut routes = self.routes.lock();
        if let Some(route) = routes.iter_mut().find(|r| r.key_eq(dst, mask)) {
            route.gateway = gateway;
            route.interface = interface.to_string();
            debug!("updated route {dst}/{mask} via {gateway} dev {interface}");
            return Ok(());
        }
        if routes.len() >= MAX_ROUTES {
            return Err(NetError::full("route", MAX_ROUTES));
        }
        routes.push(Route::new(dst, mask, gateway, interface));
        debug!("added route {dst}/{mask} via {gateway} dev {interface}");
        Ok(())
    }
    pub fn remove_route(&self, dst: Ipv4Addr, mask: Ipv4Addr) -> Result<()> {
        let mut routes = self.routes.lock();
        match routes.iter().position(|r| r.key_eq(dst, mask)) {
            Some(i) => {
                routes.remove(i);
                Ok(())
            }
            None => Err(NetError::not_found(format!("route {dst}/{mask}"))),
        }
    }
    /// Longest-prefix match
    pub fn lookup(&self, addr: Ipv4Addr) -> Option<Route> {
        let routes = self.routes.lock();
        let mut current_longest: Option<&Route> = None;
        for route in routes.iter().filter(|r| r.matches(addr)) {
            match current_longest {
                Some(curr) if u32::from(curr.mask).count_ones() >= u32::from(route.mask).count_ones() => {}
                _ => current_longest = Some(route),
            }
        }
        current_longest.cloned()
    }
    pub fn routes(&self) -> RoutingTable {
        self.routes.lock().clone()
    }
    pub fn len(&self) -> usize {
        self.routes.lock().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Drops every route through `interface`
    pub fn remove_interface(&self, interface: &str) -> usize {
        let mut routes = self.routes.lock();
        let before = routes.len();
        routes.retain(|r| r.interface != interface);
        before - routes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn upsert_keeps_keys_unique() {
        let table = RouteTable::new();
        table.add_route(ip("10.0.0.0"), ip("255.255.255.0"), ip("0.0.0.0"), "if0").unwrap();
        table.add_route(ip("10.0.0.0"), ip("255.255.255.0"), ip("10.0.0.254"), "if1").unwrap();
        assert_eq!(table.len(), 1);
        let route = &table.routes()[0];
        assert_eq!(route.gateway, ip("10.0.0.254"));
        assert_eq!(route.interface, "if1");
    }

    #[test]
    fn capacity_is_enforced() {
        let table = RouteTable::new();
        for i in 0..MAX_ROUTES as u32 {
            table.add_route(Ipv4Addr::from(i << 8), ip("255.255.255.0"), ip("0.0.0.0"), "if0").unwrap();
        }
        let err = table.add_route(ip("192.168.255.0"), ip("255.255.255.0"), ip("0.0.0.0"), "if0");
        assert!(matches!(err, Err(NetError::ResourceExhausted { table: "route", capacity: 256 })));
        // updates of existing keys still go through on a full table
        table.add_route(Ipv4Addr::from(0u32), ip("255.255.255.0"), ip("1.1.1.1"), "if0").unwrap();
    }

    #[test]
    fn remove_needs_exact_key() {
        let table = RouteTable::new();
        table.add_route(ip("10.0.0.0"), ip("255.0.0.0"), ip("0.0.0.0"), "if0").unwrap();
        assert!(matches!(table.remove_route(ip("10.0.0.0"), ip("255.255.0.0")), Err(NetError::NotFound(_))));
        table.remove_route(ip("10.0.0.0"), ip("255.0.0.0")).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn lookup_prefers_longest_prefix() {
        let table = RouteTable::new();
        table.add_route(ip("0.0.0.0"), ip("0.0.0.0"), ip("10.0.0.254"), "if0").unwrap();
        table.add_route(ip("10.1.0.0"), ip("255.255.0.0"), ip("0.0.0.0"), "if1").unwrap();
        table.add_route(ip("10.1.2.0"), ip("255.255.255.0"), ip("0.0.0.0"), "if2").unwrap();
        assert_eq!(table.lookup(ip("10.1.2.3")).unwrap().interface, "if2");
        assert_eq!(table.lookup(ip("10.1.9.9")).unwrap().interface, "if1");
        let default = table.lookup(ip("8.8.8.8")).unwrap();
        assert_eq!(default.interface, "if0");
        assert_eq!(default.next_hop(ip("8.8.8.8")), ip("10.0.0.254"));
    }

    #[test]
    fn bad_masks_and_names_are_rejected() {
        let table = RouteTable::new();
        assert!(table.add_route(ip("10.0.0.0"), ip("255.0.255.0"), ip("0.0.0.0"), "if0").is_err());
        assert!(table.add_route(ip("10.0.0.0"), ip("255.0.0.0"), ip("0.0.0.0"), "").is_err());
    }

    #[test]
    fn local_route_from_prefix() {
        let route = Route::local("10.0.0.1/24".parse().unwrap(), "if0");
        assert_eq!(route.dst, ip("10.0.0.0"));
        assert_eq!(route.mask, ip("255.255.255.0"));
        assert_eq!(route.prefix().unwrap(), "10.0.0.0/24".parse::<Ipv4Net>().unwrap());
    }
}
