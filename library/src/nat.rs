use crate::prelude::*;
use crate::utils::*;

pub const MAX_NAT_RULES: usize = 1024;

/// Static internal <-> external mapping. Keyed by (internal ip, internal port, protocol).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatRule {
    pub internal: SocketAddrV4,
    pub external: SocketAddrV4,
    pub protocol: IpNumber,
    pub timestamp: u64,
}

impl NatRule {
    fn key_eq(&self, internal: SocketAddrV4, protocol: IpNumber) -> bool {
        self.internal == internal && self.protocol == protocol
    }
}

#[derive(Debug, Default)]
pub struct NatTable {
    init: InitFlag,
    rules: Mutex<Vec<NatRule>>,
}

impl NatTable {
    pub fn new() -> NatTable {
        NatTable::default()
    }
    pub fn init(&self) -> Result<()> {
        self.init.raise("nat")?;
        self.rules.lock().clear();
        Ok(())
    }
    pub fn shutdown(&self) -> Result<()> {
        self.init.lower("nat")?;
        self.rules.lock().clear();
        Ok(())
    }

    /// Adds a mapping. Re-adding an existing key replaces its external side and timestamp.
    pub fn add_rule(&self, internal: SocketAddrV4, external: SocketAddrV4, protocol: IpNumber) -> Result<()> {
        let mut rules = self.rules.lock();
        if let Some(rule) = rules.iter_mut().find(|r| r.key_eq(internal, protocol)) {
            rule.external = external;
            rule.timestamp = timestamp();
            return Ok(());
        }
        if rules.len() >= MAX_NAT_RULES {
            return Err(NetError::full("NAT", MAX_NAT_RULES));
        }
        rules.push(NatRule { internal, external, protocol, timestamp: timestamp() });
        debug!("nat {internal} <-> {external} proto {}", protocol.0);
        Ok(())
    }
    pub fn remove_rule(&self, internal: SocketAddrV4, protocol: IpNumber) -> Result<()> {
        let mut rules = self.rules.lock();
        match rules.iter().position(|r| r.key_eq(internal, protocol)) {
            Some(i) => {
                rules.remove(i);
                Ok(())
            }
            None => Err(NetError::not_found(format!("NAT rule for {internal} proto {}", protocol.0))),
        }
    }
    pub fn lookup_internal(&self, internal: SocketAddrV4, protocol: IpNumber) -> Option<NatRule> {
        self.rules.lock().iter().find(|r| r.key_eq(internal, protocol)).cloned()
    }
    pub fn lookup_external(&self, external: SocketAddrV4, protocol: IpNumber) -> Option<NatRule> {
        self.rules
            .lock()
            .iter()
            .find(|r| r.external == external && r.protocol == protocol)
            .cloned()
    }
    pub fn rules(&self) -> Vec<NatRule> {
        self.rules.lock().clone()
    }
    pub fn len(&self) -> usize {
        self.rules.lock().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sa(s: &str) -> SocketAddrV4 {
        s.parse().unwrap()
    }

    #[test]
    fn the_1025th_rule_is_refused() {
        let nat = NatTable::new();
        for port in 0..MAX_NAT_RULES as u16 {
            let internal = SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 2), port);
            let external = SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 10000 + port);
            nat.add_rule(internal, external, IpNumber::TCP).unwrap();
        }
        let err = nat.add_rule(sa("192.168.0.3:1"), sa("1.2.3.4:1"), IpNumber::TCP);
        assert!(matches!(err, Err(NetError::ResourceExhausted { table: "NAT", capacity: 1024 })));
        assert_eq!(nat.len(), MAX_NAT_RULES);
    }

    #[test]
    fn key_includes_protocol() {
        let nat = NatTable::new();
        nat.add_rule(sa("192.168.0.2:53"), sa("1.2.3.4:53"), IpNumber::UDP).unwrap();
        nat.add_rule(sa("192.168.0.2:53"), sa("1.2.3.4:5353"), IpNumber::TCP).unwrap();
        assert_eq!(nat.len(), 2);
        nat.remove_rule(sa("192.168.0.2:53"), IpNumber::UDP).unwrap();
        assert!(matches!(nat.remove_rule(sa("192.168.0.2:53"), IpNumber::UDP), Err(NetError::NotFound(_))));
        assert_eq!(nat.lookup_internal(sa("192.168.0.2:53"), IpNumber::TCP).unwrap().external, sa("1.2.3.4:5353"));
    }

    #[test]
    fn re_adding_a_key_refreshes_it() {
        let nat = NatTable::new();
        nat.add_rule(sa("192.168.0.2:80"), sa("1.2.3.4:8080"), IpNumber::TCP).unwrap();
        let first = nat.rules()[0].timestamp;
        nat.add_rule(sa("192.168.0.2:80"), sa("1.2.3.4:9090"), IpNumber::TCP).unwrap();
        assert_eq!(nat.len(), 1);
        let rule = nat.lookup_external(sa("1.2.3.4:9090"), IpNumber::TCP).unwrap();
        assert!(rule.timestamp > first);
    }
}
