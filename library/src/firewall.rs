use crate::prelude::*;
use crate::utils::*;

pub const MAX_FIREWALL_RULES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirewallAction {
    Deny = 0,
    Allow = 1,
}

impl fmt::Display for FirewallAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirewallAction::Deny => write!(f, "deny"),
            FirewallAction::Allow => write!(f, "allow"),
        }
    }
}

/// Flow identity. In a rule, 0.0.0.0, port 0 and protocol 0 are wildcards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiveTuple {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: IpNumber,
}

impl FiveTuple {
    fn covers(&self, flow: &FiveTuple) -> bool {
        (self.src_ip.is_unspecified() || self.src_ip == flow.src_ip)
            && (self.dst_ip.is_unspecified() || self.dst_ip == flow.dst_ip)
            && (self.src_port == 0 || self.src_port == flow.src_port)
            && (self.dst_port == 0 || self.dst_port == flow.dst_port)
            && (self.protocol.0 == 0 || self.protocol == flow.protocol)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallRule {
    pub rule_id: u32,
    pub matcher: FiveTuple,
    pub action: FirewallAction,
}

#[derive(Debug)]
pub struct Firewall {
    init: InitFlag,
    rules: Mutex<Vec<FirewallRule>>,
    next_rule_id: AtomicU32,
}

impl Default for Firewall {
    fn default() -> Self {
        Firewall {
            init: InitFlag::new(),
            rules: Mutex::new(Vec::new()),
            next_rule_id: AtomicU32::new(1),
        }
    }
}

impl Firewall {
    pub fn new() -> Firewall {
        Firewall::default()
    }
    /// Clears the rule set and restarts rule IDs at 1
    pub fn init(&self) -> Result<()> {
        self.init.raise("firewall")?;
        self.rules.lock().clear();
        self.next_rule_id.store(1, Ordering::SeqCst);
        Ok(())
    }
    pub fn shutdown(&self) -> Result<()> {
        self.init.lower("firewall")?;
        self.rules.lock().clear();
        Ok(())
    }

    /// Appends a rule and returns its ID. IDs are never reused.
    pub fn add_rule(&self, matcher: FiveTuple, action: FirewallAction) -> Result<u32> {
        let mut rules = self.rules.lock();
        if rules.len() >= MAX_FIREWALL_RULES {
            return Err(NetError::full("firewall", MAX_FIREWALL_RULES));
        }
        let rule_id = self.next_rule_id.fetch_add(1, Ordering::SeqCst);
        rules.push(FirewallRule { rule_id, matcher, action });
        debug!("firewall rule {rule_id}: {action} {matcher:?}");
        Ok(rule_id)
    }
    pub fn remove_rule(&self, rule_id: u32) -> Result<()> {
        let mut rules = self.rules.lock();
        match rules.iter().position(|r| r.rule_id == rule_id) {
            Some(i) => {
                rules.remove(i);
                Ok(())
            }
            None => Err(NetError::not_found(format!("firewall rule {rule_id}"))),
        }
    }
    /// First matching rule in ID order decides; unmatched flows are allowed
    pub fn evaluate(&self, flow: &FiveTuple) -> FirewallAction {
        self.rules
            .lock()
            .iter()
            .find(|r| r.matcher.covers(flow))
            .map_or(FirewallAction::Allow, |r| r.action)
    }
    pub fn rules(&self) -> Vec<FirewallRule> {
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

    fn flow(dst_port: u16) -> FiveTuple {
        FiveTuple {
            src_ip: Ipv4Addr::new(10, 0, 0, 2),
            dst_ip: Ipv4Addr::new(10, 0, 0, 1),
            src_port: 40000,
            dst_port,
            protocol: IpNumber::TCP,
        }
    }

    fn any_to_port(port: u16) -> FiveTuple {
        FiveTuple {
            src_ip: Ipv4Addr::UNSPECIFIED,
            dst_ip: Ipv4Addr::UNSPECIFIED,
            src_port: 0,
            dst_port: port,
            protocol: IpNumber::TCP,
        }
    }

    #[test]
    fn ids_start_at_one_and_are_never_reused() {
        let fw = Firewall::new();
        fw.init().unwrap();
        assert_eq!(fw.add_rule(any_to_port(22), FirewallAction::Deny).unwrap(), 1);
        assert_eq!(fw.add_rule(any_to_port(23), FirewallAction::Deny).unwrap(), 2);
        assert_eq!(fw.add_rule(any_to_port(80), FirewallAction::Allow).unwrap(), 3);
        fw.remove_rule(1).unwrap();
        assert_eq!(fw.add_rule(any_to_port(22), FirewallAction::Deny).unwrap(), 4);
        assert!(matches!(fw.remove_rule(1), Err(NetError::NotFound(_))));
    }

    #[test]
    fn first_match_wins_and_default_allows() {
        let fw = Firewall::new();
        fw.add_rule(any_to_port(23), FirewallAction::Deny).unwrap();
        fw.add_rule(any_to_port(0), FirewallAction::Allow).unwrap();
        assert_eq!(fw.evaluate(&flow(23)), FirewallAction::Deny);
        assert_eq!(fw.evaluate(&flow(80)), FirewallAction::Allow);

        let fw = Firewall::new();
        assert_eq!(fw.evaluate(&flow(23)), FirewallAction::Allow);
    }

    #[test]
    fn capacity_is_enforced() {
        let fw = Firewall::new();
        for _ in 0..MAX_FIREWALL_RULES {
            fw.add_rule(any_to_port(1), FirewallAction::Deny).unwrap();
        }
        assert!(matches!(
            fw.add_rule(any_to_port(1), FirewallAction::Deny),
            Err(NetError::ResourceExhausted { table: "firewall", .. })
        ));
    }

    #[test]
    fn init_restarts_ids() {
        let fw = Firewall::new();
        fw.init().unwrap();
        fw.add_rule(any_to_port(1), FirewallAction::Deny).unwrap();
        fw.shutdown().unwrap();
        fw.init().unwrap();
        assert!(fw.is_empty());
        assert_eq!(fw.add_rule(any_to_port(1), FirewallAction::Deny).unwrap(), 1);
    }
}
