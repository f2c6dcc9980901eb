use crate::ethernet::{Duplex, FlowControl, DEFAULT_MTU};
use crate::flags::{LinkFeatures, OffloadCaps};
use crate::interface::InterfaceStats;
use crate::prelude::*;

/// Tunable link parameters a driver exposes through get/set config
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    pub mtu: u16,
    pub speed_mbps: u32,
    pub duplex: Duplex,
    pub flow_control: FlowControl,
    pub promiscuous: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            mtu: DEFAULT_MTU,
            speed_mbps: 1000,
            duplex: Duplex::Full,
            flow_control: FlowControl::None,
            promiscuous: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Closed,
    Open,
    Suspended,
}

/// Capability set every network driver provides to the stack.
///
/// Frames passed to `transmit` and returned by `receive` are complete Ethernet II frames.
/// `receive` never blocks; `Ok(None)` means nothing is waiting.
pub trait NetDriver: Send + Sync {
    fn name(&self) -> &str;
    fn features(&self) -> LinkFeatures;
    fn offload(&self) -> OffloadCaps;

    fn probe(&self) -> Result<()> {
        Ok(())
    }
    fn remove(&self) -> Result<()> {
        Ok(())
    }
    fn open(&self) -> Result<()>;
    fn close(&self) -> Result<()>;
    fn start(&self) -> Result<()> {
        Ok(())
    }
    fn stop(&self) -> Result<()> {
        Ok(())
    }
    fn reset(&self) -> Result<()> {
        self.close()?;
        self.reset_stats();
        self.open()
    }

    fn transmit(&self, frame: &[u8]) -> Result<usize>;
    fn receive(&self) -> Result<Option<Vec<u8>>>;

    fn get_config(&self) -> LinkConfig;
    fn set_config(&self, config: LinkConfig) -> Result<()>;
    fn get_stats(&self) -> InterfaceStats;
    fn reset_stats(&self);

    fn suspend(&self) -> Result<()>;
    fn resume(&self) -> Result<()>;
    /// Open and not suspended
    fn link_up(&self) -> bool;
}

/// Driver state shared by the in-tree drivers: lifecycle, link config and counters
#[derive(Debug)]
pub struct DriverCore {
    pub state: Mutex<DriverState>,
    pub config: Mutex<LinkConfig>,
    pub stats: Mutex<InterfaceStats>,
}

impl DriverCore {
    pub fn new() -> DriverCore {
        DriverCore {
            state: Mutex::new(DriverState::Closed),
            config: Mutex::new(LinkConfig::default()),
            stats: Mutex::new(InterfaceStats::default()),
        }
    }
    pub fn open(&self) {
        *self.state.lock() = DriverState::Open;
    }
    pub fn close(&self) {
        *self.state.lock() = DriverState::Closed;
    }
    /// Fails unless the driver is open (closed or suspended drivers move no frames)
    pub fn is_open(&self) -> bool {
        *self.state.lock() == DriverState::Open
    }
    pub fn ensure_open(&self, name: &str) -> Result<()> {
        match *self.state.lock() {
            DriverState::Open => Ok(()),
            other => Err(NetError::state(format!("driver {name} is {other:?}"))),
        }
    }
    pub fn suspend(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            DriverState::Open => {
                *state = DriverState::Suspended;
                Ok(())
            }
            other => Err(NetError::state(format!("cannot suspend driver {name} while {other:?}"))),
        }
    }
    pub fn resume(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            DriverState::Suspended => {
                *state = DriverState::Open;
                Ok(())
            }
            other => Err(NetError::state(format!("cannot resume driver {name} while {other:?}"))),
        }
    }
    pub fn set_config(&self, config: LinkConfig) -> Result<()> {
        if !crate::ethernet::is_valid_mtu(config.mtu) {
            return Err(NetError::invalid(format!("MTU {} out of range", config.mtu)));
        }
        *self.config.lock() = config;
        Ok(())
    }
}

impl Default for DriverCore {
    fn default() -> Self {
        DriverCore::new()
    }
}

/// Software loopback: every transmitted frame comes straight back out of `receive`
#[derive(Debug)]
pub struct LoopbackDriver {
    name: String,
    core: DriverCore,
    queue: Mutex<VecDeque<Vec<u8>>>,
}

impl LoopbackDriver {
    pub fn new(name: &str) -> LoopbackDriver {
        LoopbackDriver {
            name: name.to_string(),
            core: DriverCore::new(),
            queue: Mutex::new(VecDeque::new()),
        }
    }
    /// Number of frames waiting to be received
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl NetDriver for LoopbackDriver {
    fn name(&self) -> &str {
        &self.name
    }
    fn features(&self) -> LinkFeatures {
        LinkFeatures::SPEED_10G
    }
    fn offload(&self) -> OffloadCaps {
        OffloadCaps::TCP_CSUM | OffloadCaps::UDP_CSUM | OffloadCaps::IP_CSUM
    }
    fn open(&self) -> Result<()> {
        self.core.open();
        Ok(())
    }
    fn close(&self) -> Result<()> {
        self.core.close();
        self.queue.lock().clear();
        Ok(())
    }
    fn transmit(&self, frame: &[u8]) -> Result<usize> {
        self.core.ensure_open(&self.name)?;
        {
            let mut stats = self.core.stats.lock();
            stats.record_tx(frame.len());
            stats.record_rx(frame.len());
        }
        self.queue.lock().push_back(frame.to_vec());
        Ok(frame.len())
    }
    fn receive(&self) -> Result<Option<Vec<u8>>> {
        self.core.ensure_open(&self.name)?;
        Ok(self.queue.lock().pop_front())
    }
    fn get_config(&self) -> LinkConfig {
        self.core.config.lock().clone()
    }
    fn set_config(&self, config: LinkConfig) -> Result<()> {
        self.core.set_config(config)
    }
    fn get_stats(&self) -> InterfaceStats {
        self.core.stats.lock().clone()
    }
    fn reset_stats(&self) {
        *self.core.stats.lock() = InterfaceStats::default();
    }
    fn suspend(&self) -> Result<()> {
        self.core.suspend(&self.name)
    }
    fn resume(&self) -> Result<()> {
        self.core.resume(&self.name)
    }
    fn link_up(&self) -> bool {
        self.core.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_returns_frames_in_order() {
        let lo = LoopbackDriver::new("lo");
        lo.open().unwrap();
        lo.transmit(&[1; 64]).unwrap();
        lo.transmit(&[2; 64]).unwrap();
        assert_eq!(lo.pending(), 2);
        assert_eq!(lo.receive().unwrap(), Some(vec![1; 64]));
        assert_eq!(lo.receive().unwrap(), Some(vec![2; 64]));
        assert_eq!(lo.receive().unwrap(), None);
        assert_eq!(lo.get_stats().tx_packets, 2);
    }

    #[test]
    fn closed_or_suspended_driver_moves_nothing() {
        let lo = LoopbackDriver::new("lo");
        assert!(matches!(lo.transmit(&[0; 64]), Err(NetError::StateViolation(_))));
        lo.open().unwrap();
        lo.suspend().unwrap();
        assert!(lo.transmit(&[0; 64]).is_err());
        assert!(lo.suspend().is_err());
        lo.resume().unwrap();
        assert!(lo.transmit(&[0; 64]).is_ok());
    }

    #[test]
    fn config_rejects_bad_mtu() {
        let lo = LoopbackDriver::new("lo");
        let cfg = LinkConfig { mtu: 20, ..LinkConfig::default() };
        assert!(lo.set_config(cfg).is_err());
        let cfg = LinkConfig { mtu: 9000, ..LinkConfig::default() };
        lo.set_config(cfg.clone()).unwrap();
        assert_eq!(lo.get_config(), cfg);
    }

    #[test]
    fn reset_clears_counters_and_reopens() {
        let lo = LoopbackDriver::new("lo");
        lo.open().unwrap();
        lo.transmit(&[0; 64]).unwrap();
        lo.reset().unwrap();
        assert_eq!(lo.get_stats().tx_packets, 0);
        assert_eq!(lo.pending(), 0);
        assert!(lo.transmit(&[0; 64]).is_ok());
    }
}
