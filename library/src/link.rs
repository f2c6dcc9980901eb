//! An Ethernet segment emulated over localhost UDP sockets.
//!
//! Each interface binds one UDP socket; every transmitted frame is sent to all neighbours
//! configured on that segment, which behaves like a hub. Receivers filter on IP address.

use crate::driver::{DriverCore, LinkConfig, NetDriver};
use crate::ethernet::{validate_frame, ETH_MAX_FRAME};
use crate::flags::{LinkFeatures, OffloadCaps};
use crate::interface::InterfaceStats;
use crate::prelude::*;

#[derive(Debug)]
pub struct UdpLinkDriver {
    name: String,
    udp_sock: UdpSocket,
    neighbors: HashMap<Ipv4Addr, SocketAddr>,
    core: DriverCore,
}

impl UdpLinkDriver {
    /// Binds the interface's UDP endpoint. The socket is non-blocking so `receive` can poll.
    pub fn bind(name: &str, udp_addr: SocketAddr, neighbors: HashMap<Ipv4Addr, SocketAddr>) -> Result<UdpLinkDriver> {
        let udp_sock = UdpSocket::bind(udp_addr)?;
        udp_sock.set_nonblocking(true)?;
        Ok(UdpLinkDriver {
            name: name.to_string(),
            udp_sock,
            neighbors,
            core: DriverCore::new(),
        })
    }
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.udp_sock.local_addr()?)
    }
    pub fn neighbors(&self) -> &HashMap<Ipv4Addr, SocketAddr> {
        &self.neighbors
    }
}

impl NetDriver for UdpLinkDriver {
    fn name(&self) -> &str {
        &self.name
    }
    fn features(&self) -> LinkFeatures {
        LinkFeatures::SPEED_100M | LinkFeatures::SPEED_1G | LinkFeatures::AUTONEG
    }
    fn offload(&self) -> OffloadCaps {
        OffloadCaps::empty()
    }
    fn open(&self) -> Result<()> {
        self.core.open();
        debug!("link {} open on {:?}", self.name, self.udp_sock.local_addr());
        Ok(())
    }
    fn close(&self) -> Result<()> {
        self.core.close();
        Ok(())
    }
    fn transmit(&self, frame: &[u8]) -> Result<usize> {
        self.core.ensure_open(&self.name)?;
        if let Err(e) = validate_frame(frame) {
            let mut stats = self.core.stats.lock();
            stats.tx_errors += 1;
            stats.length_errors += 1;
            return Err(e);
        }
        for neighbor in self.neighbors.values() {
            if let Err(e) = self.udp_sock.send_to(frame, neighbor) {
                self.core.stats.lock().tx_errors += 1;
                warn!("link {}: send to {neighbor} failed: {e}", self.name);
                return Err(e.into());
            }
        }
        self.core.stats.lock().record_tx(frame.len());
        Ok(frame.len())
    }
    fn receive(&self) -> Result<Option<Vec<u8>>> {
        self.core.ensure_open(&self.name)?;
        let mut buf = [0u8; ETH_MAX_FRAME + 1];
        let len = match self.udp_sock.recv(&mut buf) {
            Ok(len) => len,
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => {
                self.core.stats.lock().rx_errors += 1;
                return Err(e.into());
            }
        };
        let frame = &buf[..len];
        if let Err(e) = validate_frame(frame) {
            let mut stats = self.core.stats.lock();
            stats.rx_errors += 1;
            stats.frame_errors += 1;
            debug!("link {}: dropping malformed frame: {e}", self.name);
            return Ok(None);
        }
        self.core.stats.lock().record_rx(len);
        Ok(Some(frame.to_vec()))
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

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn frames_cross_the_emulated_segment() {
        let b = UdpLinkDriver::bind("b", localhost(), HashMap::new()).unwrap();
        let mut neighbors = HashMap::new();
        neighbors.insert(Ipv4Addr::new(10, 0, 0, 2), b.local_addr().unwrap());
        let a = UdpLinkDriver::bind("a", localhost(), neighbors).unwrap();
        a.open().unwrap();
        b.open().unwrap();

        let frame = vec![0xABu8; 64];
        a.transmit(&frame).unwrap();

        let mut got = None;
        for _ in 0..200 {
            if let Some(f) = b.receive().unwrap() {
                got = Some(f);
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(got, Some(frame));
        assert_eq!(a.get_stats().tx_packets, 1);
        assert_eq!(b.get_stats().rx_packets, 1);
    }

    #[test]
    fn undersized_frames_are_refused() {
        let a = UdpLinkDriver::bind("a", localhost(), HashMap::new()).unwrap();
        a.open().unwrap();
        assert!(matches!(a.transmit(&[0u8; 20]), Err(NetError::ProtocolViolation(_))));
        assert_eq!(a.get_stats().tx_errors, 1);
        assert_eq!(a.receive().unwrap(), None);
    }
}
