//! Tunnel addressing.

use std::net::Ipv4Addr;

use ipnet::{IpNet, Ipv4Net};
use rand::Rng;

use crate::constants::{DEFAULT_MTU, DEVICE_PREFIX, KEEPALIVE_INTERVAL, MAX_MTU, MIN_MTU};
use crate::error::{Error, Result};

/// Smallest block that still has room for a peer pair away from the
/// network and broadcast addresses.
const MAX_PREFIX_LEN: u8 = 29;

/// Tunnel configuration for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct TunnelConfig {
    /// Our end of the point-to-point link.
    pub local_ip: Ipv4Addr,
    /// The peer's end.
    pub remote_ip: Ipv4Addr,
    /// Networks routed through the tunnel (initiator only).
    pub routes: Vec<IpNet>,
    /// Interface MTU.
    pub mtu: u16,
    /// Idle period before a keepalive frame is sent.
    pub keepalive: std::time::Duration,
}

impl TunnelConfig {
    /// Create a config for a fixed address pair.
    pub fn new(local_ip: Ipv4Addr, remote_ip: Ipv4Addr) -> Self {
        Self {
            local_ip,
            remote_ip,
            routes: Vec::new(),
            mtu: DEFAULT_MTU,
            keepalive: KEEPALIVE_INTERVAL,
        }
    }

    /// Create a config with a random address pair from `block`.
    pub fn random(block: Ipv4Net) -> Result<Self> {
        let (local_ip, remote_ip) = random_ips(block)?;
        Ok(Self::new(local_ip, remote_ip))
    }

    /// Add routes to the configuration.
    pub fn with_routes(mut self, routes: Vec<IpNet>) -> Self {
        self.routes = routes;
        self
    }

    /// Set the MTU.
    pub fn with_mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the keepalive interval.
    pub fn with_keepalive(mut self, keepalive: std::time::Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// The local interface name.
    pub fn device_name(&self) -> String {
        device_name(self.local_ip)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.local_ip == self.remote_ip {
            return Err(Error::Config {
                message: format!("local and remote IP are both {}", self.local_ip),
            });
        }
        if self.mtu < MIN_MTU {
            return Err(Error::Config {
                message: format!("MTU {} is below the IPv4 minimum of {MIN_MTU}", self.mtu),
            });
        }
        if self.mtu > MAX_MTU {
            return Err(Error::Config {
                message: format!("MTU {} is above the line limit of {MAX_MTU}", self.mtu),
            });
        }
        if self.keepalive.is_zero() {
            return Err(Error::Config {
                message: "keepalive interval must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Pick a random adjacent address pair inside `block`.
///
/// The host offset is even and at least 2, and the pair ends at least two
/// addresses below the broadcast address, so both addresses are usable
/// hosts sharing one /31.
pub fn random_ips(block: Ipv4Net) -> Result<(Ipv4Addr, Ipv4Addr)> {
    if block.prefix_len() > MAX_PREFIX_LEN {
        return Err(Error::Config {
            message: format!("tunnel block {block} is too small, use /{MAX_PREFIX_LEN} or larger"),
        });
    }
    let host_bits = 32 - u32::from(block.prefix_len());
    let size = 1u64 << host_bits;
    let offset = rand::thread_rng().gen_range(2..size - 4) & !1;

    let network = u64::from(u32::from(block.network()));
    // offset + 1 < size, so neither sum leaves the block
    let local = Ipv4Addr::from((network + offset) as u32);
    let remote = Ipv4Addr::from((network + offset + 1) as u32);
    Ok((local, remote))
}

/// Interface name for a tunnel endpoint, e.g. `shtun.12.10`.
///
/// Derived from the two low octets so concurrent tunnels with different
/// random addresses get different names. Always within the 15 character
/// interface name limit.
pub fn device_name(local_ip: Ipv4Addr) -> String {
    let [_, _, c, d] = local_ip.octets();
    format!("{DEVICE_PREFIX}.{c}.{d}")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    fn check_pair(block: Ipv4Net, local: Ipv4Addr, remote: Ipv4Addr) {
        assert_ne!(local, remote);
        assert_eq!(u32::from(local) + 1, u32::from(remote));
        assert!(block.contains(&local));
        assert!(block.contains(&remote));
        assert_ne!(local, block.network());
        assert_ne!(remote, block.broadcast());
    }

    #[test]
    fn random_ips_default_block_many_trials() {
        let block = net("100.64.0.0/16");
        for _ in 0..10_000 {
            let (local, remote) = random_ips(block).unwrap();
            check_pair(block, local, remote);
        }
    }

    #[test]
    fn random_ips_smallest_block() {
        let block = net("10.1.2.8/29");
        for _ in 0..1_000 {
            let (local, remote) = random_ips(block).unwrap();
            assert_eq!(local, "10.1.2.10".parse::<Ipv4Addr>().unwrap());
            assert_eq!(remote, "10.1.2.11".parse::<Ipv4Addr>().unwrap());
        }
    }

    #[test]
    fn random_ips_rejects_tiny_blocks() {
        assert!(matches!(random_ips(net("10.0.0.0/30")), Err(Error::Config { .. })));
        assert!(matches!(random_ips(net("10.0.0.1/32")), Err(Error::Config { .. })));
    }

    #[test]
    fn random_ips_uses_network_not_host_bits() {
        // a block written with host bits set still allocates inside the network
        let block = net("192.168.77.99/24");
        for _ in 0..1_000 {
            let (local, remote) = random_ips(block).unwrap();
            check_pair(block.trunc(), local, remote);
        }
    }

    #[test]
    fn device_name_from_low_octets() {
        assert_eq!(device_name("100.64.12.10".parse().unwrap()), "shtun.12.10");
        let longest = device_name("255.255.255.255".parse().unwrap());
        assert_eq!(longest, "shtun.255.255");
        assert!(longest.len() <= 15);
    }

    #[test]
    fn tunnel_config_validate() {
        let config = TunnelConfig::new("100.64.12.10".parse().unwrap(), "100.64.12.11".parse().unwrap());
        assert!(config.validate().is_ok());
        assert_eq!(config.device_name(), "shtun.12.10");

        let same = TunnelConfig::new("100.64.12.10".parse().unwrap(), "100.64.12.10".parse().unwrap());
        assert!(same.validate().is_err());

        let tiny_mtu = config.clone().with_mtu(100);
        assert!(tiny_mtu.validate().is_err());

        let jumbo_mtu = config.clone().with_mtu(9000);
        assert!(jumbo_mtu.validate().is_err());
        assert!(config.clone().with_mtu(MAX_MTU).validate().is_ok());

        let no_keepalive = config.with_keepalive(std::time::Duration::ZERO);
        assert!(no_keepalive.validate().is_err());
    }

    proptest! {
        #[test]
        fn random_ips_any_block(addr in any::<u32>(), prefix in 0u8..=29) {
            let block = Ipv4Net::new(Ipv4Addr::from(addr), prefix).unwrap().trunc();
            let (local, remote) = random_ips(block).unwrap();
            prop_assert!(block.contains(&local));
            prop_assert!(block.contains(&remote));
            prop_assert_eq!(u32::from(local) + 1, u32::from(remote));
            prop_assert_ne!(local, block.network());
            prop_assert_ne!(remote, block.broadcast());
        }
    }
}
