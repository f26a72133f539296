//! Tunnel module for IP-over-shell functionality.
//!
//! This module provides:
//! - Tunnel addressing (random peer pairs, device naming)
//! - Tun device abstraction
//! - Privileged network configuration behind a narrow trait
//! - Endpoint lifecycle with idempotent teardown
//! - The bidirectional packet pump

mod addr;
mod endpoint;
mod netconf;
mod pump;

#[cfg(target_os = "linux")]
mod tun_linux;

pub use addr::{TunnelConfig, device_name, random_ips};
pub use endpoint::TunEndpoint;
pub use netconf::NetworkConfigurator;
pub use pump::{PacketPump, PumpConfig, PumpExit};

#[cfg(target_os = "linux")]
pub use netconf::IpCommand;
#[cfg(target_os = "linux")]
pub use tun_linux::{LinuxTun, LinuxTunOpener};

/// Trait for tun device implementations.
///
/// I/O takes `&self` so the two pump directions can use one device
/// concurrently.
#[allow(async_fn_in_trait)]
pub trait TunDevice {
    /// Read one packet into `buf`, returning its length.
    async fn read_packet(&self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Write one packet.
    async fn write_packet(&self, packet: &[u8]) -> std::io::Result<()>;

    /// Get the tun interface name.
    fn name(&self) -> &str;

    /// Get the MTU of the tun interface.
    fn mtu(&self) -> u16;
}

/// Opens the I/O handle of an interface that already exists.
pub trait TunOpener {
    /// Device type produced.
    type Device: TunDevice;

    /// Attach to interface `name`.
    fn open(&self, name: &str, mtu: u16) -> std::io::Result<Self::Device>;
}
