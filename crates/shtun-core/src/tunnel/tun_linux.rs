//! Linux tun device wrapper.
//!
//! Attaches to a persistent interface created by `ip tuntap add ... user`,
//! so opening it needs no extra privileges.

use std::io;

use tun::{AbstractDevice, AsyncDevice, Configuration};

use super::{TunDevice, TunOpener};

/// Linux tun device wrapper.
///
/// Wraps the `tun` crate's AsyncDevice with our TunDevice trait.
pub struct LinuxTun {
    device: AsyncDevice,
    name: String,
    mtu: u16,
}

impl LinuxTun {
    /// Attach to the existing interface `name`.
    pub fn open(name: &str, mtu: u16) -> io::Result<Self> {
        let mut config = Configuration::default();
        config.tun_name(name);

        let device = tun::create_as_async(&config)
            .map_err(|e| io::Error::other(format!("failed to open tun device {name}: {e}")))?;

        let actual_name = device
            .tun_name()
            .map_err(|e| io::Error::other(format!("failed to get tun name: {e}")))?;

        Ok(Self {
            device,
            name: actual_name,
            mtu,
        })
    }
}

impl TunDevice for LinuxTun {
    async fn read_packet(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.device.recv(buf).await
    }

    async fn write_packet(&self, packet: &[u8]) -> io::Result<()> {
        self.device.send(packet).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn mtu(&self) -> u16 {
        self.mtu
    }
}

/// Opens [`LinuxTun`] devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxTunOpener;

impl TunOpener for LinuxTunOpener {
    type Device = LinuxTun;

    fn open(&self, name: &str, mtu: u16) -> io::Result<LinuxTun> {
        LinuxTun::open(name, mtu)
    }
}

