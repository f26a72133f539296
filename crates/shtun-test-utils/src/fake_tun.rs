//! Fake tun device for testing.
//!
//! Packets injected through the handle are returned by `read_packet`;
//! packets passed to `write_packet` show up on the handle.

use std::io;
use std::sync::Mutex;

use shtun_core::tunnel::{TunDevice, TunOpener};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Fake tun device for testing.
#[derive(Debug)]
pub struct FakeTun {
    name: String,
    mtu: u16,
    incoming: tokio::sync::Mutex<UnboundedReceiver<Vec<u8>>>,
    outgoing: UnboundedSender<Vec<u8>>,
}

/// Test side of a [`FakeTun`].
#[derive(Debug)]
pub struct FakeTunHandle {
    inject: UnboundedSender<Vec<u8>>,
    written: UnboundedReceiver<Vec<u8>>,
}

impl FakeTun {
    /// Create a device and its handle.
    pub fn pair(name: &str, mtu: u16) -> (Self, FakeTunHandle) {
        let (inject, incoming) = mpsc::unbounded_channel();
        let (outgoing, written) = mpsc::unbounded_channel();
        let tun = Self {
            name: name.to_string(),
            mtu,
            incoming: tokio::sync::Mutex::new(incoming),
            outgoing,
        };
        (tun, FakeTunHandle { inject, written })
    }
}

impl TunDevice for FakeTun {
    async fn read_packet(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut incoming = self.incoming.lock().await;
        match incoming.recv().await {
            Some(packet) => {
                let n = packet.len().min(buf.len());
                buf[..n].copy_from_slice(&packet[..n]);
                Ok(n)
            }
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "device closed")),
        }
    }

    async fn write_packet(&self, packet: &[u8]) -> io::Result<()> {
        self.outgoing
            .send(packet.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "device closed"))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn mtu(&self) -> u16 {
        self.mtu
    }
}

impl FakeTunHandle {
    /// Inject a packet as if the kernel routed it into the interface.
    pub fn inject(&self, packet: Vec<u8>) {
        let _ = self.inject.send(packet);
    }

    /// Wait for the next packet written to the device.
    pub async fn next_written(&mut self) -> Option<Vec<u8>> {
        self.written.recv().await
    }

    /// Packets written so far.
    pub fn take_written(&mut self) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();
        while let Ok(packet) = self.written.try_recv() {
            packets.push(packet);
        }
        packets
    }
}

/// [`TunOpener`] that hands out one prepared [`FakeTun`].
#[derive(Debug, Default)]
pub struct FakeOpener {
    device: Mutex<Option<FakeTun>>,
    opened: Mutex<Vec<String>>,
}

impl FakeOpener {
    /// Opener for a fresh device, plus the device's handle.
    pub fn new() -> (Self, FakeTunHandle) {
        let (tun, handle) = FakeTun::pair("fake", 1500);
        let opener = Self {
            device: Mutex::new(Some(tun)),
            opened: Mutex::new(Vec::new()),
        };
        (opener, handle)
    }

    /// Opener whose `open` always fails.
    pub fn failing() -> Self {
        Self::default()
    }

    /// Names passed to `open`.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl TunOpener for FakeOpener {
    type Device = FakeTun;

    fn open(&self, name: &str, mtu: u16) -> io::Result<FakeTun> {
        self.opened.lock().unwrap().push(name.to_string());
        let mut tun = self
            .device
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no fake device available"))?;
        tun.name = name.to_string();
        tun.mtu = mtu;
        Ok(tun)
    }
}
