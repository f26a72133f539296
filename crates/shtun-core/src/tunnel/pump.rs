//! Bidirectional packet pump between a tun device and a shell channel.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, trace, warn};

use super::TunDevice;
use crate::channel::{LineRead, ShellReader, ShellWriter};
use crate::constants::{
    AGENT_READ_TIMEOUT, CHANNEL_READ_TIMEOUT, DEFAULT_MTU, KEEPALIVE_INTERVAL, TUN_READ_OVERHEAD,
};
use crate::error::{Error, Result};
use crate::frame::{self, Frame};
use crate::stats::TrafficCounters;

/// Pump timing and buffer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpConfig {
    /// Idle period on the device after which a keepalive is sent.
    pub keepalive_interval: Duration,
    /// Bound on one channel line read.
    pub read_timeout: Duration,
    /// Give up when nothing arrives from the channel for this long.
    pub idle_timeout: Option<Duration>,
    /// Device read buffer size.
    pub read_buffer: usize,
}

impl PumpConfig {
    /// Configuration for the initiating side.
    pub fn initiator(mtu: u16, keepalive_interval: Duration) -> Self {
        Self {
            keepalive_interval,
            read_timeout: CHANNEL_READ_TIMEOUT,
            idle_timeout: None,
            read_buffer: usize::from(mtu) + TUN_READ_OVERHEAD,
        }
    }

    /// Configuration for the remote agent.
    pub fn agent(mtu: u16, idle_timeout: Duration) -> Self {
        Self {
            keepalive_interval: KEEPALIVE_INTERVAL,
            read_timeout: AGENT_READ_TIMEOUT,
            idle_timeout: Some(idle_timeout),
            read_buffer: usize::from(mtu) + TUN_READ_OVERHEAD,
        }
    }
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self::initiator(DEFAULT_MTU, KEEPALIVE_INTERVAL)
    }
}

/// Why the pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// The exit flag was raised.
    Cancelled,
    /// The remote end closed the channel.
    ChannelClosed,
}

/// Moves packets between a tun device and a shell channel.
pub struct PacketPump {
    config: PumpConfig,
    counters: TrafficCounters,
    cancel: CancellationToken,
    span: Span,
}

impl PacketPump {
    /// Create a pump reporting into `counters` and stopped by `cancel`.
    pub fn new(config: PumpConfig, counters: TrafficCounters, cancel: CancellationToken) -> Self {
        Self {
            config,
            counters,
            cancel,
            span: info_span!("pump"),
        }
    }

    /// Run both directions until one of them stops.
    ///
    /// Whichever direction finishes first raises the exit flag so the other
    /// follows. The remote closing the channel is reported as
    /// `ChannelClosed` even if the local side failed writing to it.
    pub async fn run<D, R, W>(
        &self,
        device: &D,
        reader: &mut ShellReader<R>,
        writer: &mut ShellWriter<W>,
    ) -> Result<PumpExit>
    where
        D: TunDevice,
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!(parent: &self.span, device = device.name(), "Packet pump started");

        let l2r = async {
            let result = self.local_to_remote(device, writer).await;
            self.cancel.cancel();
            result
        }
        .instrument(info_span!(parent: &self.span, "l2r"));

        let r2l = async {
            let result = self.remote_to_local(device, reader).await;
            self.cancel.cancel();
            result
        }
        .instrument(info_span!(parent: &self.span, "r2l"));

        let (l2r, r2l) = tokio::join!(l2r, r2l);

        let exit = match (l2r, r2l) {
            (_, Ok(PumpExit::ChannelClosed)) => Ok(PumpExit::ChannelClosed),
            (Err(e), _) | (_, Err(e)) => Err(e),
            _ => Ok(PumpExit::Cancelled),
        };
        let totals = self.counters.snapshot();
        info!(
            parent: &self.span,
            exit = ?exit,
            l2r_bytes = totals.l2r,
            r2l_bytes = totals.r2l,
            "Packet pump stopped"
        );
        exit
    }

    async fn local_to_remote<D, W>(&self, device: &D, writer: &mut ShellWriter<W>) -> Result<PumpExit>
    where
        D: TunDevice,
        W: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; self.config.read_buffer];
        loop {
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(PumpExit::Cancelled),
                read = tokio::time::timeout(
                    self.config.keepalive_interval,
                    device.read_packet(&mut buf),
                ) => read,
            };

            let line = match read {
                Err(_) => {
                    trace!("Sending keepalive");
                    frame::encode_keepalive().to_string()
                }
                Ok(Ok(0)) => continue,
                Ok(Ok(n)) => {
                    trace!(len = n, "Local packet");
                    let line = frame::encode_data(&buf[..n]);
                    if !self.send(writer, &line).await? {
                        return Ok(PumpExit::Cancelled);
                    }
                    self.counters.add_l2r(n as u64);
                    continue;
                }
                Ok(Err(e)) => {
                    if self.cancel.is_cancelled() {
                        return Ok(PumpExit::Cancelled);
                    }
                    error!(error = %e, "Tunnel device read failed");
                    return Err(Error::Io(e));
                }
            };
            if !self.send(writer, &line).await? {
                return Ok(PumpExit::Cancelled);
            }
        }
    }

    /// Send one line; `false` if the exit flag interrupted it.
    async fn send<W>(&self, writer: &mut ShellWriter<W>, line: &str) -> Result<bool>
    where
        W: AsyncWrite + Unpin,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Ok(false),
            sent = writer.send_line(line) => sent.map(|()| true),
        }
    }

    async fn remote_to_local<D, R>(&self, device: &D, reader: &mut ShellReader<R>) -> Result<PumpExit>
    where
        D: TunDevice,
        R: AsyncRead + Unpin,
    {
        let mut last_activity = Instant::now();
        loop {
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(PumpExit::Cancelled),
                read = reader.read_line(self.config.read_timeout) => read?,
            };

            let line = match read {
                LineRead::Line(line) => line,
                LineRead::Eof => {
                    info!("Channel closed by remote end");
                    return Ok(PumpExit::ChannelClosed);
                }
                LineRead::Timeout => {
                    if let Some(idle) = self.config.idle_timeout
                        && last_activity.elapsed() >= idle
                    {
                        error!(idle_secs = idle.as_secs(), "No data received from channel");
                        return Err(Error::channel(format!(
                            "no data received for {} seconds",
                            idle.as_secs()
                        )));
                    }
                    continue;
                }
            };
            last_activity = Instant::now();

            match frame::decode(&line) {
                Ok(Some(Frame::Data(packet))) => {
                    trace!(len = packet.len(), "Remote packet");
                    let written = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Ok(PumpExit::Cancelled),
                        written = device.write_packet(&packet) => written,
                    };
                    if let Err(e) = written {
                        if self.cancel.is_cancelled() {
                            return Ok(PumpExit::Cancelled);
                        }
                        error!(error = %e, "Tunnel device write failed");
                        return Err(Error::Io(e));
                    }
                    self.counters.add_r2l(packet.len() as u64);
                }
                Ok(Some(Frame::Keepalive)) => trace!("Keepalive received"),
                Ok(None) => debug!(line = %line.trim_end(), "Ignoring channel output"),
                Err(e) => warn!(error = %e, "Dropping malformed frame"),
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
