//! Remote agent lifecycle.
//!
//! Creates the remote tun interface, announces readiness on the output
//! stream, pumps packets until the channel goes away and removes the
//! interface again on every exit path.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, info, info_span, warn};

use shtun_core::channel::{ShellReader, ShellWriter};
use shtun_core::constants::AGENT_IDLE_TIMEOUT;
use shtun_core::tunnel::{
    NetworkConfigurator, PacketPump, PumpConfig, PumpExit, TunEndpoint, TunOpener, TunnelConfig,
};
use shtun_core::{Result, TrafficCounters};

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Addresses from this host's point of view.
    pub tunnel: TunnelConfig,
    /// Enable IP forwarding and NAT for the peer.
    pub nat: bool,
    /// Stop after this long without input.
    pub idle_timeout: Duration,
}

impl AgentConfig {
    pub fn new(tunnel: TunnelConfig) -> Self {
        Self {
            tunnel,
            nat: true,
            idle_timeout: AGENT_IDLE_TIMEOUT,
        }
    }
}

/// The line the initiator waits for.
pub fn ready_line(device: &str, local_ip: Ipv4Addr) -> String {
    format!("# Agent device {device} is ready [{local_ip}]")
}

/// Remote end of a tunnel.
pub struct Agent<N, O>
where
    N: NetworkConfigurator,
    O: TunOpener,
{
    config: AgentConfig,
    endpoint: TunEndpoint<N, O::Device>,
    opener: O,
    counters: TrafficCounters,
    shutdown: CancellationToken,
    span: Span,
}

impl<N, O> Agent<N, O>
where
    N: NetworkConfigurator,
    O: TunOpener,
{
    pub fn new(config: AgentConfig, network: N, opener: O) -> Result<Self> {
        config.tunnel.validate()?;
        let endpoint = TunEndpoint::new(&config.tunnel, network);
        let span = info_span!(
            "agent",
            local_ip = %config.tunnel.local_ip,
            remote_ip = %config.tunnel.remote_ip
        );
        Ok(Self {
            config,
            endpoint,
            opener,
            counters: TrafficCounters::new(),
            shutdown: CancellationToken::new(),
            span,
        })
    }

    /// Token that stops the agent when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn counters(&self) -> &TrafficCounters {
        &self.counters
    }

    pub fn endpoint(&self) -> &TunEndpoint<N, O::Device> {
        &self.endpoint
    }

    /// Serve one tunnel over `input`/`output`, then remove the interface.
    pub async fn run<R, W>(&mut self, input: R, output: W) -> Result<PumpExit>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let span = self.span.clone();
        async {
            let shutdown = self.shutdown.clone();
            let result = tokio::select! {
                biased;
                result = self.serve(input, output) => result,
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    Ok(PumpExit::Cancelled)
                }
            };
            if let Err(e) = &result {
                warn!(error = %e, "Agent failed");
            }
            self.shutdown.cancel();
            self.endpoint.destroy();
            result
        }
        .instrument(span)
        .await
    }

    async fn serve<R, W>(&mut self, input: R, output: W) -> Result<PumpExit>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.endpoint.create()?;
        self.endpoint.attach(&self.opener)?;
        if self.config.nat {
            self.endpoint.enable_forwarding_and_nat();
        }

        let mut reader = ShellReader::new(input);
        let mut writer = ShellWriter::new(output);
        writer
            .send_line(&ready_line(self.endpoint.name(), self.config.tunnel.local_ip))
            .await?;
        info!(device = self.endpoint.name(), "Agent device ready");

        let pump = PacketPump::new(
            PumpConfig::agent(self.config.tunnel.mtu, self.config.idle_timeout),
            self.counters.clone(),
            self.shutdown.child_token(),
        );
        let device = self.endpoint.device()?;
        pump.run(device, &mut reader, &mut writer).await
    }
}

// =============================================================================
// Tests
// =============================================================================
