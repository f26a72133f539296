//! Tunnel session lifecycle.
//!
//! A [`TunnelSession`] owns the remote shell channel, the local endpoint and
//! the hook, and walks through
//! `Idle -> NegotiatingAgent -> BringingUpDevices -> RunningUpHook -> Active
//! -> RunningDownHook -> TearingDown -> Closed`. Setup failures skip straight
//! to `TearingDown`; teardown always runs, exactly once.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, warn};

use shtun_core::channel::ShellChannel;
use shtun_core::constants::{
    AGENT_MISSING_PATTERN, AGENT_READY_PATTERN, DEFAULT_MTU, PROMPT_TIMEOUT,
};
use shtun_core::tunnel::{
    NetworkConfigurator, PacketPump, PumpConfig, PumpExit, TunEndpoint, TunOpener, TunnelConfig,
};
use shtun_core::{Error, Result, StatsEngine, TrafficCounters};

use crate::hook::{HookArgs, UpDownHook};

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    NegotiatingAgent,
    BringingUpDevices,
    RunningUpHook,
    Active,
    RunningDownHook,
    TearingDown,
    Closed,
}

/// Outcome of starting the remote agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Ready,
    NotInstalled,
}

/// Everything a session needs besides its resources.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub tunnel: TunnelConfig,
    /// Agent command on the remote host.
    pub agent: String,
    pub hook: Option<PathBuf>,
    /// Render the throughput status line.
    pub stats: bool,
    /// Bound on agent readiness.
    pub agent_timeout: Duration,
}

impl SessionConfig {
    pub fn new(tunnel: TunnelConfig) -> Self {
        Self {
            tunnel,
            agent: shtun_core::constants::AGENT_COMMAND.to_string(),
            hook: None,
            stats: true,
            agent_timeout: PROMPT_TIMEOUT,
        }
    }
}

/// Command line that starts the agent for `tunnel`.
///
/// The agent is told its own address first, i.e. our remote address. The
/// MTU is passed on only when it differs from the agent's default.
pub fn agent_command(agent: &str, tunnel: &TunnelConfig) -> String {
    let mut command = format!("{agent} {} {}", tunnel.remote_ip, tunnel.local_ip);
    if tunnel.mtu != DEFAULT_MTU {
        command.push_str(&format!(" --mtu {}", tunnel.mtu));
    }
    command
}

/// Run `command` in the remote shell and wait for the agent's verdict.
pub async fn negotiate_agent<R, W>(
    channel: &mut ShellChannel<R, W>,
    command: &str,
    timeout: Duration,
) -> Result<AgentStatus>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    channel.send_line(command).await?;
    let expected = channel
        .expect(&[AGENT_READY_PATTERN, AGENT_MISSING_PATTERN], timeout)
        .await?;
    if !expected.before.trim().is_empty() {
        debug!(output = %expected.before.trim(), "Agent startup output");
    }
    match expected.index {
        0 => {
            debug!(line = %expected.matched, "Agent ready");
            Ok(AgentStatus::Ready)
        }
        _ => Ok(AgentStatus::NotInstalled),
    }
}

/// One tunnel, from agent negotiation to teardown.
pub struct TunnelSession<R, W, N, O>
where
    N: NetworkConfigurator,
    O: TunOpener,
{
    config: SessionConfig,
    channel: ShellChannel<R, W>,
    endpoint: TunEndpoint<N, O::Device>,
    opener: O,
    hook: Option<UpDownHook>,
    hook_up: bool,
    phases: Vec<SessionPhase>,
    counters: TrafficCounters,
    shutdown: CancellationToken,
    span: Span,
}

impl<R, W, N, O> TunnelSession<R, W, N, O>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    N: NetworkConfigurator,
    O: TunOpener,
{
    /// Create a session over an open, prompt-synchronized channel.
    pub fn new(config: SessionConfig, channel: ShellChannel<R, W>, network: N, opener: O) -> Result<Self> {
        config.tunnel.validate()?;
        let endpoint = TunEndpoint::new(&config.tunnel, network);
        let hook = config.hook.clone().map(UpDownHook::new);
        let span = info_span!(
            "session",
            local_ip = %config.tunnel.local_ip,
            remote_ip = %config.tunnel.remote_ip
        );
        Ok(Self {
            config,
            channel,
            endpoint,
            opener,
            hook,
            hook_up: false,
            phases: vec![SessionPhase::Idle],
            counters: TrafficCounters::new(),
            shutdown: CancellationToken::new(),
            span,
        })
    }

    /// Token that stops the session when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Traffic counters of this session.
    pub fn counters(&self) -> &TrafficCounters {
        &self.counters
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phases.last().copied().unwrap_or(SessionPhase::Idle)
    }

    /// Every phase entered so far, in order.
    pub fn phases(&self) -> &[SessionPhase] {
        &self.phases
    }

    /// The local endpoint.
    pub fn endpoint(&self) -> &TunEndpoint<N, O::Device> {
        &self.endpoint
    }

    /// Run the tunnel until it stops, then tear everything down.
    ///
    /// Returns how the pump stopped, or the error that ended the session.
    /// Teardown errors are logged, never returned.
    pub async fn run(&mut self) -> Result<PumpExit> {
        if self.phase() != SessionPhase::Idle {
            return Err(Error::Config {
                message: "session has already run".into(),
            });
        }
        let span = self.span.clone();
        async {
            let shutdown = self.shutdown.clone();
            let result = tokio::select! {
                biased;
                result = self.establish_and_pump() => result,
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    Ok(PumpExit::Cancelled)
                }
            };
            if let Err(e) = &result {
                warn!(error = %e, phase = ?self.phase(), "Session failed");
            }
            self.teardown().await;
            result
        }
        .instrument(span)
        .await
    }

    fn enter(&mut self, phase: SessionPhase) {
        debug!(?phase, "Session phase");
        self.phases.push(phase);
    }

    fn hook_args(&self) -> HookArgs {
        HookArgs {
            device: self.endpoint.name().to_string(),
            local_ip: self.config.tunnel.local_ip,
            remote_ip: self.config.tunnel.remote_ip,
            routes: self.config.tunnel.routes.clone(),
        }
    }

    async fn establish_and_pump(&mut self) -> Result<PumpExit> {
        let tunnel = self.config.tunnel.clone();

        self.enter(SessionPhase::NegotiatingAgent);
        let command = agent_command(&self.config.agent, &tunnel);
        let status = negotiate_agent(&mut self.channel, &command, self.config.agent_timeout).await?;
        if status == AgentStatus::NotInstalled {
            return Err(Error::AgentNotInstalled {
                agent: self.config.agent.clone(),
            });
        }

        self.enter(SessionPhase::BringingUpDevices);
        self.endpoint.create()?;
        self.endpoint.attach(&self.opener)?;
        for route in &tunnel.routes {
            self.endpoint.add_route(*route)?;
        }
        info!(
            device = self.endpoint.name(),
            local_ip = %tunnel.local_ip,
            remote_ip = %tunnel.remote_ip,
            "Tunnel is up"
        );

        if let Some(hook) = self.hook.clone() {
            self.enter(SessionPhase::RunningUpHook);
            hook.up(&self.hook_args()).await?;
            self.hook_up = true;
        }

        self.enter(SessionPhase::Active);
        let pump_cancel = self.shutdown.child_token();
        let pump = PacketPump::new(
            PumpConfig::initiator(tunnel.mtu, tunnel.keepalive),
            self.counters.clone(),
            pump_cancel.clone(),
        );
        let stats = self
            .config
            .stats
            .then(|| StatsEngine::new(self.counters.clone()));

        let device = self.endpoint.device()?;
        let (reader, writer) = self.channel.split();
        let stats = async {
            if let Some(engine) = stats {
                engine.run(pump_cancel.clone()).await;
            }
        };
        let (exit, ()) = tokio::join!(pump.run(device, reader, writer), stats);
        exit
    }

    async fn teardown(&mut self) {
        if self.hook_up {
            self.enter(SessionPhase::RunningDownHook);
            if let Some(hook) = &self.hook {
                hook.down(&self.hook_args()).await;
            }
            self.hook_up = false;
        }

        self.enter(SessionPhase::TearingDown);
        self.shutdown.cancel();
        self.endpoint.destroy();
        self.channel.close().await;
        self.enter(SessionPhase::Closed);
        info!("Session closed");
    }
}
