//! shtun binary entry point.
//!
//! Brings up a point-to-point IP tunnel through an interactive remote shell.

use clap::Parser;
use tracing::{error, info};

use shtun_client::Cli;

fn main() {
    let cli = Cli::parse();

    let log_format = cli.log_format.into();
    if let Err(e) = shtun_core::init_logging(cli.verbose, cli.log_file.as_deref(), log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!(version = env!("CARGO_PKG_VERSION"), "shtun starting");

    if !cfg!(target_os = "linux") {
        eprintln!("shtun: tun devices are only supported on Linux");
        std::process::exit(1);
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("shtun: failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run(&cli)) {
        error!(error = %e, "Tunnel failed");
        eprintln!("shtun: {}", e);
        if let Some(hint) = e.hint() {
            eprintln!("hint: {}", hint);
        }
        std::process::exit(1);
    }
}

#[cfg(target_os = "linux")]
async fn run(cli: &Cli) -> shtun_core::Result<()> {
    use shtun_client::{SessionConfig, TunnelSession};
    use shtun_core::channel::ProcessChannel;
    use shtun_core::tunnel::{IpCommand, LinuxTunOpener, PumpExit, TunnelConfig};
    use tracing::warn;

    let tunnel = TunnelConfig::random(cli.tunnel_block())?
        .with_routes(cli.routes.clone())
        .with_mtu(cli.mtu)
        .with_keepalive(cli.keepalive_interval());
    info!(
        local_ip = %tunnel.local_ip,
        remote_ip = %tunnel.remote_ip,
        routes = ?tunnel.routes,
        "Tunnel addresses"
    );

    let channel_config = cli.channel_config();
    let config = SessionConfig {
        agent: cli.agent.clone(),
        hook: cli.up_down.clone(),
        stats: !cli.no_stats,
        agent_timeout: channel_config.prompt_timeout,
        ..SessionConfig::new(tunnel)
    };

    let channel = ProcessChannel::open(&cli.command, channel_config).await?;
    let mut session = TunnelSession::new(config, channel, IpCommand::new(!cli.no_sudo), LinuxTunOpener)?;

    let shutdown = session.shutdown_token();
    let watcher = tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(name) => {
                info!(signal = name, "Signal received, shutting down");
                shutdown.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to install signal handlers"),
        }
    });

    let result = session.run().await;
    watcher.abort();

    match result? {
        PumpExit::Cancelled => Ok(()),
        PumpExit::ChannelClosed => Err(shtun_core::Error::channel("remote session closed")),
    }
}

#[cfg(not(target_os = "linux"))]
async fn run(_cli: &Cli) -> shtun_core::Result<()> {
    Err(shtun_core::Error::Config {
        message: "tun devices are only supported on Linux".into(),
    })
}

/// Wait for SIGINT, SIGTERM or SIGHUP and return its name.
#[cfg(target_os = "linux")]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = hangup.recv() => "SIGHUP",
    };
    Ok(name)
}
