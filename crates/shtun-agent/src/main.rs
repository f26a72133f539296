//! tunnel-agent binary entry point.
//!
//! Remote end of a shtun tunnel, started inside the remote shell. Frames
//! travel on stdin/stdout; logs go to stderr.

use clap::Parser;
use tracing::{error, info};

use shtun_agent::Cli;

fn main() {
    let cli = Cli::parse();

    let log_format = cli.log_format.into();
    if let Err(e) = shtun_core::init_logging(cli.verbose, cli.log_file.as_deref(), log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!(version = env!("CARGO_PKG_VERSION"), "tunnel-agent starting");

    if !cfg!(target_os = "linux") {
        eprintln!("tunnel-agent: tun devices are only supported on Linux");
        std::process::exit(1);
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("tunnel-agent: failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = rt.block_on(run(&cli));
    // stdin is read on a blocking thread that may never return
    rt.shutdown_background();

    if let Err(e) = result {
        error!(error = %e, "Agent failed");
        eprintln!("tunnel-agent: {}", e);
        std::process::exit(1);
    }
}

#[cfg(target_os = "linux")]
async fn run(cli: &Cli) -> shtun_core::Result<()> {
    use shtun_agent::Agent;
    use shtun_core::tunnel::{IpCommand, LinuxTunOpener, PumpExit};
    use tracing::warn;

    let mut agent = Agent::new(cli.agent_config(), IpCommand::new(!cli.no_sudo), LinuxTunOpener)?;

    let shutdown = agent.shutdown_token();
    let watcher = tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(name) => {
                info!(signal = name, "Signal received, shutting down");
                shutdown.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to install signal handlers"),
        }
    });

    let result = agent.run(tokio::io::stdin(), tokio::io::stdout()).await;
    watcher.abort();

    let totals = agent.counters().snapshot();
    match result? {
        PumpExit::Cancelled => info!(l2r = totals.l2r, r2l = totals.r2l, "Agent stopped"),
        PumpExit::ChannelClosed => info!(l2r = totals.l2r, r2l = totals.r2l, "Initiator went away"),
    }
    Ok(())
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
