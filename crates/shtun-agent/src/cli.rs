//! Agent CLI implementation.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use shtun_core::constants::{AGENT_IDLE_TIMEOUT, DEFAULT_MTU, MAX_MTU, MIN_MTU};
use shtun_core::tunnel::TunnelConfig;

use crate::agent::AgentConfig;

/// Log output format for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CliLogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

impl From<CliLogFormat> for shtun_core::LogFormat {
    fn from(fmt: CliLogFormat) -> Self {
        match fmt {
            CliLogFormat::Text => shtun_core::LogFormat::Text,
            CliLogFormat::Json => shtun_core::LogFormat::Json,
        }
    }
}

/// tunnel-agent - remote end of a shtun tunnel.
///
/// Started by `shtun` inside the remote shell; relays packets between a
/// local tun device and stdin/stdout.
#[derive(Debug, Parser)]
#[command(
    name = "tunnel-agent",
    version,
    about = "tunnel-agent - remote end of a shtun tunnel"
)]
pub struct Cli {
    /// This host's tunnel address
    #[arg(value_name = "LOCAL_IP")]
    pub local_ip: Ipv4Addr,

    /// The initiator's tunnel address
    #[arg(value_name = "REMOTE_IP")]
    pub remote_ip: Ipv4Addr,

    /// Do not enable IP forwarding and NAT for the peer
    #[arg(long = "no-nat")]
    pub no_nat: bool,

    /// Exit after this many seconds without input
    #[arg(
        long = "idle-timeout",
        default_value_t = AGENT_IDLE_TIMEOUT.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..),
        value_name = "SECS"
    )]
    pub idle_timeout: u64,

    /// Tunnel interface MTU
    #[arg(
        long = "mtu",
        default_value_t = DEFAULT_MTU,
        value_parser = clap::value_parser!(u16).range(i64::from(MIN_MTU)..=i64::from(MAX_MTU)),
        value_name = "BYTES"
    )]
    pub mtu: u16,

    /// Run network configuration commands without sudo
    #[arg(long = "no-sudo")]
    pub no_sudo: bool,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Log to file instead of stderr
    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(long = "log-format", default_value = "text")]
    pub log_format: CliLogFormat,
}

impl Cli {
    /// Agent configuration from the arguments.
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            tunnel: TunnelConfig::new(self.local_ip, self.remote_ip).with_mtu(self.mtu),
            nat: !self.no_nat,
            idle_timeout: Duration::from_secs(self.idle_timeout),
        }
    }
}
