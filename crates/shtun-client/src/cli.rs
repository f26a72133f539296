//! Initiator CLI implementation.
//!
//! Provides command-line argument parsing for `shtun`.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use ipnet::{IpNet, Ipv4Net};
use shtun_core::channel::ChannelConfig;
use shtun_core::constants::{
    AGENT_COMMAND, DEFAULT_MTU, DEFAULT_PROMPT, DEFAULT_TUNNEL_CIDR, KEEPALIVE_INTERVAL, MAX_MTU,
    MIN_MTU, PROMPT_TIMEOUT,
};

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

/// shtun - IP tunnel through an interactive remote shell.
#[derive(Debug, Parser)]
#[command(
    name = "shtun",
    version,
    about = "shtun - IP tunnel through an interactive remote shell",
    after_help = "Example:\n  shtun -r 10.0.0.0/16 -- aws ssm start-session --target i-0123456789abcdef0\n  \
                  shtun -r 192.168.0.0/24 -- ssh -tt jumphost"
)]
pub struct Cli {
    /// Route this network through the tunnel (repeatable)
    #[arg(short = 'r', long = "route", value_name = "CIDR")]
    pub routes: Vec<IpNet>,

    /// Block the random tunnel endpoint addresses are picked from
    #[arg(
        long = "tunnel-cidr",
        env = "SHTUN_TUNNEL_CIDR",
        default_value = DEFAULT_TUNNEL_CIDR,
        value_name = "CIDR"
    )]
    pub tunnel_cidr: Ipv4Net,

    /// Script run as `<script> up|down <device> <local_ip> <remote_ip> <routes>...`
    #[arg(long = "up-down", env = "SHTUN_UP_DOWN", value_name = "SCRIPT")]
    pub up_down: Option<PathBuf>,

    /// Agent command on the remote host
    #[arg(long = "agent", env = "SHTUN_AGENT", default_value = AGENT_COMMAND, value_name = "PATH")]
    pub agent: String,

    /// Regular expression matching the remote shell prompt
    #[arg(long = "prompt", default_value = DEFAULT_PROMPT, value_name = "REGEX")]
    pub prompt: String,

    /// Seconds to wait for the remote prompt and agent readiness
    #[arg(
        long = "prompt-timeout",
        default_value_t = PROMPT_TIMEOUT.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..),
        value_name = "SECS"
    )]
    pub prompt_timeout: u64,

    /// Seconds without local traffic before a keepalive is sent
    #[arg(
        long = "keepalive",
        default_value_t = KEEPALIVE_INTERVAL.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..),
        value_name = "SECS"
    )]
    pub keepalive: u64,

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

    /// Do not print the throughput status line
    #[arg(long = "no-stats")]
    pub no_stats: bool,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Log to file instead of stderr
    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(long = "log-format", default_value = "text")]
    pub log_format: CliLogFormat,

    /// Command that opens the interactive remote shell
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl Cli {
    /// Channel configuration from the prompt options.
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            prompt: self.prompt.clone(),
            prompt_timeout: Duration::from_secs(self.prompt_timeout),
            ..ChannelConfig::default()
        }
    }

    /// Keepalive interval.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive)
    }

    /// Tunnel block with host bits cleared.
    pub fn tunnel_block(&self) -> Ipv4Net {
        self.tunnel_cidr.trunc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_minimal() {
        let cli = Cli::try_parse_from(["shtun", "--", "ssh", "-tt", "host"]).unwrap();
        assert_eq!(cli.command, vec!["ssh", "-tt", "host"]);
        assert!(cli.routes.is_empty());
        assert_eq!(cli.tunnel_cidr, "100.64.0.0/16".parse::<Ipv4Net>().unwrap());
        assert_eq!(cli.agent, "tunnel-agent");
        assert_eq!(cli.prompt, DEFAULT_PROMPT);
        assert_eq!(cli.prompt_timeout, 30);
        assert_eq!(cli.keepalive, 10);
        assert_eq!(cli.mtu, 1500);
        assert!(!cli.no_sudo);
        assert!(!cli.no_stats);
        assert_eq!(cli.verbose, 0);
        assert_eq!(cli.log_format, CliLogFormat::Text);
    }

    #[test]
    fn command_is_required() {
        assert!(Cli::try_parse_from(["shtun"]).is_err());
        assert!(Cli::try_parse_from(["shtun", "-r", "10.0.0.0/8"]).is_err());
    }

    #[test]
    fn parse_routes() {
        let cli = Cli::try_parse_from([
            "shtun",
            "-r",
            "10.0.0.0/16",
            "--route",
            "192.168.1.0/24",
            "--",
            "aws",
            "ssm",
            "start-session",
            "--target",
            "i-0123",
        ])
        .unwrap();
        assert_eq!(cli.routes.len(), 2);
        assert_eq!(cli.routes[1], "192.168.1.0/24".parse::<IpNet>().unwrap());
        // options after -- belong to the remote shell command
        assert_eq!(cli.command.last().map(String::as_str), Some("i-0123"));
    }

    #[test]
    fn parse_invalid_values() {
        assert!(Cli::try_parse_from(["shtun", "-r", "not-a-net", "--", "sh"]).is_err());
        assert!(Cli::try_parse_from(["shtun", "--tunnel-cidr", "fd00::/64", "--", "sh"]).is_err());
        assert!(Cli::try_parse_from(["shtun", "--mtu", "100", "--", "sh"]).is_err());
        assert!(Cli::try_parse_from(["shtun", "--mtu", "9000", "--", "ssh", "-tt", "h"]).is_err());
        assert!(Cli::try_parse_from(["shtun", "--mtu", "3001", "--", "sh"]).is_err());
        assert!(Cli::try_parse_from(["shtun", "--mtu", "3000", "--", "sh"]).is_ok());
        assert!(Cli::try_parse_from(["shtun", "--keepalive", "0", "--", "sh"]).is_err());
    }

    #[test]
    fn tunnel_block_drops_host_bits() {
        let cli = Cli::try_parse_from(["shtun", "--tunnel-cidr", "10.9.8.7/24", "--", "sh"]).unwrap();
        assert_eq!(cli.tunnel_block(), "10.9.8.0/24".parse::<Ipv4Net>().unwrap());
    }

    #[test]
    fn channel_config_from_options() {
        let cli = Cli::try_parse_from([
            "shtun",
            "--prompt",
            r"\$ $",
            "--prompt-timeout",
            "5",
            "--",
            "sh",
        ])
        .unwrap();
        let config = cli.channel_config();
        assert_eq!(config.prompt, r"\$ $");
        assert_eq!(config.prompt_timeout, Duration::from_secs(5));
        assert_eq!(config.read_timeout, ChannelConfig::default().read_timeout);
    }

    #[test]
    fn parse_logging() {
        let cli = Cli::try_parse_from([
            "shtun",
            "-vv",
            "--log-file",
            "/tmp/shtun.log",
            "--log-format",
            "json",
            "--no-stats",
            "--no-sudo",
            "--",
            "sh",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_file, Some(PathBuf::from("/tmp/shtun.log")));
        assert_eq!(cli.log_format, CliLogFormat::Json);
        assert!(cli.no_stats);
        assert!(cli.no_sudo);
    }
}
