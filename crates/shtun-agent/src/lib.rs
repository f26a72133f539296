//! shtun-agent: Remote end of the shtun IP-over-shell tunnel.
//!
//! Provides:
//! - CLI argument parsing
//! - The agent lifecycle: device setup, readiness line, packet pump, teardown

pub mod agent;
pub mod cli;

pub use agent::{Agent, AgentConfig, ready_line};
pub use cli::{Cli, CliLogFormat};
