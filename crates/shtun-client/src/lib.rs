//! shtun-client: Initiator side of the shtun IP-over-shell tunnel.
//!
//! Provides:
//! - CLI argument parsing
//! - The tunnel session state machine and agent negotiation
//! - Up/down hook execution

pub mod cli;
pub mod controller;
pub mod hook;

pub use cli::{Cli, CliLogFormat};
pub use controller::{
    AgentStatus, SessionConfig, SessionPhase, TunnelSession, agent_command, negotiate_agent,
};
pub use hook::{HookAction, HookArgs, UpDownHook};
