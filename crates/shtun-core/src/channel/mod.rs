//! Remote shell channel.
//!
//! The only transport the tunnel has is an interactive shell: text goes in
//! on the process's stdin, text comes out of its stdout. This module drives
//! such a session expect-style (wait for a pattern, send a line) and then
//! exposes it as independent line reader and line writer halves for the
//! packet pump.

mod lines;
mod shell;

use std::time::Duration;

pub use lines::{Expected, ShellReader, ShellWriter};
pub use shell::{ProcessChannel, ShellChannel};

use crate::constants::{CHANNEL_READ_TIMEOUT, DEFAULT_PROMPT, PROMPT_TIMEOUT};

/// Outcome of a bounded line read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead {
    /// One line, without its terminating newline.
    Line(String),
    /// Nothing complete arrived within the bound. Not an error.
    Timeout,
    /// The remote end closed the stream.
    Eof,
}

/// Remote shell channel configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Regular expression matching the remote shell prompt.
    pub prompt: String,
    /// Bound on waiting for the prompt.
    pub prompt_timeout: Duration,
    /// Bound on a single line read once the tunnel is running.
    pub read_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            prompt_timeout: PROMPT_TIMEOUT,
            read_timeout: CHANNEL_READ_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_config_default() {
        let config = ChannelConfig::default();
        assert_eq!(config.prompt, DEFAULT_PROMPT);
        assert_eq!(config.prompt_timeout, Duration::from_secs(30));
        assert_eq!(config.read_timeout, Duration::from_secs(30));
    }
}
