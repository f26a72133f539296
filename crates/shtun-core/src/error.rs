//! Error types for shtun-core.

use thiserror::Error;

use crate::frame::FrameError;

/// Main error type for shtun operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Remote shell session failed to become ready or ended unexpectedly.
    #[error("channel error: {message}")]
    Channel { message: String },

    /// Malformed data frame.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Privileged network configuration failed.
    #[error("device error: {message}")]
    Device { message: String },

    /// The remote agent binary is missing on the target host.
    #[error("{agent}: command not found on the remote host")]
    AgentNotInstalled { agent: String },

    /// Up/down hook failure.
    #[error("hook error: {message}")]
    Hook { message: String },

    /// Invalid configuration value.
    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl Error {
    /// Shorthand for a channel error.
    pub fn channel(message: impl Into<String>) -> Self {
        Error::Channel {
            message: message.into(),
        }
    }

    /// Shorthand for a device error.
    pub fn device(message: impl Into<String>) -> Self {
        Error::Device {
            message: message.into(),
        }
    }

    /// Returns true if this error must terminate the session.
    ///
    /// Only malformed frames are survivable; they are logged and dropped.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Frame(_))
    }

    /// Returns a hint the user can act on, if there is one.
    pub fn hint(&self) -> Option<String> {
        match self {
            Error::AgentNotInstalled { agent } => Some(format!(
                "install '{agent}' on the remote host and make sure it is in $PATH \
                 (e.g. copy the tunnel-agent binary to /usr/local/bin)"
            )),
            _ => None,
        }
    }
}

/// Convenience result type for shtun operations.
pub type Result<T> = std::result::Result<T, Error>;
