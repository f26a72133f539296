//! shtun-core: Shared library for the shtun IP-over-shell tunnel.
//!
//! This crate provides:
//! - Line framing of IP packets for text-only channels
//! - The expect-style remote shell channel driver
//! - Tun device abstraction, network configuration and endpoint lifecycle
//! - The bidirectional packet pump
//! - Throughput statistics
//! - Logging setup

pub mod channel;
pub mod constants;
pub mod error;
pub mod frame;
pub mod logging;
pub mod stats;
pub mod tunnel;

pub use error::{Error, Result};
pub use frame::{Frame, FrameError};
pub use logging::{LogFormat, init_logging};
pub use stats::{StatsEngine, TrafficCounters};
