//! Line framing of IP packets.
//!
//! One frame per line, ASCII only:
//! - `%<base64>` carries one raw IP packet
//! - `#` is a keepalive with no payload
//!
//! Every other line is channel noise (shell banners, echo, agent log output)
//! and is ignored by the receiver. The framer never fragments; callers read
//! at most one packet per frame.

use base64::prelude::*;
use thiserror::Error;

use crate::constants::{DATA_MARKER, KEEPALIVE_MARKER};

/// One unit crossing the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A raw IP packet.
    Data(Vec<u8>),
    /// Liveness signal, no payload.
    Keepalive,
}

/// Malformed frame. Survivable: the line is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The data marker was followed by something that is not base64.
    #[error("malformed data frame: {0}")]
    InvalidBase64(String),
}

/// Encode a packet as a data frame line (without the trailing newline).
pub fn encode_data(packet: &[u8]) -> String {
    let mut line = String::with_capacity(1 + packet.len().div_ceil(3) * 4);
    line.push(DATA_MARKER);
    BASE64_STANDARD.encode_string(packet, &mut line);
    line
}

/// The keepalive frame line (without the trailing newline).
pub fn encode_keepalive() -> &'static str {
    "#"
}

/// Classify one received line.
///
/// Returns `Ok(None)` for noise. Trailing CR/LF are ignored so lines that
/// went through a pty decode the same as lines that did not.
pub fn decode(line: &str) -> Result<Option<Frame>, FrameError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut chars = line.chars();
    match chars.next() {
        Some(DATA_MARKER) => BASE64_STANDARD
            .decode(chars.as_str())
            .map(|payload| Some(Frame::Data(payload)))
            .map_err(|e| FrameError::InvalidBase64(e.to_string())),
        Some(KEEPALIVE_MARKER) if chars.as_str().is_empty() => Ok(Some(Frame::Keepalive)),
        _ => Ok(None),
    }
}

// =============================================================================
// Tests
// =============================================================================
