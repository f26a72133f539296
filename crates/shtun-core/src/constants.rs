//! Protocol and configuration constants for shtun.

use std::time::Duration;

// =============================================================================
// Wire Framing
// =============================================================================

/// Leading character of a data frame line.
pub const DATA_MARKER: char = '%';

/// The whole keepalive frame line.
pub const KEEPALIVE_MARKER: char = '#';

// =============================================================================
// Timing Constants
// =============================================================================

/// Idle period after which a keepalive frame is sent instead of data.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Bound on a single line read from the remote shell. Not a liveness timer.
pub const CHANNEL_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for the shell prompt and for the agent to report ready.
pub const PROMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period between Ctrl-C and `exit` when closing the shell.
pub const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// How long `exit` may take before the shell process is killed.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// The agent gives up when stdin has been silent this long.
pub const AGENT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// The agent polls stdin with this bound so idleness is noticed promptly.
pub const AGENT_READ_TIMEOUT: Duration = Duration::from_secs(1);

// =============================================================================
// Statistics
// =============================================================================

/// Length of the sliding throughput window.
pub const STATS_WINDOW: Duration = Duration::from_secs(10);

/// Status line refresh interval.
pub const STATS_REFRESH: Duration = Duration::from_millis(500);

// =============================================================================
// Device Constants
// =============================================================================

/// Default tun MTU.
pub const DEFAULT_MTU: u16 = 1500;

/// Smallest MTU an IPv4 link may have.
pub const MIN_MTU: u16 = 576;

/// Largest MTU whose data frames fit in one canonical-mode tty line.
pub const MAX_MTU: u16 = 3000;

/// Extra room in the read buffer beyond the MTU.
pub const TUN_READ_OVERHEAD: usize = 4;

/// Longest line a canonical-mode pty delivers intact, excluding the newline.
pub const MAX_LINE_LEN: usize = 4094;

/// Pending output without a newline beyond this is discarded as noise.
pub const MAX_PENDING_LINE: usize = 4 * MAX_LINE_LEN;

/// Interface name prefix, followed by the two low octets of the local IP.
pub const DEVICE_PREFIX: &str = "shtun";

/// Default block for random tunnel endpoint addresses (RFC 6598).
pub const DEFAULT_TUNNEL_CIDR: &str = "100.64.0.0/16";

// =============================================================================
// Agent Contract
// =============================================================================

/// Default remote agent command.
pub const AGENT_COMMAND: &str = "tunnel-agent";

/// Pattern the agent's readiness line matches.
pub const AGENT_READY_PATTERN: &str = r"# Agent device \S+ is ready";

/// Pattern the remote shell prints when the agent is missing.
pub const AGENT_MISSING_PATTERN: &str = "command not found";

/// Default remote shell prompt.
pub const DEFAULT_PROMPT: &str = r"sh.*[$#] $";
