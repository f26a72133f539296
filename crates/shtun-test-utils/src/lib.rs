//! shtun-test-utils: Test infrastructure for shtun.
//!
//! Provides:
//! - FakeTun: In-memory tun device driven from a test handle
//! - FakeOpener: TunOpener handing out one FakeTun
//! - FakeNetwork: NetworkConfigurator that records calls instead of running them
//! - memory_channel: ShellChannel over in-memory pipes with a scriptable remote shell

mod fake_network;
mod fake_tun;
mod remote_shell;

pub use fake_network::FakeNetwork;
pub use fake_tun::{FakeOpener, FakeTun, FakeTunHandle};
pub use remote_shell::{MemoryChannel, RemoteShell, memory_channel};
