//! Recording network configurator.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use ipnet::IpNet;
use shtun_core::tunnel::NetworkConfigurator;
use shtun_core::{Error, Result};

/// [`NetworkConfigurator`] that records every call as a line such as
/// `add_route 10.0.0.0/8 via 100.64.12.11`.
///
/// Clones share the log, so a test keeps one clone for inspection while the
/// endpoint owns another. Any operation can be made to fail.
#[derive(Debug, Clone, Default)]
pub struct FakeNetwork {
    calls: Arc<Mutex<Vec<String>>>,
    fail: Arc<Mutex<Vec<&'static str>>>,
}

impl FakeNetwork {
    /// Create a configurator where everything succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make operation `op` (e.g. `"create_interface"`) fail from now on.
    pub fn fail_on(&self, op: &'static str) {
        self.fail.lock().unwrap().push(op);
    }

    /// All recorded calls in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls to operation `op`.
    pub fn count(&self, op: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.split(' ').next() == Some(op))
            .count()
    }

    fn record(&self, op: &'static str, detail: String) -> Result<()> {
        let line = if detail.is_empty() {
            op.to_string()
        } else {
            format!("{op} {detail}")
        };
        self.calls.lock().unwrap().push(line);
        if self.fail.lock().unwrap().contains(&op) {
            return Err(Error::device(format!("{op} failed (injected)")));
        }
        Ok(())
    }
}

impl NetworkConfigurator for FakeNetwork {
    fn create_interface(&self, name: &str, local: Ipv4Addr, peer: Ipv4Addr, mtu: u16) -> Result<()> {
        self.record("create_interface", format!("{name} {local} peer {peer} mtu {mtu}"))
    }

    fn destroy_interface(&self, name: &str) -> Result<()> {
        self.record("destroy_interface", name.to_string())
    }

    fn add_route(&self, cidr: &IpNet, via: Ipv4Addr) -> Result<()> {
        self.record("add_route", format!("{cidr} via {via}"))
    }

    fn enable_forwarding(&self) -> Result<()> {
        self.record("enable_forwarding", String::new())
    }

    fn add_nat_rule(&self, name: &str, peer: Ipv4Addr) -> Result<()> {
        self.record("add_nat_rule", format!("{name} {peer}"))
    }

    fn remove_nat_rule(&self, name: &str, peer: Ipv4Addr) -> Result<()> {
        self.record("remove_nat_rule", format!("{name} {peer}"))
    }
}
