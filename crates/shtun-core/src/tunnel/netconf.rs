//! Privileged network configuration.
//!
//! Everything that needs root lives behind [`NetworkConfigurator`] so the
//! rest of the tunnel can be exercised without touching the host network.

use std::net::Ipv4Addr;

use ipnet::IpNet;

use crate::error::Result;

/// Narrow interface to the host's network configuration.
pub trait NetworkConfigurator {
    /// Create a persistent tun interface owned by the current user, assign
    /// the point-to-point address pair and bring it up.
    fn create_interface(&self, name: &str, local: Ipv4Addr, peer: Ipv4Addr, mtu: u16)
    -> Result<()>;

    /// Bring the interface down and delete it.
    fn destroy_interface(&self, name: &str) -> Result<()>;

    /// Route `cidr` through the tunnel peer.
    fn add_route(&self, cidr: &IpNet, via: Ipv4Addr) -> Result<()>;

    /// Turn on IPv4 forwarding.
    fn enable_forwarding(&self) -> Result<()>;

    /// Masquerade traffic from `peer`, tagged with `name`.
    fn add_nat_rule(&self, name: &str, peer: Ipv4Addr) -> Result<()>;

    /// Remove the rule installed by `add_nat_rule`.
    fn remove_nat_rule(&self, name: &str, peer: Ipv4Addr) -> Result<()>;
}

#[cfg(target_os = "linux")]
pub use linux::IpCommand;

#[cfg(target_os = "linux")]
mod linux {
    use std::net::Ipv4Addr;
    use std::process::Command;

    use ipnet::IpNet;
    use tracing::debug;

    use super::NetworkConfigurator;
    use crate::error::{Error, Result};

    /// [`NetworkConfigurator`] that shells out to `ip`, `sysctl` and
    /// `iptables`, optionally through `sudo`.
    #[derive(Debug, Clone)]
    pub struct IpCommand {
        sudo: bool,
    }

    impl IpCommand {
        /// Create a configurator. With `sudo` every command is prefixed
        /// with `sudo`.
        pub fn new(sudo: bool) -> Self {
            Self { sudo }
        }

        fn command_line(&self, args: &[&str]) -> Vec<String> {
            let mut line = Vec::with_capacity(args.len() + 1);
            if self.sudo {
                line.push("sudo".to_string());
            }
            line.extend(args.iter().map(|a| a.to_string()));
            line
        }

        fn run(&self, args: &[&str]) -> Result<()> {
            let line = self.command_line(args);
            let (program, rest) = line
                .split_first()
                .ok_or_else(|| Error::device("empty network command"))?;
            debug!(command = %line.join(" "), "Running network command");

            let output = Command::new(program)
                .args(rest)
                .output()
                .map_err(|e| Error::device(format!("failed to run {program}: {e}")))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(Error::device(format!(
                    "'{}' failed ({}): {}",
                    line.join(" "),
                    output.status,
                    stderr.trim()
                )));
            }
            Ok(())
        }

        fn nat_rule(action: &'static str, name: &str, peer: Ipv4Addr) -> Vec<String> {
            let peer = peer.to_string();
            [
                "iptables",
                "-t",
                "nat",
                action,
                "POSTROUTING",
                "-m",
                "comment",
                "--comment",
                name,
                "-s",
                peer.as_str(),
                "-j",
                "MASQUERADE",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect()
        }

        fn run_owned(&self, args: &[String]) -> Result<()> {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            self.run(&args)
        }
    }

    impl Default for IpCommand {
        fn default() -> Self {
            Self::new(true)
        }
    }

    impl NetworkConfigurator for IpCommand {
        fn create_interface(
            &self,
            name: &str,
            local: Ipv4Addr,
            peer: Ipv4Addr,
            mtu: u16,
        ) -> Result<()> {
            let uid = nix::unistd::getuid().to_string();
            let local = local.to_string();
            let peer = peer.to_string();
            let mtu = mtu.to_string();
            self.run(&["ip", "tuntap", "add", name, "mode", "tun", "user", uid.as_str()])?;
            self.run(&["ip", "addr", "add", local.as_str(), "peer", peer.as_str(), "dev", name])?;
            self.run(&["ip", "link", "set", name, "mtu", mtu.as_str(), "up"])
        }

        fn destroy_interface(&self, name: &str) -> Result<()> {
            let down = self.run(&["ip", "link", "set", name, "down"]);
            let del = self.run(&["ip", "tuntap", "del", name, "mode", "tun"]);
            down.and(del)
        }

        fn add_route(&self, cidr: &IpNet, via: Ipv4Addr) -> Result<()> {
            let cidr = cidr.to_string();
            let via = via.to_string();
            self.run(&["ip", "route", "add", cidr.as_str(), "via", via.as_str()])
        }

        fn enable_forwarding(&self) -> Result<()> {
            self.run(&["sysctl", "-q", "-w", "net.ipv4.ip_forward=1"])
        }

        fn add_nat_rule(&self, name: &str, peer: Ipv4Addr) -> Result<()> {
            self.run_owned(&Self::nat_rule("-I", name, peer))
        }

        fn remove_nat_rule(&self, name: &str, peer: Ipv4Addr) -> Result<()> {
            self.run_owned(&Self::nat_rule("-D", name, peer))
        }
    }

    // =========================================================================
    // Tests
    // =========================================================================

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn command_line_with_and_without_sudo() {
            let args = ["ip", "link", "set", "shtun.12.10", "up"];
            assert_eq!(
                IpCommand::new(true).command_line(&args).join(" "),
                "sudo ip link set shtun.12.10 up"
            );
            assert_eq!(
                IpCommand::new(false).command_line(&args).join(" "),
                "ip link set shtun.12.10 up"
            );
        }

        #[test]
        fn nat_rule_is_tagged_with_interface_name() {
            let rule = IpCommand::nat_rule("-I", "shtun.12.10", "100.64.12.11".parse().unwrap());
            assert_eq!(
                rule.join(" "),
                "iptables -t nat -I POSTROUTING -m comment --comment shtun.12.10 \
                 -s 100.64.12.11 -j MASQUERADE"
            );
        }

        #[test]
        fn failing_command_is_device_error() {
            let net = IpCommand::new(false);
            let err = net.run(&["false"]).unwrap_err();
            assert!(matches!(err, Error::Device { .. }));

            let err = net.run(&["/nonexistent/shtun-ip"]).unwrap_err();
            assert!(matches!(err, Error::Device { .. }));
        }

        #[test]
        fn default_uses_sudo() {
            assert!(IpCommand::default().sudo);
        }
    }
}
