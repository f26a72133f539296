//! One side's tunnel interface and everything installed for it.

use std::net::Ipv4Addr;

use ipnet::IpNet;
use tracing::{Span, debug, info, info_span, warn};

use super::{NetworkConfigurator, TunDevice, TunOpener, TunnelConfig};
use crate::error::{Error, Result};

/// A tunnel interface, its routes and NAT rule.
///
/// `create` may fail half way; `destroy` then removes whatever exists.
/// Destroying is best effort, runs its external commands at most once and
/// also happens when the endpoint is dropped.
pub struct TunEndpoint<N: NetworkConfigurator, D: TunDevice> {
    name: String,
    local_ip: Ipv4Addr,
    peer_ip: Ipv4Addr,
    mtu: u16,
    routes: Vec<IpNet>,
    nat: bool,
    net: N,
    device: Option<D>,
    created: bool,
    destroyed: bool,
    span: Span,
}

impl<N: NetworkConfigurator, D: TunDevice> TunEndpoint<N, D> {
    /// Describe an endpoint. Nothing is touched until `create`.
    pub fn new(config: &TunnelConfig, net: N) -> Self {
        let name = config.device_name();
        let span = info_span!("endpoint", device = %name);
        Self {
            name,
            local_ip: config.local_ip,
            peer_ip: config.remote_ip,
            mtu: config.mtu,
            routes: Vec::new(),
            nat: false,
            net,
            device: None,
            created: false,
            destroyed: false,
            span,
        }
    }

    /// Interface name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Our address.
    pub fn local_ip(&self) -> Ipv4Addr {
        self.local_ip
    }

    /// The peer's address.
    pub fn peer_ip(&self) -> Ipv4Addr {
        self.peer_ip
    }

    /// Routes installed so far.
    pub fn routes(&self) -> &[IpNet] {
        &self.routes
    }

    /// Whether a NAT rule is installed.
    pub fn has_nat(&self) -> bool {
        self.nat
    }

    /// Create the interface and assign the address pair.
    pub fn create(&mut self) -> Result<()> {
        if self.destroyed {
            return Err(Error::device(format!("{} was already destroyed", self.name)));
        }
        let _enter = self.span.enter();
        // set first: a failure part way leaves something to clean up
        self.created = true;
        self.net
            .create_interface(&self.name, self.local_ip, self.peer_ip, self.mtu)?;
        info!(local_ip = %self.local_ip, peer_ip = %self.peer_ip, "Tunnel interface up");
        Ok(())
    }

    /// Open the interface for packet I/O.
    pub fn attach<O>(&mut self, opener: &O) -> Result<()>
    where
        O: TunOpener<Device = D>,
    {
        if !self.created || self.destroyed {
            return Err(Error::device(format!("{} is not up", self.name)));
        }
        let device = opener
            .open(&self.name, self.mtu)
            .map_err(|e| Error::device(format!("failed to open {}: {e}", self.name)))?;
        debug!(parent: &self.span, "Tunnel device opened");
        self.device = Some(device);
        Ok(())
    }

    /// The open device.
    pub fn device(&self) -> Result<&D> {
        self.device
            .as_ref()
            .ok_or_else(|| Error::device(format!("{} is not open", self.name)))
    }

    /// Route `cidr` through the peer.
    pub fn add_route(&mut self, cidr: IpNet) -> Result<()> {
        let _enter = self.span.enter();
        self.net.add_route(&cidr, self.peer_ip)?;
        info!(route = %cidr, via = %self.peer_ip, "Route added");
        self.routes.push(cidr);
        Ok(())
    }

    /// Act as a gateway for the peer. Failures are logged, not returned.
    pub fn enable_forwarding_and_nat(&mut self) {
        let _enter = self.span.enter();
        if let Err(e) = self.net.enable_forwarding() {
            warn!(error = %e, "Failed to enable IP forwarding");
        }
        match self.net.add_nat_rule(&self.name, self.peer_ip) {
            Ok(()) => {
                debug!(peer_ip = %self.peer_ip, "NAT enabled");
                self.nat = true;
            }
            Err(e) => warn!(error = %e, "Failed to enable NAT"),
        }
    }

    /// Whether `destroy` has run.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Close the device and remove the interface and NAT rule.
    ///
    /// Every step is attempted regardless of earlier failures. Calling this
    /// again does nothing.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        let _enter = self.span.enter();

        // close the fd before deleting the interface
        drop(self.device.take());

        if self.created {
            if let Err(e) = self.net.destroy_interface(&self.name) {
                warn!(error = %e, "Failed to remove tunnel interface");
            }
        }
        if self.nat {
            if let Err(e) = self.net.remove_nat_rule(&self.name, self.peer_ip) {
                warn!(error = %e, "Failed to remove NAT rule");
            }
            self.nat = false;
        }
        self.routes.clear();
        info!("Tunnel interface destroyed");
    }
}

impl<N: NetworkConfigurator, D: TunDevice> Drop for TunEndpoint<N, D> {
    fn drop(&mut self) {
        self.destroy();
    }
}
