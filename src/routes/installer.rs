//! Installing host routes for resolved addresses.
//!
//! Installation is best effort. Every IN/A answer is attempted, a failure
//! is logged and reported in the returned outcomes, and none of it ever
//! turns into an error on the DNS answer path.

use std::net::Ipv4Addr;
use std::sync::Arc;

use hickory_proto::op::Message;
use tracing::{error, info};

use super::peer::{PeerKind, PeerRoute};
use crate::dns::a_records;
use crate::error::{InstallError, InstallStep};
use crate::net::{HostRoute, NetworkStack};

/// Result of installing one resolved address.
#[derive(Debug)]
pub struct InstallOutcome {
    pub destination: Ipv4Addr,
    /// Failed steps; empty when everything was installed.
    pub errors: Vec<InstallError>,
}

impl InstallOutcome {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Drives the [`NetworkStack`] for matched replies.
#[derive(Clone)]
pub struct RouteInstaller {
    stack: Arc<dyn NetworkStack>,
}

impl RouteInstaller {
    pub fn new(stack: Arc<dyn NetworkStack>) -> Self {
        Self { stack }
    }

    /// Install a route via `peer` for every IN/A answer in `reply`.
    pub async fn install_reply(&self, peer: &PeerRoute, reply: &Message) -> Vec<InstallOutcome> {
        let mut outcomes = Vec::new();
        for destination in a_records(reply) {
            outcomes.push(self.install(peer, destination).await);
        }
        outcomes
    }

    /// Route `destination/32` via `peer`.
    ///
    /// For tunnel peers the address is first added to the tunnel peer's
    /// allowed set; the route is replaced either way, so a destination that
    /// moves to another peer follows the latest answer.
    pub async fn install(&self, peer: &PeerRoute, destination: Ipv4Addr) -> InstallOutcome {
        let mut errors = Vec::new();
        let failed = |step, source| InstallError {
            destination,
            peer: peer.name.clone(),
            step,
            source,
        };

        if let PeerKind::Tunnel { public_key, device } = &peer.kind {
            if let Err(e) = self
                .stack
                .add_allowed_address(device, public_key, destination)
                .await
            {
                errors.push(failed(InstallStep::AllowedAddress, e));
            }
        }

        let route = HostRoute {
            destination,
            link: peer.link.clone(),
            gateway: peer.endpoint,
        };
        match self.stack.replace_route(&route).await {
            Ok(()) => info!(%route, peer = %peer.name, "routing via peer"),
            Err(e) => errors.push(failed(InstallStep::Route, e)),
        }

        for e in &errors {
            error!(error = %e, "route installation failed");
        }

        InstallOutcome {
            destination,
            errors,
        }
    }
}
