//! Routing targets.

use std::net::{IpAddr, SocketAddr};

use rand::seq::IndexedRandom;

use super::pattern::DomainPattern;
use crate::net::{Link, TunnelKey};

/// Port resolver addresses default to when none is given.
pub const DNS_PORT: u16 = 53;

/// How traffic reaches a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerKind {
    /// Plain next hop: only the host route is installed.
    Gateway,
    /// Encrypted tunnel: the tunnel peer also has to allow the address.
    Tunnel { public_key: TunnelKey, device: Link },
}

/// A routing target and the domains it resolves.
///
/// Built once at load time and shared read-only afterwards. The loader
/// guarantees at least one resolver and one pattern.
#[derive(Debug, Clone)]
pub struct PeerRoute {
    pub name: String,
    pub resolvers: Vec<SocketAddr>,
    pub link: Link,
    pub endpoint: Option<IpAddr>,
    pub kind: PeerKind,
    pub patterns: Vec<DomainPattern>,
}

impl PeerRoute {
    /// Pick the resolver for one query, uniformly at random.
    pub fn pick_resolver(&self) -> Option<SocketAddr> {
        match self.resolvers.as_slice() {
            [] => None,
            [only] => Some(*only),
            many => many.choose(&mut rand::rng()).copied(),
        }
    }

    pub fn is_tunnel(&self) -> bool {
        matches!(self.kind, PeerKind::Tunnel { .. })
    }
}

/// Parse a resolver address, defaulting the port to 53 for bare IPs.
pub fn parse_resolver(address: &str) -> Option<SocketAddr> {
    let address = address.trim();
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Some(addr);
    }
    address
        .parse::<IpAddr>()
        .ok()
        .map(|ip| SocketAddr::new(ip, DNS_PORT))
}
