//! Boundary to the host networking stack.
//!
//! The route installer only needs three primitives: resolve a link by
//! name, replace a host route, and add an address to a tunnel peer's
//! allowed set. [`NetworkStack`] is that seam; [`SystemStack`] drives
//! `ip` and `wg` on the host.

mod system;

pub use system::SystemStack;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::NetError;

/// A network interface resolved at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub name: String,
    pub index: u32,
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A tunnel peer public key (Curve25519, 32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelKey([u8; 32]);

impl TunnelKey {
    pub const LEN: usize = 32;

    /// Parse the base64 form used by `wg` and peer files.
    pub fn from_base64(encoded: &str) -> Result<Self, String> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| e.to_string())?;
        let key: [u8; Self::LEN] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("expected {} bytes, got {}", Self::LEN, b.len()))?;
        Ok(Self(key))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

impl From<[u8; 32]> for TunnelKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for TunnelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for TunnelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TunnelKey({})", self.to_base64())
    }
}

/// A `/32` route to a single resolved address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRoute {
    pub destination: Ipv4Addr,
    pub link: Link,
    pub gateway: Option<IpAddr>,
}

impl fmt::Display for HostRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/32 dev {}", self.destination, self.link)?;
        if let Some(gateway) = self.gateway {
            write!(f, " via {gateway}")?;
        }
        Ok(())
    }
}

/// Primitives the route installer drives.
///
/// Both mutations are last-writer-wins: replacing a route that already
/// exists, or adding an address a peer already allows, succeeds.
#[async_trait]
pub trait NetworkStack: Send + Sync {
    async fn link_by_name(&self, name: &str) -> Result<Link, NetError>;

    async fn replace_route(&self, route: &HostRoute) -> Result<(), NetError>;

    /// Add `destination/32` to the allowed addresses of the tunnel peer
    /// keyed by `key` on `device`, keeping the addresses it already has.
    async fn add_allowed_address(
        &self,
        device: &Link,
        key: &TunnelKey,
        destination: Ipv4Addr,
    ) -> Result<(), NetError>;
}
