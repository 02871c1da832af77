//! Peer routing: domain patterns, the peer directory, and route
//! installation for resolved addresses.

mod directory;
mod installer;
pub mod pattern;
mod peer;

pub use directory::PeerDirectory;
pub use installer::{InstallOutcome, RouteInstaller};
pub use pattern::{DomainPattern, PatternError};
pub use peer::{DNS_PORT, PeerKind, PeerRoute, parse_resolver};
