//! Peer file format.
//!
//! ```toml
//! [[peer]]
//! name = "office"
//! link = "wg0"
//! endpoint = "10.0.0.1"
//! resolvers = ["10.0.0.1", "10.0.0.2:5353"]
//! public_key = "hGmDUfV3iHAdm7tHMNWpkHAuF5hsnRpOoJdQYtXRMFs="
//! tunnel_link = "wg0"
//! domains = ["*.internal.example"]
//! ```
//!
//! `resolvers` defaults to the endpoint on port 53. `public_key` switches
//! the peer to tunnel mode; `tunnel_link` defaults to `link`.

use std::net::IpAddr;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Top level of the peer file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeersFile {
    #[serde(default)]
    pub peer: Vec<PeerConfig>,
}

/// One `[[peer]]` table, as written.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeerConfig {
    pub name: String,
    pub link: String,
    #[serde(default)]
    pub endpoint: Option<IpAddr>,
    #[serde(default)]
    pub resolvers: Vec<String>,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub tunnel_link: Option<String>,
    pub domains: Vec<String>,
}

impl PeersFile {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }
}
