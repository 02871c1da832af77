//! The peer directory and domain router.
//!
//! Loaded once from the peer file, then shared read-only between query
//! tasks, so lookups take no locks.

use std::net::SocketAddr;

use hickory_proto::op::Message;
use tracing::info;

use super::pattern::{DomainPattern, normalize};
use super::peer::{DNS_PORT, PeerKind, PeerRoute, parse_resolver};
use crate::config::{PeerConfig, PeersFile};
use crate::dns::{normalized_name, qualifying_question};
use crate::error::ConfigError;
use crate::net::{Link, NetworkStack, TunnelKey};

/// Peers in configuration order.
#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    peers: Vec<PeerRoute>,
}

impl PeerDirectory {
    pub fn new(peers: Vec<PeerRoute>) -> Self {
        Self { peers }
    }

    /// Build the directory from a parsed peer file, resolving link names
    /// through `stack`. Any invalid entry fails the whole load.
    pub async fn load(file: &PeersFile, stack: &dyn NetworkStack) -> Result<Self, ConfigError> {
        let mut peers = Vec::with_capacity(file.peer.len());
        for config in &file.peer {
            peers.push(load_peer(config, stack).await?);
        }
        Ok(Self { peers })
    }

    /// First peer owning a pattern that matches `name`.
    ///
    /// Peers are tried in configuration order and patterns in the order a
    /// peer lists them, so earlier entries win over later overlapping ones.
    pub fn lookup(&self, name: &str) -> Option<&PeerRoute> {
        let name = normalize(name);
        self.peers.iter().find(|peer| {
            peer.patterns
                .iter()
                .any(|pattern| pattern.matches_normalized(name.as_bytes()))
        })
    }

    /// Route a query: only class IN, type A questions are looked up.
    ///
    /// Returns the matched peer and the normalized query name.
    pub fn route(&self, query: &Message) -> Option<(&PeerRoute, String)> {
        let question = qualifying_question(query)?;
        let name = normalized_name(question.name());
        let peer = self.lookup(&name)?;
        Some((peer, name))
    }

    pub fn peers(&self) -> &[PeerRoute] {
        &self.peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Log the loaded peers.
    pub fn log_summary(&self) {
        info!(peers = self.peers.len(), "peers loaded");
        for peer in &self.peers {
            let resolvers: Vec<_> = peer.resolvers.iter().map(ToString::to_string).collect();
            let patterns: Vec<_> = peer.patterns.iter().map(DomainPattern::as_str).collect();
            match &peer.kind {
                PeerKind::Gateway => info!(
                    peer = %peer.name,
                    link = %peer.link,
                    endpoint = ?peer.endpoint,
                    resolvers = %resolvers.join(", "),
                    domains = %patterns.join(", "),
                    "gateway peer"
                ),
                PeerKind::Tunnel { public_key, device } => info!(
                    peer = %peer.name,
                    link = %peer.link,
                    tunnel = %device,
                    public_key = %public_key,
                    endpoint = ?peer.endpoint,
                    resolvers = %resolvers.join(", "),
                    domains = %patterns.join(", "),
                    "tunnel peer"
                ),
            }
        }
    }
}

async fn load_peer(config: &PeerConfig, stack: &dyn NetworkStack) -> Result<PeerRoute, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidPeer {
        peer: config.name.clone(),
        reason: reason.to_string(),
    };

    if config.name.trim().is_empty() {
        return Err(invalid("name is empty"));
    }

    let resolvers = if config.resolvers.is_empty() {
        config
            .endpoint
            .map(|endpoint| vec![SocketAddr::new(endpoint, DNS_PORT)])
            .unwrap_or_default()
    } else {
        config
            .resolvers
            .iter()
            .map(|address| {
                parse_resolver(address).ok_or_else(|| ConfigError::InvalidResolver {
                    peer: config.name.clone(),
                    address: address.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?
    };
    if resolvers.is_empty() {
        return Err(invalid("needs at least one resolver or an endpoint"));
    }

    if config.domains.is_empty() {
        return Err(invalid("needs at least one domain"));
    }
    let patterns = config
        .domains
        .iter()
        .map(|domain| {
            DomainPattern::compile(domain).map_err(|e| ConfigError::InvalidPattern {
                peer: config.name.clone(),
                pattern: domain.clone(),
                reason: e.reason(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let link = resolve_link(config, &config.link, stack).await?;

    let kind = match &config.public_key {
        None => PeerKind::Gateway,
        Some(encoded) => {
            let public_key =
                TunnelKey::from_base64(encoded).map_err(|reason| ConfigError::InvalidKey {
                    peer: config.name.clone(),
                    reason,
                })?;
            let device = match &config.tunnel_link {
                Some(name) => resolve_link(config, name, stack).await?,
                None => link.clone(),
            };
            PeerKind::Tunnel { public_key, device }
        }
    };

    Ok(PeerRoute {
        name: config.name.clone(),
        resolvers,
        link,
        endpoint: config.endpoint,
        kind,
        patterns,
    })
}

async fn resolve_link(
    config: &PeerConfig,
    name: &str,
    stack: &dyn NetworkStack,
) -> Result<Link, ConfigError> {
    stack
        .link_by_name(name)
        .await
        .map_err(|source| ConfigError::Link {
            peer: config.name.clone(),
            link: name.to_string(),
            source,
        })
}
