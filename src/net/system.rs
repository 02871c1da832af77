//! Host networking through `ip` (iproute2) and `wg` (wireguard-tools).

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::process::Command;
use tracing::debug;

use super::{HostRoute, Link, NetworkStack, TunnelKey};
use crate::error::NetError;

/// [`NetworkStack`] backed by the host's `ip` and `wg` binaries.
///
/// `wg set ... allowed-ips` replaces a peer's whole set, so the additive
/// update is a read-modify-write. Those are serialized per tunnel device.
#[derive(Default)]
pub struct SystemStack {
    device_locks: Mutex<FxHashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SystemStack {
    pub fn new() -> Self {
        Self::default()
    }

    fn device_lock(&self, device: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .device_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(device.to_string()).or_default().clone()
    }
}

#[async_trait]
impl NetworkStack for SystemStack {
    async fn link_by_name(&self, name: &str) -> Result<Link, NetError> {
        let output = run("ip", &["-o", "link", "show", "dev", name])
            .await
            .map_err(|e| match e {
                NetError::Command { .. } => NetError::NoSuchLink(name.to_string()),
                other => other,
            })?;
        let index = parse_link_index(&output)?;

        Ok(Link {
            name: name.to_string(),
            index,
        })
    }

    async fn replace_route(&self, route: &HostRoute) -> Result<(), NetError> {
        let destination = format!("{}/32", route.destination);
        let mut args = vec![
            "route",
            "replace",
            destination.as_str(),
            "dev",
            route.link.name.as_str(),
        ];
        let gateway = route.gateway.map(|gw| gw.to_string());
        if let Some(gateway) = gateway.as_deref() {
            args.extend(["via", gateway]);
        }

        run("ip", &args).await.map(drop)
    }

    async fn add_allowed_address(
        &self,
        device: &Link,
        key: &TunnelKey,
        destination: Ipv4Addr,
    ) -> Result<(), NetError> {
        let lock = self.device_lock(&device.name);
        let _guard = lock.lock().await;

        let key = key.to_base64();
        let current = run("wg", &["show", device.name.as_str(), "allowed-ips"]).await?;
        let Some(allowed) = merge_allowed_ips(&current, &key, destination) else {
            debug!(device = %device, %destination, "address already allowed");
            return Ok(());
        };

        run(
            "wg",
            &[
                "set",
                device.name.as_str(),
                "peer",
                key.as_str(),
                "allowed-ips",
                allowed.as_str(),
            ],
        )
        .await
        .map(drop)
    }
}

async fn run(command: &'static str, args: &[&str]) -> Result<String, NetError> {
    debug!(command, args = ?args, "running");

    let output = Command::new(command)
        .args(args)
        .output()
        .await
        .map_err(|source| NetError::Spawn { command, source })?;

    if !output.status.success() {
        return Err(NetError::Command {
            command,
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Extract the interface index from `ip -o link show` output
/// (`4: wg0: <POINTOPOINT,NOARP,UP> mtu 1420 ...`).
fn parse_link_index(output: &str) -> Result<u32, NetError> {
    output
        .split(':')
        .next()
        .and_then(|index| index.trim().parse().ok())
        .ok_or_else(|| NetError::Output {
            command: "ip",
            reason: format!("no interface index in {:?}", output.trim()),
        })
}

/// Compute the comma separated allowed-ips list for `key` with
/// `destination` added, from `wg show <dev> allowed-ips` output.
///
/// Returns `None` when the destination is already allowed.
fn merge_allowed_ips(output: &str, key: &str, destination: Ipv4Addr) -> Option<String> {
    let host = format!("{destination}/32");
    let mut allowed: Vec<&str> = output
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .find(|(peer, _)| peer.trim() == key)
        .map(|(_, ips)| {
            ips.split_whitespace()
                .filter(|ip| *ip != "(none)")
                .collect()
        })
        .unwrap_or_default();

    if allowed.contains(&host.as_str()) {
        return None;
    }
    allowed.push(&host);
    Some(allowed.join(","))
}
