//! Error types.
//!
//! Errors fall into three classes with different propagation rules:
//!
//! - [`ConfigError`]: fatal at load time, the proxy never starts half configured.
//! - [`ForwardError`]: returned per query to the caller of the evaluation step.
//! - [`InstallError`]: reported as a diagnostic and never fails a DNS answer.
//!
//! [`NetError`] is the failure type of the networking primitives and is
//! wrapped by the other two where it surfaces.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Peer file could not be turned into a usable directory.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read peer file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse peer file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("peer '{peer}': {reason}")]
    InvalidPeer { peer: String, reason: String },

    #[error("peer '{peer}': invalid domain pattern '{pattern}': {reason}")]
    InvalidPattern {
        peer: String,
        pattern: String,
        reason: &'static str,
    },

    #[error("peer '{peer}': invalid tunnel public key: {reason}")]
    InvalidKey { peer: String, reason: String },

    #[error("peer '{peer}': invalid resolver address '{address}'")]
    InvalidResolver { peer: String, address: String },

    #[error("peer '{peer}': cannot resolve link '{link}': {source}")]
    Link {
        peer: String,
        link: String,
        #[source]
        source: NetError,
    },
}

/// A query could not be forwarded to the peer's resolver.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("I/O error talking to {server}: {source}")]
    Io {
        server: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("query to {server} timed out after {timeout:?}")]
    Timeout { server: SocketAddr, timeout: Duration },

    #[error("malformed reply from {server}: {reason}")]
    Malformed { server: SocketAddr, reason: String },

    #[error("reply from {server} carries id {got}, expected {expected}")]
    IdMismatch {
        server: SocketAddr,
        expected: u16,
        got: u16,
    },

    #[error("failed to encode query: {0}")]
    Encode(String),

    #[error("peer '{0}' has no resolver")]
    NoResolver(String),
}

/// Failure of a networking primitive (`ip` / `wg`).
#[derive(Debug, Error)]
pub enum NetError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    Command {
        command: &'static str,
        status: i32,
        stderr: String,
    },

    #[error("unexpected output from {command}: {reason}")]
    Output {
        command: &'static str,
        reason: String,
    },

    #[error("no such link: {0}")]
    NoSuchLink(String),
}

/// Which primitive an installation attempt failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStep {
    Route,
    AllowedAddress,
}

/// A route for one resolved address could not be installed.
#[derive(Debug, Error)]
#[error("failed to install {step:?} for {destination}/32 via {peer}: {source}")]
pub struct InstallError {
    pub destination: Ipv4Addr,
    pub peer: String,
    pub step: InstallStep,
    #[source]
    pub source: NetError,
}
