//! Query evaluation.
//!
//! The pipeline per query:
//! 1. Only class IN, type A questions are considered
//! 2. The peer directory picks the first peer with a matching pattern
//! 3. The query is forwarded to that peer's resolver
//! 4. Every A answer gets a host route via the peer
//! 5. The reply is handed back as the answer to use
//!
//! Anything that drops out before step 5 without an error is a
//! pass-through: the caller resolves the query as it normally would.

use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::Message;
use tracing::{debug, error, warn};

use crate::error::ForwardError;
use crate::forward::Forwarder;
use crate::routes::{InstallOutcome, PeerDirectory, RouteInstaller};
use crate::transport::Protocol;

/// What the caller hands in for one query.
#[derive(Debug, Clone, Copy)]
pub struct QueryContext<'a> {
    pub query: &'a Message,
    /// Transport for the first forwarding attempt.
    pub protocol: Protocol,
    /// Bound on each forwarding round trip.
    pub timeout: Duration,
}

/// Action to take for a DNS query.
#[derive(Debug)]
pub enum QueryAction {
    /// Not handled here; continue resolving normally.
    PassThrough,
    /// Answer the client with `reply` and stop resolving.
    Synthesized { reply: Message, peer: String },
}

/// Outcome of evaluating one query.
///
/// Route installation outcomes are kept apart from the answer: they are
/// diagnostics and never change what the client receives.
#[derive(Debug)]
pub struct Evaluation {
    pub action: QueryAction,
    pub installs: Vec<InstallOutcome>,
}

impl Evaluation {
    fn pass_through() -> Self {
        Self {
            action: QueryAction::PassThrough,
            installs: Vec::new(),
        }
    }
}

/// Resolver handles per-query routing decisions.
///
/// Shares one read-only [`PeerDirectory`]; safe to call from any number
/// of concurrent query tasks.
pub struct Resolver {
    directory: Arc<PeerDirectory>,
    forwarder: Forwarder,
    installer: RouteInstaller,
}

impl Resolver {
    pub fn new(directory: Arc<PeerDirectory>, forwarder: Forwarder, installer: RouteInstaller) -> Self {
        Self {
            directory,
            forwarder,
            installer,
        }
    }

    /// Evaluate one query.
    ///
    /// Errors are forwarding failures for a matched query; the caller
    /// decides how to answer the client.
    pub async fn evaluate(&self, ctx: &QueryContext<'_>) -> Result<Evaluation, ForwardError> {
        let Some((peer, domain)) = self.directory.route(ctx.query) else {
            debug!(id = ctx.query.id(), "no peer for query");
            return Ok(Evaluation::pass_through());
        };

        let reply = self.forwarder.forward(peer, ctx).await.map_err(|e| {
            warn!(%domain, peer = %peer.name, error = %e, "forwarding failed");
            e
        })?;

        if reply.answers().is_empty() {
            debug!(%domain, peer = %peer.name, "empty answer, passing through");
            return Ok(Evaluation::pass_through());
        }

        // Run installation in its own task so it completes even if the
        // caller stops waiting for this query.
        let installer = self.installer.clone();
        let task_peer = peer.clone();
        let task_reply = reply.clone();
        let installs = match tokio::spawn(async move {
            installer.install_reply(&task_peer, &task_reply).await
        })
        .await
        {
            Ok(installs) => installs,
            Err(e) => {
                error!(%domain, error = %e, "route installation task failed");
                Vec::new()
            }
        };

        Ok(Evaluation {
            action: QueryAction::Synthesized {
                reply,
                peer: peer.name.clone(),
            },
            installs,
        })
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }
}
