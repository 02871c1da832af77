//! DNS proxy orchestration.
//!
//! Binds transports, evaluates each query against the peer directory, and
//! resolves everything else through the default upstreams.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::select_ok;
use hickory_proto::op::Message;
use tracing::{debug, info, warn};

use crate::dns::{normalized_name, servfail, truncated, udp_payload_limit};
use crate::error::ForwardError;
use crate::forward::{Forwarder, NetworkExchange};
use crate::net::NetworkStack;
use crate::resolver::{Evaluation, QueryAction, QueryContext, Resolver};
use crate::routes::{PeerDirectory, RouteInstaller};
use crate::stats::Stats;
use crate::transport::{Protocol, QueryLogger, tcp::TcpTransport, udp::UdpTransport};

/// Configuration for the DNS proxy.
pub struct ProxyConfig {
    /// Local address to bind (e.g., 127.0.0.1:5353)
    pub bind_addr: SocketAddr,
    /// Default upstreams for queries no peer handles (raced, first reply wins)
    pub upstreams: Vec<SocketAddr>,
    /// Bound on each upstream round trip
    pub timeout: Duration,
}

/// Turns a raw client query into a raw answer.
pub struct QueryHandler {
    resolver: Resolver,
    upstreams: Vec<SocketAddr>,
    timeout: Duration,
    stats: Stats,
}

impl QueryHandler {
    pub fn new(resolver: Resolver, upstreams: Vec<SocketAddr>, timeout: Duration) -> Self {
        Self {
            resolver,
            upstreams,
            timeout,
            stats: Stats::new(),
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Handle one query received over `protocol`.
    ///
    /// Returns `None` for packets that are not DNS queries; those are
    /// dropped without an answer.
    pub async fn handle(&self, packet: &[u8], protocol: Protocol) -> Option<Vec<u8>> {
        let start = Instant::now();
        let logger = QueryLogger::new(protocol);

        let query = match Message::from_vec(packet) {
            Ok(query) => query,
            Err(e) => {
                debug!(%protocol, error = %e, "dropping malformed query");
                return None;
            }
        };
        let domain = query
            .queries()
            .first()
            .map(|q| normalized_name(q.name()))
            .unwrap_or_else(|| "<unknown>".to_string());
        let ctx = QueryContext {
            query: &query,
            protocol,
            timeout: self.timeout,
        };

        let response = match self.resolver.evaluate(&ctx).await {
            Ok(Evaluation {
                action: QueryAction::Synthesized { reply, peer },
                installs,
            }) => {
                let elapsed_ms = elapsed_ms(start);
                let failures = installs.iter().filter(|o| !o.is_ok()).count();
                self.stats.record_routed(
                    elapsed_ms,
                    (installs.len() - failures) as u64,
                    failures as u64,
                );
                logger.routed(&domain, &peer, elapsed_ms, installs.len());
                reply
            }
            Ok(Evaluation {
                action: QueryAction::PassThrough,
                ..
            }) => match self.pass_through(&ctx).await {
                Ok((reply, from)) => {
                    let elapsed_ms = elapsed_ms(start);
                    self.stats.record_passed(elapsed_ms);
                    logger.passed(&domain, elapsed_ms, from);
                    reply
                }
                Err(e) => {
                    let elapsed_ms = elapsed_ms(start);
                    self.stats.record_failed(elapsed_ms);
                    logger.failed(&domain, elapsed_ms, &e);
                    servfail(&query)
                }
            },
            Err(e) => {
                let elapsed_ms = elapsed_ms(start);
                self.stats.record_failed(elapsed_ms);
                logger.failed(&domain, elapsed_ms, &e);
                servfail(&query)
            }
        };

        let bytes = match response.to_vec() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%domain, error = %e, "failed to encode response");
                return None;
            }
        };

        if protocol == Protocol::Udp {
            let limit = udp_payload_limit(&query);
            if bytes.len() > limit {
                debug!(%domain, size = bytes.len(), limit, "response truncated for UDP client");
                return match truncated(&response).to_vec() {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        warn!(%domain, error = %e, "failed to encode truncated response");
                        None
                    }
                };
            }
        }

        Some(bytes)
    }

    /// Race the default upstreams; the first good reply wins.
    async fn pass_through(
        &self,
        ctx: &QueryContext<'_>,
    ) -> Result<(Message, SocketAddr), ForwardError> {
        if self.upstreams.is_empty() {
            return Err(ForwardError::NoResolver("default".to_string()));
        }

        let forwarder = self.resolver.forwarder();
        let attempts = self.upstreams.iter().map(|&upstream| {
            Box::pin(async move {
                forwarder
                    .forward_to(upstream, ctx)
                    .await
                    .map(|reply| (reply, upstream))
            })
        });

        select_ok(attempts).await.map(|(winner, _)| winner)
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Build the query handler for a loaded directory.
pub fn build_handler(
    config: &ProxyConfig,
    directory: Arc<PeerDirectory>,
    stack: Arc<dyn NetworkStack>,
) -> QueryHandler {
    let resolver = Resolver::new(
        directory,
        Forwarder::new(Arc::new(NetworkExchange)),
        RouteInstaller::new(stack),
    );
    QueryHandler::new(resolver, config.upstreams.clone(), config.timeout)
}

/// Run the DNS proxy with the given configuration.
///
/// Starts UDP and TCP transports on the bind address. Runs indefinitely.
pub async fn run(
    config: ProxyConfig,
    directory: Arc<PeerDirectory>,
    stack: Arc<dyn NetworkStack>,
) -> io::Result<()> {
    let handler = Arc::new(build_handler(&config, directory, stack));

    let udp = UdpTransport::bind(config.bind_addr).await?;
    let tcp = TcpTransport::bind(config.bind_addr).await?;

    let upstream_strs: Vec<_> = config.upstreams.iter().map(|a| a.to_string()).collect();
    info!(
        bind = %config.bind_addr,
        peers = handler.resolver.directory().len(),
        upstreams = %upstream_strs.join(", "),
        "DNS proxy listening"
    );

    udp.start(handler.clone());
    tcp.start(handler.clone());

    // Log stats every minute
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        interval.tick().await; // Skip first immediate tick
        loop {
            interval.tick().await;
            let stats = handler.stats().snapshot_and_reset();
            info!(
                requests = stats.requests,
                routed = stats.routed,
                passed = stats.passed,
                failed = stats.failed,
                routes_installed = stats.routes_installed,
                route_failures = stats.route_failures,
                avg_response_ms = format_args!("{:.2}", stats.avg_response_ms),
                "stats"
            );
        }
    });

    // Keep running forever
    std::future::pending::<()>().await;

    Ok(())
}
