//! Forwarding queries to a peer's resolvers.
//!
//! One round trip over the caller's transport, a single TCP retry when the
//! reply is truncated, then the reply is normalized for the client: the AD
//! flag is cleared unless DNSSEC was requested, and the transaction id is
//! set back to the client's.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::Message;
use tracing::debug;

use crate::dns::clear_unvouched_authentic_data;
use crate::error::ForwardError;
use crate::resolver::QueryContext;
use crate::routes::PeerRoute;
use crate::transport::{Protocol, tcp, udp};

/// One query/reply round trip with one server.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn exchange(
        &self,
        query: &Message,
        server: SocketAddr,
        protocol: Protocol,
        timeout: Duration,
    ) -> Result<Message, ForwardError>;
}

/// [`Exchange`] over real sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetworkExchange;

#[async_trait]
impl Exchange for NetworkExchange {
    async fn exchange(
        &self,
        query: &Message,
        server: SocketAddr,
        protocol: Protocol,
        timeout: Duration,
    ) -> Result<Message, ForwardError> {
        match protocol {
            Protocol::Udp => udp::exchange(query, server, timeout).await,
            Protocol::Tcp => tcp::exchange(query, server, timeout).await,
        }
    }
}

/// Forwards queries and normalizes the replies.
#[derive(Clone)]
pub struct Forwarder {
    exchange: Arc<dyn Exchange>,
}

impl Forwarder {
    pub fn new(exchange: Arc<dyn Exchange>) -> Self {
        Self { exchange }
    }

    /// Forward to one of `peer`'s resolvers.
    pub async fn forward(
        &self,
        peer: &PeerRoute,
        ctx: &QueryContext<'_>,
    ) -> Result<Message, ForwardError> {
        let server = peer
            .pick_resolver()
            .ok_or_else(|| ForwardError::NoResolver(peer.name.clone()))?;
        self.forward_to(server, ctx).await
    }

    /// Forward to a specific server.
    ///
    /// The upstream query goes out under a fresh random id; the timeout
    /// applies to each attempt.
    pub async fn forward_to(
        &self,
        server: SocketAddr,
        ctx: &QueryContext<'_>,
    ) -> Result<Message, ForwardError> {
        let mut upstream_query = ctx.query.clone();
        upstream_query.set_id(rand::random());

        let mut reply = self
            .exchange
            .exchange(&upstream_query, server, ctx.protocol, ctx.timeout)
            .await?;

        if reply.truncated() {
            debug!(%server, "reply truncated, retrying over TCP");
            reply = self
                .exchange
                .exchange(&upstream_query, server, Protocol::Tcp, ctx.timeout)
                .await?;
        }

        clear_unvouched_authentic_data(&mut reply);
        reply.set_id(ctx.query.id());

        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    use hickory_proto::rr::RecordType;

    use super::*;
    use crate::dns::testing::{query, reply, with_edns};
    use crate::net::Link;
    use crate::routes::{DomainPattern, PeerKind};

    type Scripted = Box<dyn Fn(&Message) -> Result<Message, ForwardError> + Send + Sync>;

    /// Replays scripted replies and records every call.
    #[derive(Default)]
    struct ScriptedExchange {
        script: Mutex<VecDeque<Scripted>>,
        calls: Mutex<Vec<(SocketAddr, Protocol, u16)>>,
    }

    impl ScriptedExchange {
        fn then(self, step: impl Fn(&Message) -> Result<Message, ForwardError> + Send + Sync + 'static) -> Self {
            self.script.lock().unwrap().push_back(Box::new(step));
            self
        }

        fn calls(&self) -> Vec<(SocketAddr, Protocol, u16)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Exchange for ScriptedExchange {
        async fn exchange(
            &self,
            query: &Message,
            server: SocketAddr,
            protocol: Protocol,
            _timeout: Duration,
        ) -> Result<Message, ForwardError> {
            self.calls.lock().unwrap().push((server, protocol, query.id()));
            let step = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected exchange");
            step(query)
        }
    }

    fn answered(query: &Message) -> Result<Message, ForwardError> {
        Ok(reply(query, &[Ipv4Addr::new(10, 0, 0, 5)]))
    }

    fn truncated(query: &Message) -> Result<Message, ForwardError> {
        let mut r = reply(query, &[]);
        r.set_truncated(true);
        Ok(r)
    }

    fn timed_out(_: &Message) -> Result<Message, ForwardError> {
        Err(ForwardError::Timeout {
            server: "10.0.0.1:53".parse().unwrap(),
            timeout: Duration::from_secs(1),
        })
    }

    fn peer(resolvers: &[&str]) -> PeerRoute {
        PeerRoute {
            name: "office".to_string(),
            resolvers: resolvers.iter().map(|r| r.parse().unwrap()).collect(),
            link: Link {
                name: "wg0".to_string(),
                index: 4,
            },
            endpoint: Some("10.0.0.1".parse().unwrap()),
            kind: PeerKind::Gateway,
            patterns: vec![DomainPattern::compile("*.internal.example").unwrap()],
        }
    }

    fn ctx(query: &Message) -> QueryContext<'_> {
        QueryContext {
            query,
            protocol: Protocol::Udp,
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn reply_id_is_rewritten_to_client_id() {
        let exchange = Arc::new(ScriptedExchange::default().then(answered));
        let forwarder = Forwarder::new(exchange.clone());
        let q = query("db.internal.example.", RecordType::A, 0xbeef);

        let reply = forwarder.forward(&peer(&["10.0.0.1:53"]), &ctx(&q)).await.unwrap();

        assert_eq!(reply.id(), 0xbeef);
        let calls = exchange.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "10.0.0.1:53".parse().unwrap());
        assert_eq!(calls[0].1, Protocol::Udp);
    }

    #[tokio::test]
    async fn truncated_reply_retries_once_over_tcp_to_same_server() {
        let exchange = Arc::new(ScriptedExchange::default().then(truncated).then(answered));
        let forwarder = Forwarder::new(exchange.clone());
        let q = query("db.internal.example.", RecordType::A, 7);

        let reply = forwarder
            .forward(&peer(&["10.0.0.1:53", "10.0.0.2:53"]), &ctx(&q))
            .await
            .unwrap();

        assert!(!reply.truncated());
        assert_eq!(reply.answers().len(), 1);
        let calls = exchange.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, Protocol::Udp);
        assert_eq!(calls[1].1, Protocol::Tcp);
        assert_eq!(calls[0].0, calls[1].0);
        assert_eq!(calls[0].2, calls[1].2);
    }

    #[tokio::test]
    async fn truncated_retry_is_not_repeated() {
        let exchange = Arc::new(ScriptedExchange::default().then(truncated).then(truncated));
        let forwarder = Forwarder::new(exchange.clone());
        let q = query("db.internal.example.", RecordType::A, 7);

        let reply = forwarder.forward(&peer(&["10.0.0.1:53"]), &ctx(&q)).await.unwrap();

        assert!(reply.truncated());
        assert_eq!(exchange.calls().len(), 2);
    }

    #[tokio::test]
    async fn transport_failure_propagates() {
        let exchange = Arc::new(ScriptedExchange::default().then(timed_out));
        let forwarder = Forwarder::new(exchange);
        let q = query("db.internal.example.", RecordType::A, 7);

        let err = forwarder
            .forward(&peer(&["10.0.0.1:53"]), &ctx(&q))
            .await
            .unwrap_err();

        assert!(matches!(err, ForwardError::Timeout { .. }));
    }

    #[tokio::test]
    async fn retry_failure_propagates() {
        let exchange = Arc::new(ScriptedExchange::default().then(truncated).then(timed_out));
        let forwarder = Forwarder::new(exchange);
        let q = query("db.internal.example.", RecordType::A, 7);

        let err = forwarder
            .forward(&peer(&["10.0.0.1:53"]), &ctx(&q))
            .await
            .unwrap_err();

        assert!(matches!(err, ForwardError::Timeout { .. }));
    }

    #[tokio::test]
    async fn authentic_data_cleared_without_dnssec_request() {
        let exchange = Arc::new(ScriptedExchange::default().then(|q| {
            let mut r = reply(q, &[Ipv4Addr::new(10, 0, 0, 5)]);
            r.set_authentic_data(true);
            Ok(r)
        }));
        let forwarder = Forwarder::new(exchange);
        let q = query("db.internal.example.", RecordType::A, 7);

        let reply = forwarder.forward(&peer(&["10.0.0.1:53"]), &ctx(&q)).await.unwrap();

        assert!(!reply.authentic_data());
    }

    #[tokio::test]
    async fn authentic_data_kept_with_dnssec_ok() {
        let exchange = Arc::new(ScriptedExchange::default().then(|q| {
            let mut r = with_edns(reply(q, &[]), true);
            r.set_authentic_data(true);
            Ok(r)
        }));
        let forwarder = Forwarder::new(exchange);
        let q = with_edns(query("db.internal.example.", RecordType::A, 7), true);

        let reply = forwarder.forward(&peer(&["10.0.0.1:53"]), &ctx(&q)).await.unwrap();

        assert!(reply.authentic_data());
    }

    #[tokio::test]
    async fn peer_without_resolvers_fails() {
        let forwarder = Forwarder::new(Arc::new(ScriptedExchange::default()));
        let q = query("db.internal.example.", RecordType::A, 7);

        let err = forwarder.forward(&peer(&[]), &ctx(&q)).await.unwrap_err();

        assert!(matches!(err, ForwardError::NoResolver(_)));
    }
}
