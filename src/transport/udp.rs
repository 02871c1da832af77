//! UDP transport for DNS queries.
//!
//! The server side hands every datagram to the query handler in its own
//! task and sends the answer back to the datagram's source. The client
//! side sends one query from an ephemeral socket and waits for the reply
//! carrying the same transaction id.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::Message;
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use super::{MAX_DNS_PACKET_SIZE, MAX_UDP_REPLY_SIZE, Protocol};
use crate::error::ForwardError;
use crate::proxy::QueryHandler;

/// UDP transport for the proxy.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);

        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Start the receive loop.
    pub fn start(self, handler: Arc<QueryHandler>) {
        tokio::spawn(run(self.socket, handler));
    }
}

/// Receive loop: one task per query, so a slow resolver only holds up
/// its own client.
async fn run(socket: Arc<UdpSocket>, handler: Arc<QueryHandler>) {
    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "UDP recv error");
                continue;
            }
        };

        if len < 12 {
            continue;
        }

        let query = buf[..len].to_vec();
        let socket = socket.clone();
        let handler = handler.clone();
        tokio::spawn(async move {
            let Some(response) = handler.handle(&query, Protocol::Udp).await else {
                return;
            };
            if let Err(e) = socket.send_to(&response, src).await {
                warn!(error = %e, client = %src, "UDP response error");
            }
        });
    }
}

/// Send `query` to `server` over UDP and wait for the matching reply.
///
/// Datagrams that do not parse or carry another transaction id are
/// ignored until the deadline passes. If nothing usable arrived by then
/// and the last datagram did not parse, that parse error is reported
/// instead of the timeout.
pub async fn exchange(
    query: &Message,
    server: SocketAddr,
    timeout: Duration,
) -> Result<Message, ForwardError> {
    let deadline = Instant::now() + timeout;
    let io_err = |source| ForwardError::Io { server, source };

    let bytes = query
        .to_vec()
        .map_err(|e| ForwardError::Encode(e.to_string()))?;

    let local: SocketAddr = if server.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local).await.map_err(io_err)?;
    socket.connect(server).await.map_err(io_err)?;
    socket.send(&bytes).await.map_err(io_err)?;

    let mut buf = vec![0u8; MAX_UDP_REPLY_SIZE];
    let mut malformed = None;
    loop {
        let len = match timeout_at(deadline, socket.recv(&mut buf)).await {
            Ok(result) => result.map_err(io_err)?,
            Err(_) => {
                return Err(match malformed {
                    Some(reason) => ForwardError::Malformed { server, reason },
                    None => ForwardError::Timeout { server, timeout },
                });
            }
        };

        match Message::from_vec(&buf[..len]) {
            Ok(reply) if reply.id() == query.id() => return Ok(reply),
            Ok(reply) => {
                debug!(%server, expected = query.id(), got = reply.id(), "ignoring reply with foreign id");
            }
            Err(e) => {
                debug!(%server, error = %e, "ignoring malformed datagram");
                malformed = Some(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use hickory_proto::rr::RecordType;

    use super::*;
    use crate::dns::testing::{query, reply};

    async fn fake_resolver<F>(respond: F) -> SocketAddr
    where
        F: Fn(&Message) -> Vec<Message> + Send + 'static,
    {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DNS_PACKET_SIZE];
            loop {
                let (len, src) = socket.recv_from(&mut buf).await.unwrap();
                let request = Message::from_vec(&buf[..len]).unwrap();
                for response in respond(&request) {
                    socket
                        .send_to(&response.to_vec().unwrap(), src)
                        .await
                        .unwrap();
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn exchange_returns_matching_reply() {
        let server =
            fake_resolver(|req| vec![reply(req, &[Ipv4Addr::new(10, 0, 0, 5)])]).await;
        let q = query("db.internal.example.", RecordType::A, 0x1234);

        let response = exchange(&q, server, Duration::from_secs(2)).await.unwrap();

        assert_eq!(response.id(), 0x1234);
        assert_eq!(response.answers().len(), 1);
    }

    #[tokio::test]
    async fn exchange_skips_replies_with_other_ids() {
        let server = fake_resolver(|req| {
            let mut stray = reply(req, &[Ipv4Addr::new(6, 6, 6, 6)]);
            stray.set_id(req.id().wrapping_add(1));
            vec![stray, reply(req, &[Ipv4Addr::new(10, 0, 0, 5)])]
        })
        .await;
        let q = query("db.internal.example.", RecordType::A, 0x1234);

        let response = exchange(&q, server, Duration::from_secs(2)).await.unwrap();

        assert_eq!(crate::dns::a_records(&response).collect::<Vec<_>>(), vec![
            Ipv4Addr::new(10, 0, 0, 5)
        ]);
    }

    #[tokio::test]
    async fn exchange_times_out() {
        let server = fake_resolver(|_| Vec::new()).await;
        let q = query("db.internal.example.", RecordType::A, 1);

        let err = exchange(&q, server, Duration::from_millis(50))
            .await
            .unwrap_err();

        assert!(matches!(err, ForwardError::Timeout { .. }));
    }

    #[tokio::test]
    async fn exchange_accepts_replies_larger_than_a_query_buffer() {
        let server = fake_resolver(|req| {
            let addresses: Vec<_> = (0..400u16)
                .map(|i| Ipv4Addr::new(10, 1, (i >> 8) as u8, i as u8))
                .collect();
            vec![reply(req, &addresses)]
        })
        .await;
        let q = query("db.internal.example.", RecordType::A, 0x3030);

        let response = exchange(&q, server, Duration::from_secs(2)).await.unwrap();

        assert!(response.to_vec().unwrap().len() > MAX_DNS_PACKET_SIZE);
        assert_eq!(response.answers().len(), 400);
    }

    #[tokio::test]
    async fn exchange_reports_unparsable_reply_at_deadline() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DNS_PACKET_SIZE];
            let (_, src) = socket.recv_from(&mut buf).await.unwrap();
            socket.send_to(&[0xff; 7], src).await.unwrap();
        });
        let q = query("db.internal.example.", RecordType::A, 1);

        let err = exchange(&q, server, Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(matches!(err, ForwardError::Malformed { .. }));
    }
}
