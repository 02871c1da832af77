//! TCP transport for DNS queries.
//!
//! TCP DNS messages are prefixed with a 2-byte big-endian length. The
//! server side handles each client connection in its own task and
//! answers every query sent on it; the client side opens one connection
//! per exchange.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use super::Protocol;
use crate::error::ForwardError;
use crate::proxy::QueryHandler;

/// Largest message a 2-byte length prefix can describe.
const MAX_TCP_MESSAGE_SIZE: usize = u16::MAX as usize;

/// TCP transport for the proxy.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Bind a TCP listener for the transport.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Start the accept loop.
    pub fn start(self, handler: Arc<QueryHandler>) {
        tokio::spawn(run_accept_loop(self.listener, handler));
    }
}

/// Accept loop - spawns a handler task for each incoming connection.
async fn run_accept_loop(listener: TcpListener, handler: Arc<QueryHandler>) {
    loop {
        match listener.accept().await {
            Ok((client, _)) => {
                tokio::spawn(handle_connection(client, handler.clone()));
            }
            Err(e) => {
                warn!(error = %e, "TCP accept error");
            }
        }
    }
}

/// Answer queries on one connection until the client closes it.
async fn handle_connection(mut client: TcpStream, handler: Arc<QueryHandler>) {
    while let Ok(Some(query)) = read_dns_message(&mut client).await {
        let Some(response) = handler.handle(&query, Protocol::Tcp).await else {
            return;
        };
        if write_dns_message(&mut client, &response).await.is_err() {
            return;
        }
    }
}

/// Read one length-prefixed DNS message, without its prefix.
///
/// Returns `Ok(None)` on a clean end of stream.
pub(crate) async fn read_dns_message<S>(stream: &mut S) -> io::Result<Option<Vec<u8>>>
where
    S: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 2];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let msg_len = u16::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; msg_len];
    stream.read_exact(&mut buf).await?;

    Ok(Some(buf))
}

/// Write one DNS message with its length prefix.
pub(crate) async fn write_dns_message<S>(stream: &mut S, message: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let len = u16::try_from(message.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "DNS message too large"))?;

    let mut framed = Vec::with_capacity(2 + message.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(message);
    stream.write_all(&framed).await
}

/// Send `query` to `server` over a fresh TCP connection and read the
/// reply. Connecting, writing and reading share one deadline.
pub async fn exchange(
    query: &Message,
    server: SocketAddr,
    timeout: Duration,
) -> Result<Message, ForwardError> {
    let deadline = Instant::now() + timeout;
    let io_err = |source| ForwardError::Io { server, source };
    let timed_out = |_| ForwardError::Timeout { server, timeout };

    let bytes = query
        .to_vec()
        .map_err(|e| ForwardError::Encode(e.to_string()))?;
    if bytes.len() > MAX_TCP_MESSAGE_SIZE {
        return Err(ForwardError::Encode(format!(
            "query of {} bytes does not fit a TCP frame",
            bytes.len()
        )));
    }

    let mut stream = timeout_at(deadline, TcpStream::connect(server))
        .await
        .map_err(timed_out)?
        .map_err(io_err)?;

    timeout_at(deadline, write_dns_message(&mut stream, &bytes))
        .await
        .map_err(timed_out)?
        .map_err(io_err)?;

    let response = timeout_at(deadline, read_dns_message(&mut stream))
        .await
        .map_err(timed_out)?
        .map_err(io_err)?
        .ok_or_else(|| ForwardError::Malformed {
            server,
            reason: "connection closed before a reply".to_string(),
        })?;

    let reply = Message::from_vec(&response).map_err(|e| ForwardError::Malformed {
        server,
        reason: e.to_string(),
    })?;
    if reply.id() != query.id() {
        debug!(%server, expected = query.id(), got = reply.id(), "reply id mismatch");
        return Err(ForwardError::IdMismatch {
            server,
            expected: query.id(),
            got: reply.id(),
        });
    }

    Ok(reply)
}
