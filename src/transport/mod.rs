//! UDP and TCP transports.
//!
//! Each transport has a server side, which accepts client queries for the
//! proxy, and a client side (`exchange`), which sends one query to one
//! resolver and waits for the matching reply.

pub mod tcp;
pub mod udp;

/// Maximum size of a DNS packet (with some headroom).
pub const MAX_DNS_PACKET_SIZE: usize = 4096;

/// Largest datagram a resolver can send back.
pub const MAX_UDP_REPLY_SIZE: usize = u16::MAX as usize;

use std::fmt;
use std::net::SocketAddr;

use tracing::debug;

/// Transport protocol of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logger for per-query events.
pub struct QueryLogger {
    protocol: Protocol,
}

impl QueryLogger {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }

    pub fn routed(&self, domain: &str, peer: &str, total_ms: f64, routes: usize) {
        debug!(
            protocol = %self.protocol,
            domain,
            peer,
            routes,
            total_ms = format_args!("{total_ms:.3}"),
            "ROUTED"
        );
    }

    pub fn passed(&self, domain: &str, total_ms: f64, from: SocketAddr) {
        debug!(
            protocol = %self.protocol,
            domain,
            %from,
            total_ms = format_args!("{total_ms:.3}"),
            "FORWARDED"
        );
    }

    pub fn failed(&self, domain: &str, total_ms: f64, error: &dyn std::error::Error) {
        debug!(
            protocol = %self.protocol,
            domain,
            error = %error,
            total_ms = format_args!("{total_ms:.3}"),
            "FAILED"
        );
    }
}
