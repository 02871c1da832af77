//! jitroute - just-in-time routing driven by DNS answers.
//!
//! Queries for configured domains are resolved through a dedicated peer,
//! and every address in the answer gets a host route via that peer before
//! the client sees it.

pub mod config;
pub mod dns;
pub mod error;
pub mod forward;
pub mod net;
pub mod proxy;
pub mod resolver;
pub mod routes;
pub mod stats;
pub mod transport;
