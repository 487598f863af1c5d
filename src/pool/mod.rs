//! Transport layer
//!
//! This module provides:
//! - A TLS configuration template cloned per dial
//! - The [`Connector`] seam used by endpoints to open connections
//! - Reusable [`Connection`]s with use counting and a liveness ping

pub mod connection;
pub mod ping;
pub mod tls;

pub use connection::{Connection, StreamConnection, TlsConnection};
pub use tls::{parse_protocol, Connector, TlsConfig, TlsDialer};
