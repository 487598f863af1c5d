//! keypool - latency-ranked TLS endpoint selection with failover

pub mod client;
pub mod config;
pub mod error;
pub mod lb;
pub mod pool;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use lb::{Endpoint, Group, Target};
