//! Error types for keypool

use std::net::SocketAddr;
use std::time::Duration;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while discovering, dialing and probing remotes
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A group or client was built from invalid input (e.g. no members)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The target address is on the client blacklist
    #[error("Server {addr} on client blacklist")]
    Blacklisted { addr: SocketAddr },

    /// Transport-level failure to establish a connection
    #[error("Failed to dial {addr}: {source}")]
    Dial {
        addr: SocketAddr,
        #[source]
        source: Box<Error>,
    },

    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connecting to {addr} timed out after {after:?}")]
    Timeout { addr: SocketAddr, after: Duration },

    /// The liveness probe over an established connection failed
    #[error("Probe failed: {0}")]
    Probe(String),

    /// Every member of a group failed to dial
    #[error("All {attempts} remotes in group unreachable, last error: {last}")]
    Exhausted { attempts: usize, last: Box<Error> },

    /// Hostname discovery produced no usable addresses
    #[error("Discovery failed for {host}: {reason}")]
    Discovery { host: String, reason: String },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

impl Error {
    /// Wrap a transport error with the address it occurred on
    pub fn dial(addr: SocketAddr, source: Error) -> Self {
        Error::Dial {
            addr,
            source: Box::new(source),
        }
    }

    /// True when the error was caused by the blacklist rather than the network
    pub fn is_blacklisted(&self) -> bool {
        matches!(self, Error::Blacklisted { .. })
    }
}
