//! Reusable connections to a single remote
//!
//! A connection is shared by every caller that dialed the same endpoint while
//! it stayed usable. Each successful [`Connection::usable`] check counts as a
//! checkout; callers hand it back with [`Connection::release`]. The last
//! release closes the connection.

use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_native_tls::TlsStream;
use tracing::debug;

use super::ping;
use crate::error::{Error, Result};

/// A live connection to a remote server
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    /// Address of the remote end
    fn peer(&self) -> SocketAddr;

    /// Check whether the connection may be reused, checking it out if so.
    ///
    /// Returns false once the connection is closed, has no users left or has
    /// hit its use limit.
    fn usable(&self) -> bool;

    /// Send a liveness ping and wait for the matching pong
    async fn probe(&self) -> Result<()>;

    /// Return a checkout obtained from dialing or [`Connection::usable`].
    /// Returning the last one closes the connection.
    async fn release(&self);

    /// Shut the connection down. Subsequent `usable` checks fail.
    async fn close(&self);
}

/// Connection over any byte stream, normally a TLS session
pub struct StreamConnection<S> {
    peer: SocketAddr,
    stream: Mutex<S>,
    closed: AtomicBool,
    /// Outstanding checkouts
    users: AtomicU32,
    /// Total checkouts over the connection's lifetime
    uses: AtomicU64,
    /// 0 = unlimited
    max_uses: u64,
    probe_timeout: Duration,
    next_id: AtomicU32,
}

/// Connection over a TLS session on TCP
pub type TlsConnection = StreamConnection<TlsStream<TcpStream>>;

impl<S> StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a freshly established stream. The dialer holds the first checkout.
    pub fn new(peer: SocketAddr, stream: S, max_uses: u64, probe_timeout: Duration) -> Self {
        Self {
            peer,
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
            users: AtomicU32::new(1),
            uses: AtomicU64::new(1),
            max_uses,
            probe_timeout,
            next_id: AtomicU32::new(1),
        }
    }

    /// Number of outstanding checkouts
    pub fn users(&self) -> u32 {
        self.users.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn ping(&self) -> Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = id.to_be_bytes();
        let request = ping::encode(id, ping::OP_PING, &payload)?;

        let mut stream = self.stream.lock().await;
        stream.write_all(&request).await?;
        stream.flush().await?;

        let mut raw_header = [0u8; ping::HEADER_LEN];
        stream.read_exact(&mut raw_header).await?;
        let header = ping::decode_header(&raw_header)?;

        let mut body = vec![0u8; header.body_len];
        stream.read_exact(&mut body).await?;
        let frame = ping::decode_body(&body)?;

        ping::check_pong(id, &payload, &header, &frame)
    }
}

#[async_trait]
impl<S> Connection for StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn usable(&self) -> bool {
        if self.is_closed() {
            return false;
        }

        let max = self.max_uses;
        let under_limit = self
            .uses
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (max == 0 || n < max).then_some(n + 1)
            })
            .is_ok();
        if !under_limit {
            return false;
        }

        // Once the last user let go the connection is being torn down
        self.users
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > 0).then_some(n + 1)
            })
            .is_ok()
    }

    async fn probe(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Probe(format!("connection to {} is closed", self.peer)));
        }

        let result = match tokio::time::timeout(self.probe_timeout, self.ping()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Probe(format!(
                "no pong from {} within {:?}",
                self.peer, self.probe_timeout
            ))),
        };

        // A stream that failed mid-exchange may hold a partial frame
        if result.is_err() {
            self.closed.store(true, Ordering::Release);
        }
        result
    }

    async fn release(&self) {
        let previous = self
            .users
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            debug!(peer = %self.peer, "Last user released connection");
            self.close().await;
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut stream = self.stream.lock().await;
        if let Err(e) = stream.shutdown().await {
            debug!(peer = %self.peer, error = %e, "Error shutting down connection");
        }
    }
}

impl<S> fmt::Debug for StreamConnection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConnection")
            .field("peer", &self.peer)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("users", &self.users.load(Ordering::Relaxed))
            .field("uses", &self.uses.load(Ordering::Relaxed))
            .finish()
    }
}
