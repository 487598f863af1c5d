use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::{Group, Target};
use crate::client::Client;
use crate::error::{Error, Result};
use crate::pool::Connection;

/// A single remote server
///
/// Holds at most one connection, created on the first successful dial and
/// reused for as long as it reports itself usable.
#[derive(Debug)]
pub struct Endpoint {
    addr: SocketAddr,
    /// Name the server certificate must be valid for
    server_name: String,
    conn: Mutex<Option<Arc<dyn Connection>>>,
}

impl Endpoint {
    pub fn new(addr: SocketAddr, server_name: impl Into<String>) -> Self {
        Self {
            addr,
            server_name: server_name.into(),
            conn: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// "server_name@addr", used in logs and stats
    pub fn label(&self) -> String {
        format!("{}@{}", self.server_name, self.addr)
    }

    fn reusable_connection(&self) -> Option<Arc<dyn Connection>> {
        let conn = self.conn.lock().ok()?.clone()?;
        conn.usable().then_some(conn)
    }

    fn store_connection(&self, conn: Arc<dyn Connection>) {
        if let Ok(mut slot) = self.conn.lock() {
            *slot = Some(conn);
        }
    }

    /// Return the current connection if usable, otherwise dial a new one.
    ///
    /// Blacklisted addresses fail before any network activity.
    pub async fn dial(&self, client: &Client) -> Result<Arc<dyn Connection>> {
        if client.blacklist().contains(&self.addr) {
            return Err(Error::Blacklisted { addr: self.addr });
        }

        if let Some(conn) = self.reusable_connection() {
            return Ok(conn);
        }

        let config = client.tls_config().with_server_name(&self.server_name);
        debug!(server_name = %self.server_name, addr = %self.addr, "Dialing remote");

        let conn = client
            .connector()
            .connect(self.addr, &config)
            .await
            .map_err(|e| Error::dial(self.addr, e))?;

        self.store_connection(Arc::clone(&conn));
        Ok(conn)
    }

    /// Pair this endpoint with `other` in a new two-member group
    pub fn combine(self: &Arc<Self>, other: Target) -> Target {
        Target::from(Group::pair(Target::Endpoint(Arc::clone(self)), other))
    }
}
