//! In-memory connector for exercising selection without a network

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::pool::{Connection, Connector, TlsConfig};

#[derive(Debug)]
pub struct ScriptedConnection {
    peer: SocketAddr,
    closed: AtomicBool,
    fail_probe: bool,
    users: AtomicU32,
}

impl ScriptedConnection {
    pub fn users(&self) -> u32 {
        self.users.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn usable(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.users
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > 0).then_some(n + 1)
            })
            .is_ok()
    }

    async fn probe(&self) -> Result<()> {
        if self.fail_probe {
            return Err(Error::Probe(format!("{} does not answer", self.peer)));
        }
        Ok(())
    }

    async fn release(&self) {
        let previous = self
            .users
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.close().await;
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Records every connect attempt and fails the addresses it is told to
#[derive(Default)]
pub struct ScriptedConnector {
    failing: Mutex<HashSet<SocketAddr>>,
    probe_failing: Mutex<HashSet<SocketAddr>>,
    attempts: Mutex<Vec<SocketAddr>>,
    server_names: Mutex<Vec<String>>,
    issued: Mutex<HashMap<SocketAddr, Arc<ScriptedConnection>>>,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, addr: SocketAddr) {
        self.failing.lock().unwrap().insert(addr);
    }

    pub fn fail_probe(&self, addr: SocketAddr) {
        self.probe_failing.lock().unwrap().insert(addr);
    }

    pub fn attempts(&self) -> Vec<SocketAddr> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn server_names(&self) -> Vec<String> {
        self.server_names.lock().unwrap().clone()
    }

    /// Connection most recently handed out for `addr`
    pub fn connection(&self, addr: SocketAddr) -> Option<Arc<ScriptedConnection>> {
        self.issued.lock().unwrap().get(&addr).cloned()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, addr: SocketAddr, config: &TlsConfig) -> Result<Arc<dyn Connection>> {
        self.attempts.lock().unwrap().push(addr);
        self.server_names
            .lock()
            .unwrap()
            .push(config.server_name().to_string());

        if self.failing.lock().unwrap().contains(&addr) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        let conn = Arc::new(ScriptedConnection {
            peer: addr,
            closed: AtomicBool::new(false),
            fail_probe: self.probe_failing.lock().unwrap().contains(&addr),
            users: AtomicU32::new(1),
        });
        self.issued.lock().unwrap().insert(addr, Arc::clone(&conn));
        Ok(conn)
    }
}

pub fn addr(last_octet: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, last_octet], 2407))
}

pub fn client(connector: Arc<ScriptedConnector>) -> Arc<Client> {
    Arc::new(Client::new(TlsConfig::new(), connector))
}
