//! Shared fixtures: a connector and resolver that never touch the network

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keypool::client::Resolve;
use keypool::pool::{Connection, Connector, TlsConfig};
use keypool::{Client, Error, Result};

#[derive(Debug)]
pub struct FakeConnection {
    peer: SocketAddr,
    closed: AtomicBool,
    fail_probe: bool,
    users: AtomicU32,
}

impl FakeConnection {
    pub fn users(&self) -> u32 {
        self.users.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Connection for FakeConnection {
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
            Err(Error::Probe(format!("{} does not answer", self.peer)))
        } else {
            Ok(())
        }
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

/// Connector that fails chosen addresses and records every attempt
#[derive(Default)]
pub struct FakeConnector {
    failing: Mutex<HashSet<SocketAddr>>,
    probe_failing: Mutex<HashSet<SocketAddr>>,
    attempts: Mutex<Vec<SocketAddr>>,
    server_names: Mutex<Vec<String>>,
    issued: Mutex<HashMap<SocketAddr, Arc<FakeConnection>>>,
    connect_delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every connect sleeps for `delay` before answering
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            connect_delay: delay,
            ..Self::default()
        })
    }

    pub fn fail(&self, addr: SocketAddr) {
        self.failing.lock().unwrap().insert(addr);
    }

    pub fn recover(&self, addr: SocketAddr) {
        self.failing.lock().unwrap().remove(&addr);
    }

    pub fn fail_probe(&self, addr: SocketAddr) {
        self.probe_failing.lock().unwrap().insert(addr);
    }

    /// Close the connection last handed out for `addr`, if any
    pub fn kill(&self, addr: SocketAddr) {
        if let Some(conn) = self.issued.lock().unwrap().get(&addr) {
            conn.closed.store(true, Ordering::Release);
        }
    }

    /// Connection most recently handed out for `addr`
    pub fn connection(&self, addr: SocketAddr) -> Option<Arc<FakeConnection>> {
        self.issued.lock().unwrap().get(&addr).cloned()
    }

    /// Highest number of connects that were running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::Acquire)
    }

    pub fn server_names(&self) -> Vec<String> {
        self.server_names.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> Vec<SocketAddr> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, addr: SocketAddr) -> usize {
        self.attempts().iter().filter(|a| **a == addr).count()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, addr: SocketAddr, config: &TlsConfig) -> Result<Arc<dyn Connection>> {
        self.attempts.lock().unwrap().push(addr);
        self.server_names
            .lock()
            .unwrap()
            .push(config.server_name().to_string());
        let running = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_in_flight.fetch_max(running, Ordering::AcqRel);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::AcqRel);

        if self.failing.lock().unwrap().contains(&addr) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        let conn = Arc::new(FakeConnection {
            peer: addr,
            closed: AtomicBool::new(false),
            fail_probe: self.probe_failing.lock().unwrap().contains(&addr),
            users: AtomicU32::new(1),
        });
        self.issued.lock().unwrap().insert(addr, Arc::clone(&conn));
        Ok(conn)
    }
}

/// Resolver answering from a fixed table
#[derive(Default)]
pub struct StaticResolver {
    records: HashMap<String, Vec<IpAddr>>,
    fail: bool,
}

impl StaticResolver {
    pub fn new(records: &[(&str, &[&str])]) -> Self {
        let records = records
            .iter()
            .map(|(host, ips)| {
                let ips = ips.iter().map(|ip| ip.parse().unwrap()).collect();
                (host.to_string(), ips)
            })
            .collect();
        Self { records, fail: false }
    }

    pub fn failing() -> Self {
        Self {
            records: HashMap::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl Resolve for StaticResolver {
    async fn lookup_ips(&self, host: &str) -> Result<Vec<IpAddr>> {
        if self.fail {
            return Err(Error::Discovery {
                host: host.to_string(),
                reason: "SERVFAIL".to_string(),
            });
        }
        Ok(self.records.get(host).cloned().unwrap_or_default())
    }
}

pub fn addr(last_octet: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, last_octet], 2407))
}

pub fn client(connector: Arc<FakeConnector>) -> Client {
    Client::new(TlsConfig::new(), connector)
}
