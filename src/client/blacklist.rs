use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::RwLock;

use crate::error::{Error, Result};

/// Membership store of addresses that must never be dialed
pub trait Blacklist: Send + Sync {
    fn contains(&self, addr: &SocketAddr) -> bool;
}

/// Blacklist of whole hosts and individual host:port pairs
#[derive(Debug, Default)]
pub struct AddrBlacklist {
    hosts: RwLock<HashSet<IpAddr>>,
    addrs: RwLock<HashSet<SocketAddr>>,
}

impl AddrBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from entries such as "10.0.0.1" or "10.0.0.1:2407"
    pub fn from_entries<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let blacklist = Self::new();
        for entry in entries {
            blacklist.insert_entry(entry.as_ref())?;
        }
        Ok(blacklist)
    }

    pub fn insert_entry(&self, entry: &str) -> Result<()> {
        let entry = entry.trim();
        if let Ok(addr) = entry.parse::<SocketAddr>() {
            self.insert_addr(addr);
        } else if let Ok(ip) = entry.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
            self.insert_host(ip);
        } else {
            return Err(Error::InvalidAddress(entry.to_string()));
        }
        Ok(())
    }

    /// Block every port on `ip`
    pub fn insert_host(&self, ip: IpAddr) {
        if let Ok(mut hosts) = self.hosts.write() {
            hosts.insert(ip);
        }
    }

    pub fn insert_addr(&self, addr: SocketAddr) {
        if let Ok(mut addrs) = self.addrs.write() {
            addrs.insert(addr);
        }
    }

    pub fn len(&self) -> usize {
        let hosts = self.hosts.read().map(|h| h.len()).unwrap_or(0);
        let addrs = self.addrs.read().map(|a| a.len()).unwrap_or(0);
        hosts + addrs
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Blacklist for AddrBlacklist {
    fn contains(&self, addr: &SocketAddr) -> bool {
        let host_blocked = self
            .hosts
            .read()
            .map(|hosts| hosts.contains(&addr.ip()))
            .unwrap_or(false);

        host_blocked
            || self
                .addrs
                .read()
                .map(|addrs| addrs.contains(addr))
                .unwrap_or(false)
    }
}
