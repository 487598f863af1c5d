//! Hostname discovery

use async_trait::async_trait;
use hickory_resolver::config::{
    LookupIpStrategy, NameServerConfigGroup, ResolverConfig, ResolverOpts,
};
use hickory_resolver::TokioAsyncResolver;
use std::net::{IpAddr, SocketAddr};

use crate::error::{Error, Result};

const DNS_PORT: u16 = 53;

/// Resolves a hostname to zero or more addresses
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn lookup_ips(&self, host: &str) -> Result<Vec<IpAddr>>;
}

/// Queries a single nameserver for A and AAAA records
pub struct DnsResolver {
    nameserver: SocketAddr,
    inner: TokioAsyncResolver,
}

impl DnsResolver {
    pub fn new(nameserver: SocketAddr) -> Self {
        let group = NameServerConfigGroup::from_ips_clear(&[nameserver.ip()], nameserver.port(), true);
        let config = ResolverConfig::from_parts(None, vec![], group);

        let mut opts = ResolverOpts::default();
        opts.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
        opts.ndots = 0;

        Self {
            nameserver,
            inner: TokioAsyncResolver::tokio(config, opts),
        }
    }

    /// Parse "ip" or "ip:port" (port defaults to 53)
    pub fn from_entry(entry: &str) -> Result<Self> {
        Ok(Self::new(parse_nameserver(entry)?))
    }

    pub fn nameserver(&self) -> SocketAddr {
        self.nameserver
    }
}

#[async_trait]
impl Resolve for DnsResolver {
    async fn lookup_ips(&self, host: &str) -> Result<Vec<IpAddr>> {
        let lookup = self
            .inner
            .lookup_ip(host)
            .await
            .map_err(|e| Error::Discovery {
                host: host.to_string(),
                reason: format!("nameserver {}: {}", self.nameserver, e),
            })?;

        Ok(lookup.iter().collect())
    }
}

/// Resolution through the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl Resolve for SystemResolver {
    async fn lookup_ips(&self, host: &str) -> Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| Error::Discovery {
                host: host.to_string(),
                reason: e.to_string(),
            })?;

        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

pub fn parse_nameserver(entry: &str) -> Result<SocketAddr> {
    let entry = entry.trim();
    if let Ok(addr) = entry.parse::<SocketAddr>() {
        return Ok(addr);
    }
    entry
        .trim_matches(|c| c == '[' || c == ']')
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DNS_PORT))
        .map_err(|_| Error::InvalidAddress(entry.to_string()))
}

/// Split "host:port", accepting bracketed IPv6 hosts
pub fn split_host_port(hostport: &str) -> Result<(String, u16)> {
    let (host, port) = hostport
        .rsplit_once(':')
        .ok_or_else(|| Error::InvalidAddress(format!("{}: missing port", hostport)))?;

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(Error::InvalidAddress(format!("{}: missing host", hostport)));
    }
    if host.contains(':') && !hostport.starts_with('[') {
        return Err(Error::InvalidAddress(format!(
            "{}: IPv6 hosts must be bracketed",
            hostport
        )));
    }

    let port = port
        .parse::<u16>()
        .map_err(|_| Error::InvalidAddress(format!("{}: invalid port", hostport)))?;

    Ok((host.to_string(), port))
}
