//! Client context shared by every dial
//!
//! A [`Client`] carries what a dial needs from its caller: the base TLS
//! configuration, the connector that opens connections, the resolvers used
//! for discovery and the blacklist. It is cheap to share behind an `Arc`.

pub mod blacklist;
pub mod discovery;

pub use blacklist::{AddrBlacklist, Blacklist};
pub use discovery::{split_host_port, DnsResolver, Resolve, SystemResolver};

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::lb::{Endpoint, Group, Target};
use crate::pool::{Connector, TlsConfig, TlsDialer};

pub struct Client {
    tls: TlsConfig,
    connector: Arc<dyn Connector>,
    resolvers: Vec<Arc<dyn Resolve>>,
    fallback: Arc<dyn Resolve>,
    blacklist: Arc<dyn Blacklist>,
}

impl Client {
    /// Client with no configured resolvers and an empty blacklist
    pub fn new(tls: TlsConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            tls,
            connector,
            resolvers: Vec::new(),
            fallback: Arc::new(SystemResolver),
            blacklist: Arc::new(AddrBlacklist::new()),
        }
    }

    /// Build a TLS client from configuration
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let tls = TlsConfig::from_settings(&config.tls)?;
        let connector = Arc::new(TlsDialer::from_settings(&config.dial));

        let resolvers = config
            .resolvers
            .iter()
            .map(|entry| DnsResolver::from_entry(entry).map(|r| Arc::new(r) as Arc<dyn Resolve>))
            .collect::<Result<Vec<_>>>()?;

        let blacklist = AddrBlacklist::from_entries(&config.blacklist)?;

        Ok(Self::new(tls, connector)
            .with_resolvers(resolvers)
            .with_blacklist(Arc::new(blacklist)))
    }

    pub fn with_resolvers(mut self, resolvers: Vec<Arc<dyn Resolve>>) -> Self {
        self.resolvers = resolvers;
        self
    }

    /// Resolver used when none of the configured resolvers returns anything
    pub fn with_fallback_resolver(mut self, fallback: Arc<dyn Resolve>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_blacklist(mut self, blacklist: Arc<dyn Blacklist>) -> Self {
        self.blacklist = blacklist;
        self
    }

    pub fn tls_config(&self) -> &TlsConfig {
        &self.tls
    }

    pub fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    pub fn blacklist(&self) -> &dyn Blacklist {
        self.blacklist.as_ref()
    }

    /// Resolve `host` through every configured resolver, falling back to the
    /// system resolver when they produce no addresses.
    pub async fn lookup_ips(&self, host: &str) -> Result<Vec<IpAddr>> {
        let mut ips = Vec::new();
        for resolver in &self.resolvers {
            match resolver.lookup_ips(host).await {
                Ok(found) => ips.extend(found),
                Err(e) => debug!(host = %host, error = %e, "Resolver lookup failed"),
            }
        }
        if !ips.is_empty() {
            return Ok(ips);
        }

        self.fallback.lookup_ips(host).await
    }

    /// Discover the servers behind `host` and group every non-blacklisted
    /// address into a load-balanced target. An empty `server_name` means the
    /// certificates are verified against `host`.
    pub async fn lookup_server_with_name(
        &self,
        server_name: &str,
        host: &str,
        port: u16,
    ) -> Result<Target> {
        let server_name = if server_name.is_empty() { host } else { server_name };

        let ips = self.lookup_ips(host).await?;
        if ips.is_empty() {
            return Err(Error::Discovery {
                host: host.to_string(),
                reason: "no addresses found".to_string(),
            });
        }

        let mut servers = Vec::with_capacity(ips.len());
        for ip in ips {
            let addr = SocketAddr::new(ip, port);
            if self.blacklist.contains(&addr) {
                debug!(addr = %addr, "Skipping blacklisted server");
                continue;
            }
            servers.push(Target::from(Endpoint::new(addr, server_name)));
        }

        Ok(Target::from(Group::new(servers)?))
    }

    /// Discover servers for "host:port", verifying certificates against host
    pub async fn lookup_server(&self, hostport: &str) -> Result<Target> {
        let (host, port) = split_host_port(hostport)?;
        self.lookup_server_with_name(&host, &host, port).await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("tls", &self.tls)
            .field("resolvers", &self.resolvers.len())
            .finish()
    }
}
