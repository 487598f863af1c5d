//! TLS configuration template and dialer

use async_trait::async_trait;
use native_tls::{Certificate, Identity, Protocol};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::connection::{Connection, TlsConnection};
use crate::config::{DialSettings, TlsSettings};
use crate::error::{Error, Result};

/// Immutable TLS settings shared by every dial of a client.
///
/// Each dial works on its own clone with the peer identity replaced by the
/// endpoint's verification name (see [`TlsConfig::with_server_name`]), so
/// concurrent dials never share mutable state.
#[derive(Clone, Default)]
pub struct TlsConfig {
    server_name: String,
    root_certificates: Vec<Certificate>,
    disable_built_in_roots: bool,
    identity: Option<Identity>,
    min_protocol: Option<Protocol>,
    max_protocol: Option<Protocol>,
    insecure_skip_verify: bool,
}

impl TlsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a template from file-based settings
    pub fn from_settings(settings: &TlsSettings) -> Result<Self> {
        let mut config = Self::new();

        if let Some(path) = &settings.ca_file {
            let pem = std::fs::read(path)?;
            config = config.with_root_certificate(Certificate::from_pem(&pem)?);
            config.disable_built_in_roots = settings.only_ca_file;
        }

        if let Some(path) = &settings.identity_file {
            let der = std::fs::read(path)?;
            let password = settings.identity_password.as_deref().unwrap_or("");
            config = config.with_identity(Identity::from_pkcs12(&der, password)?);
        }

        let min = settings.min_protocol.as_deref().map(parse_protocol).transpose()?;
        let max = settings.max_protocol.as_deref().map(parse_protocol).transpose()?;
        config = config
            .with_protocols(min, max)
            .with_insecure_skip_verify(settings.insecure_skip_verify);

        Ok(config)
    }

    pub fn with_root_certificate(mut self, cert: Certificate) -> Self {
        self.root_certificates.push(cert);
        self
    }

    /// Client certificate presented to servers that request one
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_protocols(mut self, min: Option<Protocol>, max: Option<Protocol>) -> Self {
        self.min_protocol = min;
        self.max_protocol = max;
        self
    }

    /// Skip certificate and hostname verification
    pub fn with_insecure_skip_verify(mut self, insecure: bool) -> Self {
        self.insecure_skip_verify = insecure;
        self
    }

    /// Copy of this template with the peer identity overridden
    pub fn with_server_name(&self, server_name: &str) -> Self {
        let mut config = self.clone();
        config.server_name = server_name.to_string();
        config
    }

    /// Name the server certificate is verified against
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn is_insecure(&self) -> bool {
        self.insecure_skip_verify
    }

    /// Build a native TLS connector from this template
    pub fn build_connector(&self) -> Result<native_tls::TlsConnector> {
        let mut builder = native_tls::TlsConnector::builder();
        for cert in &self.root_certificates {
            builder.add_root_certificate(cert.clone());
        }
        if let Some(identity) = &self.identity {
            builder.identity(identity.clone());
        }
        builder
            .disable_built_in_roots(self.disable_built_in_roots)
            .min_protocol_version(self.min_protocol)
            .max_protocol_version(self.max_protocol)
            .danger_accept_invalid_certs(self.insecure_skip_verify)
            .danger_accept_invalid_hostnames(self.insecure_skip_verify);

        Ok(builder.build()?)
    }
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("server_name", &self.server_name)
            .field("root_certificates", &self.root_certificates.len())
            .field("identity", &self.identity.is_some())
            .field("min_protocol", &self.min_protocol)
            .field("max_protocol", &self.max_protocol)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .finish()
    }
}

/// Parse a protocol version such as "1.2" or "tls1.2"
pub fn parse_protocol(s: &str) -> Result<Protocol> {
    let version = s.trim().to_ascii_lowercase();
    let version = version
        .strip_prefix("tlsv")
        .or_else(|| version.strip_prefix("tls"))
        .unwrap_or(&version);

    match version {
        "1.0" | "10" => Ok(Protocol::Tlsv10),
        "1.1" | "11" => Ok(Protocol::Tlsv11),
        "1.2" | "12" => Ok(Protocol::Tlsv12),
        _ => Err(Error::Configuration(format!("unsupported TLS version: {}", s))),
    }
}

/// Establishes secure connections to remote addresses
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new connection to `addr`, verifying the peer against
    /// `config.server_name()`
    async fn connect(&self, addr: SocketAddr, config: &TlsConfig) -> Result<Arc<dyn Connection>>;
}

/// TCP + TLS dialer
#[derive(Debug, Clone)]
pub struct TlsDialer {
    connect_timeout: Duration,
    probe_timeout: Duration,
    max_uses: u64,
}

impl Default for TlsDialer {
    fn default() -> Self {
        Self::from_settings(&DialSettings::default())
    }
}

impl TlsDialer {
    pub fn from_settings(settings: &DialSettings) -> Self {
        Self {
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            probe_timeout: Duration::from_millis(settings.probe_timeout_ms),
            max_uses: settings.max_uses,
        }
    }

    async fn connect_tcp(&self, addr: SocketAddr) -> Result<TcpStream> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout {
                addr,
                after: self.connect_timeout,
            })??;

        // Keep-alive lets dead peers surface as failed probes
        let socket = socket2::Socket::from(stream.into_std()?);
        socket.set_keepalive(true)?;
        socket.set_nodelay(true)?;
        Ok(TcpStream::from_std(socket.into())?)
    }
}

#[async_trait]
impl Connector for TlsDialer {
    async fn connect(&self, addr: SocketAddr, config: &TlsConfig) -> Result<Arc<dyn Connection>> {
        if config.is_insecure() {
            warn!(addr = %addr, "TLS verification disabled for dial");
        }

        let tcp = self.connect_tcp(addr).await?;
        let connector = tokio_native_tls::TlsConnector::from(config.build_connector()?);

        let stream = tokio::time::timeout(
            self.connect_timeout,
            connector.connect(config.server_name(), tcp),
        )
        .await
        .map_err(|_| Error::Timeout {
            addr,
            after: self.connect_timeout,
        })??;

        info!(
            addr = %addr,
            server_name = %config.server_name(),
            "Established TLS connection"
        );
        debug!(max_uses = self.max_uses, "Connection use limit");

        let conn: Arc<dyn Connection> = Arc::new(TlsConnection::new(
            addr,
            stream,
            self.max_uses,
            self.probe_timeout,
        ));
        Ok(conn)
    }
}
