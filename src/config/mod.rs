use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// TLS settings used to build the client's base TLS configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsSettings {
    /// PEM file with an additional trusted root certificate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,

    /// Trust only `ca_file`, not the system roots
    #[serde(default)]
    pub only_ca_file: bool,

    /// PKCS#12 archive holding the client certificate and key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,

    /// Password for `identity_file`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_password: Option<String>,

    /// Disable certificate and hostname verification
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// Lowest TLS version to negotiate (e.g. "1.2")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_protocol: Option<String>,

    /// Highest TLS version to negotiate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_protocol: Option<String>,
}

/// Dialer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialSettings {
    /// TCP connect and TLS handshake timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Liveness probe timeout in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Checkouts allowed per connection before redialing (0 = unlimited)
    #[serde(default)]
    pub max_uses: u64,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

impl Default for DialSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            max_uses: 0,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// DNS servers used for discovery ("ip" or "ip:port"). When empty or
    /// when none of them answers, the system resolver is used.
    #[serde(default)]
    pub resolvers: Vec<String>,

    /// Addresses never dialed ("ip" blocks every port, "ip:port" one port)
    #[serde(default)]
    pub blacklist: Vec<String>,

    #[serde(default)]
    pub tls: TlsSettings,

    #[serde(default)]
    pub dial: DialSettings,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<ClientConfig> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: ClientConfig =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

    Ok(config)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Load configuration from environment variables
///
/// - KEYPOOL_RESOLVERS (comma-separated nameservers)
/// - KEYPOOL_BLACKLIST (comma-separated addresses)
/// - KEYPOOL_CA_FILE, KEYPOOL_IDENTITY_FILE, KEYPOOL_IDENTITY_PASSWORD
/// - KEYPOOL_INSECURE ("true" or "1")
/// - KEYPOOL_CONNECT_TIMEOUT_MS, KEYPOOL_PROBE_TIMEOUT_MS, KEYPOOL_MAX_USES
pub fn load_from_env() -> Result<ClientConfig> {
    // Try to load .env file if it exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    let mut config = ClientConfig::new();

    if let Ok(resolvers) = std::env::var("KEYPOOL_RESOLVERS") {
        config.resolvers = split_list(&resolvers);
    }

    if let Ok(blacklist) = std::env::var("KEYPOOL_BLACKLIST") {
        config.blacklist = split_list(&blacklist);
    }

    config.tls.ca_file = std::env::var("KEYPOOL_CA_FILE").ok().map(PathBuf::from);
    config.tls.identity_file = std::env::var("KEYPOOL_IDENTITY_FILE").ok().map(PathBuf::from);
    config.tls.identity_password = std::env::var("KEYPOOL_IDENTITY_PASSWORD").ok();
    config.tls.insecure_skip_verify = std::env::var("KEYPOOL_INSECURE")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    if let Ok(timeout) = std::env::var("KEYPOOL_CONNECT_TIMEOUT_MS") {
        config.dial.connect_timeout_ms = timeout
            .parse()
            .context("KEYPOOL_CONNECT_TIMEOUT_MS must be an integer")?;
    }

    if let Ok(timeout) = std::env::var("KEYPOOL_PROBE_TIMEOUT_MS") {
        config.dial.probe_timeout_ms = timeout
            .parse()
            .context("KEYPOOL_PROBE_TIMEOUT_MS must be an integer")?;
    }

    if let Ok(max_uses) = std::env::var("KEYPOOL_MAX_USES") {
        config.dial.max_uses = max_uses
            .parse()
            .context("KEYPOOL_MAX_USES must be an integer")?;
    }

    Ok(config)
}

/// Load configuration from a YAML file when given, otherwise from the environment
pub fn load_config(config_path: Option<&str>) -> Result<ClientConfig> {
    match config_path {
        Some(path) => load_from_yaml(path),
        None => load_from_env(),
    }
}
