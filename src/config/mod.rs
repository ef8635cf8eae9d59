//! Configuration module

use crate::common::{ServerIdentity, SessionInfo};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Whether temporary tunnels may be brought up to carry a request
    #[serde(rename = "allow-temporary")]
    pub allow_temporary: bool,

    /// TCP / tunnel connect timeout in seconds
    #[serde(rename = "connect-timeout")]
    pub connect_timeout: u64,

    /// Whole request attempt timeout in seconds
    #[serde(rename = "request-timeout")]
    pub request_timeout: u64,

    /// Loopback address connected tunnels expose their local proxy on
    #[serde(rename = "local-proxy")]
    pub local_proxy: String,

    /// Server entry
    pub server: ServerConfig,

    /// Tunnel definitions, in the order they are tried
    pub transports: Vec<TransportConfig>,
}

impl Config {
    /// Load configuration from file (synchronous)
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from file (async)
    pub async fn load_async<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        Self::from_str(&content)
    }

    /// Load from string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.local_proxy_addr()?;

        if self.connect_timeout == 0 {
            return Err(Error::config("connect-timeout cannot be 0"));
        }
        if self.request_timeout == 0 {
            return Err(Error::config("request-timeout cannot be 0"));
        }

        for transport in &self.transports {
            transport.validate()?;
        }

        let mut seen = std::collections::HashSet::new();
        for transport in &self.transports {
            if !seen.insert(transport.name.as_str()) {
                return Err(Error::config(format!(
                    "Duplicate transport name: {}",
                    transport.name
                )));
            }
        }

        Ok(())
    }

    pub fn local_proxy_addr(&self) -> Result<SocketAddr> {
        self.local_proxy.parse().map_err(|e| {
            Error::config(format!("Invalid local-proxy {}: {}", self.local_proxy, e))
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Build the session description for the configured server
    pub fn session_info(&self) -> Result<SessionInfo> {
        self.server.session_info()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            allow_temporary: true,
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            local_proxy: default_local_proxy(),
            server: ServerConfig::default(),
            transports: Vec::new(),
        }
    }
}

fn default_log_level() -> Option<String> {
    Some("info".to_string())
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_local_proxy() -> String {
    "127.0.0.1:8085".to_string()
}

/// Server entry configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    /// Server address (IP or host name)
    pub address: String,

    /// Port the HTTPS web server listens on
    #[serde(rename = "web-port")]
    pub web_port: u16,

    /// Expected certificate: base64 DER or `sha256:<hex>`
    #[serde(rename = "web-server-certificate")]
    pub web_server_certificate: String,

    /// Protocols usable without a handshake
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(Error::config("Server address cannot be empty"));
        }
        if self.web_port == 0 {
            return Err(Error::config("Server web-port cannot be 0"));
        }
        self.web_server_certificate.parse::<ServerIdentity>()?;
        Ok(())
    }

    pub fn session_info(&self) -> Result<SessionInfo> {
        let identity: ServerIdentity = self.web_server_certificate.parse()?;
        Ok(SessionInfo::new(self.address.clone(), self.web_port, identity)
            .with_capabilities(self.capabilities.iter().cloned()))
    }
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Transport name
    pub name: String,

    /// Transport type (http, socks5)
    #[serde(rename = "type")]
    pub transport_type: String,

    /// Upstream server address
    pub server: String,

    /// Upstream server port
    pub port: u16,

    /// All other fields
    #[serde(flatten)]
    pub extra: HashMap<String, serde_yaml::Value>,
}

impl TransportConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::config("Transport name cannot be empty"));
        }
        if self.server.is_empty() {
            return Err(Error::config("Transport server cannot be empty"));
        }
        if self.port == 0 {
            return Err(Error::config("Transport port cannot be 0"));
        }
        Ok(())
    }

    /// Get string field
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.extra.get(key).and_then(|v| v.as_str()).map(String::from)
    }
}
