//! Tunnel transports
//!
//! A transport is one circumvention protocol that, once connected, carries
//! traffic for the client. Every built-in transport exposes a loopback HTTP
//! CONNECT proxy while it is up; requests reach the server through it.
//!
//! The fallback orchestrator only ever sees `dyn Transport` and reads the
//! capability methods below. It never branches on the concrete protocol.

mod http;
pub mod local_proxy;
mod registry;
mod socks5;
mod tunnel;

pub use http::HttpConnectDialer;
pub use local_proxy::{LocalProxy, LocalProxyHandle};
pub use registry::{TransportCatalog, TransportRegistry};
pub use socks5::Socks5Dialer;
pub use tunnel::ProxyTunnel;

use crate::common::{ProxyConnection, SessionInfo};
use crate::{Error, Result};
use async_trait::async_trait;
use std::fmt;

/// Transport protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Upstream HTTP CONNECT proxy
    Http,
    /// Upstream SOCKS5 proxy
    Socks5,
}

impl TransportType {
    /// Capability tag a server entry lists when it carries everything this
    /// protocol needs to connect without a handshake
    pub fn capability(&self) -> &'static str {
        match self {
            TransportType::Http => "HTTP",
            TransportType::Socks5 => "SOCKS5",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportType::Http => write!(f, "HTTP"),
            TransportType::Socks5 => write!(f, "SOCKS5"),
        }
    }
}

impl TryFrom<&str> for TransportType {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "http" | "https-connect" => Ok(TransportType::Http),
            "socks5" | "socks" => Ok(TransportType::Socks5),
            _ => Err(Error::config(format!("Unknown transport type: {}", s))),
        }
    }
}

/// A tunnel the client can bring up and tear down
#[async_trait]
pub trait Transport: Send + Sync {
    /// Configured name, for logs
    fn name(&self) -> &str;

    fn transport_type(&self) -> TransportType;

    fn is_connected(&self) -> bool;

    /// Whether requests carried by this transport go through the loopback
    /// local proxy it exposes
    fn routes_through_local_proxy(&self) -> bool;

    /// Whether connecting needs material only a prior handshake with the
    /// server can provide
    fn requires_handshake(&self, session: &SessionInfo) -> bool;

    /// Bring the tunnel up. A failed connect leaves nothing running.
    async fn connect(&self, session: &SessionInfo) -> Result<()>;

    /// Tear the tunnel down. No-op when not connected.
    async fn disconnect(&self) -> Result<()>;
}

/// Opens streams to arbitrary targets through a tunnel's upstream server
#[async_trait]
pub trait UpstreamDialer: Send + Sync {
    /// Upstream `host:port`
    fn server(&self) -> String;

    /// Check the upstream is reachable
    async fn probe(&self) -> Result<()>;

    /// Open a stream to `host:port` through the upstream
    async fn dial(&self, host: &str, port: u16) -> Result<Box<dyn ProxyConnection>>;
}
