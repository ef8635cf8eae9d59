//! Transport catalog
//!
//! The catalog hands out fresh, unconnected transport instances. Ownership
//! of each instance moves to the caller of `enumerate_all`.

use super::{HttpConnectDialer, ProxyTunnel, Socks5Dialer, Transport, TransportType, UpstreamDialer};
use crate::config::TransportConfig;
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Enumerates every known transport
pub trait TransportCatalog: Send + Sync {
    /// New instances, in catalog order
    fn enumerate_all(&self) -> Vec<Box<dyn Transport>>;
}

/// Validated settings for one configured tunnel
#[derive(Debug, Clone)]
struct TunnelSpec {
    name: String,
    transport_type: TransportType,
    server: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
}

/// Catalog built from the `transports` configuration section
pub struct TransportRegistry {
    specs: Vec<TunnelSpec>,
    local_proxy: SocketAddr,
    connect_timeout: Duration,
}

impl TransportRegistry {
    pub fn new(
        configs: &[TransportConfig],
        local_proxy: SocketAddr,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let specs = configs
            .iter()
            .map(Self::parse_spec)
            .collect::<Result<Vec<_>>>()?;

        Ok(TransportRegistry {
            specs,
            local_proxy,
            connect_timeout,
        })
    }

    fn parse_spec(config: &TransportConfig) -> Result<TunnelSpec> {
        config.validate()?;
        let transport_type = TransportType::try_from(config.transport_type.as_str())?;

        Ok(TunnelSpec {
            name: config.name.clone(),
            transport_type,
            server: config.server.clone(),
            port: config.port,
            username: config.get_string("username"),
            password: config.get_string("password"),
        })
    }

    fn create_transport(&self, spec: &TunnelSpec) -> Box<dyn Transport> {
        let dialer: Arc<dyn UpstreamDialer> = match spec.transport_type {
            TransportType::Http => Arc::new(HttpConnectDialer::new(
                spec.name.clone(),
                spec.server.clone(),
                spec.port,
                spec.username.clone(),
                spec.password.clone(),
                self.connect_timeout,
            )),
            TransportType::Socks5 => Arc::new(Socks5Dialer::new(
                spec.name.clone(),
                spec.server.clone(),
                spec.port,
                spec.username.clone(),
                spec.password.clone(),
                self.connect_timeout,
            )),
        };

        Box::new(ProxyTunnel::new(
            spec.name.clone(),
            spec.transport_type,
            dialer,
            self.local_proxy,
        ))
    }

    /// New instance of the transport configured under `name`
    pub fn create(&self, name: &str) -> Result<Box<dyn Transport>> {
        self.specs
            .iter()
            .find(|spec| spec.name == name)
            .map(|spec| self.create_transport(spec))
            .ok_or_else(|| Error::config(format!("Unknown transport: {}", name)))
    }

    /// Configured transport names, in catalog order
    pub fn names(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl TransportCatalog for TransportRegistry {
    fn enumerate_all(&self) -> Vec<Box<dyn Transport>> {
        self.specs
            .iter()
            .map(|spec| self.create_transport(spec))
            .collect()
    }
}
