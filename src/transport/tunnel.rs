//! Tunnel over an upstream proxy, exposed through a local proxy

use super::local_proxy::{LocalProxy, LocalProxyHandle};
use super::{Transport, TransportType, UpstreamDialer};
use crate::common::SessionInfo;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// Transport that is "up" while its local proxy is serving
pub struct ProxyTunnel {
    name: String,
    transport_type: TransportType,
    dialer: Arc<dyn UpstreamDialer>,
    local_proxy: SocketAddr,
    running: Mutex<Option<LocalProxyHandle>>,
}

impl ProxyTunnel {
    pub fn new(
        name: String,
        transport_type: TransportType,
        dialer: Arc<dyn UpstreamDialer>,
        local_proxy: SocketAddr,
    ) -> Self {
        ProxyTunnel {
            name,
            transport_type,
            dialer,
            local_proxy,
            running: Mutex::new(None),
        }
    }

    /// Address the local proxy is actually bound to, while connected
    pub fn local_proxy_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|h| h.local_addr())
    }
}

#[async_trait]
impl Transport for ProxyTunnel {
    fn name(&self) -> &str {
        &self.name
    }

    fn transport_type(&self) -> TransportType {
        self.transport_type
    }

    fn is_connected(&self) -> bool {
        self.running.lock().is_some()
    }

    fn routes_through_local_proxy(&self) -> bool {
        true
    }

    fn requires_handshake(&self, session: &SessionInfo) -> bool {
        !session.has_capability(self.transport_type.capability())
    }

    async fn connect(&self, session: &SessionInfo) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        if self.requires_handshake(session) {
            return Err(Error::handshake_required(format!(
                "server entry has no {} capability",
                self.transport_type.capability()
            )));
        }

        debug!("[{}] Probing upstream {}", self.name, self.dialer.server());
        self.dialer.probe().await?;

        let handle = LocalProxy::bind(self.local_proxy, self.dialer.clone())
            .await?
            .spawn()?;

        // A concurrent connect may have won; keep the first listener
        let previous = {
            let mut running = self.running.lock();
            if running.is_some() {
                Some(handle)
            } else {
                *running = Some(handle);
                None
            }
        };
        if let Some(extra) = previous {
            extra.shutdown().await;
            return Ok(());
        }

        info!(
            "[{}] {} tunnel connected via {}",
            self.name,
            self.transport_type,
            self.dialer.server()
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let handle = self.running.lock().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
            info!("[{}] {} tunnel disconnected", self.name, self.transport_type);
        }
        Ok(())
    }
}
