//! Scoped ownership of a temporarily connected transport
//!
//! A `TransportConnection` exists only while its transport is connected.
//! `release`, `run` and `Drop` all end in exactly one `disconnect`.

use crate::common::SessionInfo;
use crate::transport::Transport;
use crate::{Error, Result};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{debug, warn};

pub struct TransportConnection {
    transport: Option<Box<dyn Transport>>,
}

impl TransportConnection {
    /// Connect `transport` for one attempt.
    ///
    /// Transports that need a handshake are refused without a connect call.
    /// On failure the transport is dropped unconnected.
    pub async fn acquire(transport: Box<dyn Transport>, session: &SessionInfo) -> Result<Self> {
        if transport.requires_handshake(session) {
            return Err(Error::handshake_required(format!(
                "{} cannot connect without a handshake",
                transport.name()
            )));
        }

        transport.connect(session).await?;
        debug!("[{}] temporary transport connected", transport.name());

        Ok(TransportConnection {
            transport: Some(transport),
        })
    }

    fn transport(&self) -> &dyn Transport {
        match &self.transport {
            Some(transport) => transport.as_ref(),
            None => unreachable!("transport taken before release"),
        }
    }

    pub fn name(&self) -> &str {
        self.transport().name()
    }

    pub fn routes_through_local_proxy(&self) -> bool {
        self.transport().routes_through_local_proxy()
    }

    /// Drive `attempt` while connected, then release.
    ///
    /// A panic inside `attempt` is held until the transport has been
    /// disconnected, then resumed.
    pub async fn run<F: Future>(self, attempt: F) -> F::Output {
        let outcome = AssertUnwindSafe(attempt).catch_unwind().await;
        self.release().await;
        match outcome {
            Ok(output) => output,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Disconnect and dispose the transport
    pub async fn release(mut self) {
        if let Some(transport) = self.transport.take() {
            disconnect(transport).await;
        }
    }
}

async fn disconnect(transport: Box<dyn Transport>) {
    match transport.disconnect().await {
        Ok(()) => debug!("[{}] temporary transport released", transport.name()),
        Err(e) => warn!("[{}] disconnect failed: {}", transport.name(), e),
    }
}

impl Drop for TransportConnection {
    /// Reached only when the owning future is dropped mid-attempt
    fn drop(&mut self) {
        let Some(transport) = self.transport.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("[{}] releasing abandoned temporary transport", transport.name());
                handle.spawn(disconnect(transport));
            }
            Err(_) => warn!(
                "[{}] dropped outside a runtime, transport not disconnected",
                transport.name()
            ),
        }
    }
}
