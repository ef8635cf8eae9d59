//! Request fallback
//!
//! Reaches the server by the first path that works, strictly in order:
//! the connected transport if there is one, then direct HTTPS on the
//! configured port and 443, then temporary handshake-free transports from
//! the catalog, each connected for a single attempt and released after.
//!
//! Only one path is in flight at a time. At most one temporary transport
//! is connected at any instant, and it is always disconnected before
//! `make_request` returns.

mod lifecycle;
mod selector;

pub use lifecycle::TransportConnection;
pub use selector::{select_temporary_transports, TransportCandidates};

use crate::common::{SessionInfo, StopSignal};
use crate::request::{RequestParameters, SecureRequestClient};
use crate::transport::{Transport, TransportCatalog, TransportType};
use crate::{Error, Result};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Port tried after the configured one when connecting directly
pub const STANDARD_HTTPS_PORT: u16 = 443;

/// Result of one `make_request` call
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Response body
    Success(Bytes),
    Failed(FailureReason),
    /// The stop signal was observed; no later path was tried
    Cancelled,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AttemptOutcome::Cancelled)
    }
}

#[derive(Debug)]
pub enum FailureReason {
    /// Nothing connected and temporary connections are off
    TemporaryDisallowed,
    /// The single attempt over the connected transport failed
    Request(Error),
    /// Direct ports failed and no transport could connect without a handshake
    NoEligibleTransport(Vec<AttemptFailure>),
    /// Every direct port and temporary transport failed
    Exhausted(Vec<AttemptFailure>),
}

impl FailureReason {
    /// Per-path failures, in the order they were tried
    pub fn attempts(&self) -> &[AttemptFailure] {
        match self {
            FailureReason::NoEligibleTransport(attempts) | FailureReason::Exhausted(attempts) => {
                attempts
            }
            _ => &[],
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::TemporaryDisallowed => {
                write!(f, "no transport connected and temporary connections disallowed")
            }
            FailureReason::Request(e) => write!(f, "request over connected transport failed: {}", e),
            FailureReason::NoEligibleTransport(attempts) => write!(
                f,
                "all fallback paths exhausted: no eligible temporary transport ({} direct attempts failed)",
                attempts.len()
            ),
            FailureReason::Exhausted(attempts) => write!(
                f,
                "all fallback paths exhausted ({} attempts failed)",
                attempts.len()
            ),
        }
    }
}

/// One path the fallback tried
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptPath {
    Direct { port: u16 },
    Temporary { name: String, transport_type: TransportType },
}

impl fmt::Display for AttemptPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptPath::Direct { port } => write!(f, "direct:{}", port),
            AttemptPath::Temporary {
                name,
                transport_type,
            } => write!(f, "{}({})", name, transport_type),
        }
    }
}

#[derive(Debug)]
pub struct AttemptFailure {
    pub path: AttemptPath,
    pub error: Error,
}

impl AttemptFailure {
    fn logged(path: AttemptPath, error: Error) -> Self {
        if error.is_connection_failure() {
            warn!("{} unreachable: {}", path, error);
        } else {
            warn!("{} request failed: {}", path, error);
        }
        AttemptFailure { path, error }
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.error)
    }
}

/// Ports for the direct step, configured port first
pub fn direct_ports(session: &SessionInfo) -> Vec<u16> {
    let mut ports = vec![session.web_port()];
    if session.web_port() != STANDARD_HTTPS_PORT {
        ports.push(STANDARD_HTTPS_PORT);
    }
    ports
}

/// Chooses how to reach the server for each request
pub struct RequestOrchestrator {
    client: Arc<dyn SecureRequestClient>,
    catalog: Arc<dyn TransportCatalog>,
}

impl RequestOrchestrator {
    pub fn new(client: Arc<dyn SecureRequestClient>, catalog: Arc<dyn TransportCatalog>) -> Self {
        RequestOrchestrator { client, catalog }
    }

    /// Send one request by the first path that works.
    ///
    /// `current` is borrowed: it is used when connected and never
    /// disconnected here. `Err` is returned only for invalid parameters;
    /// network failures come back as `AttemptOutcome::Failed`.
    pub async fn make_request(
        &self,
        allow_temporary: bool,
        current: Option<&dyn Transport>,
        session: &SessionInfo,
        params: &RequestParameters,
        stop: &dyn StopSignal,
    ) -> Result<AttemptOutcome> {
        if stop.is_signalled() {
            debug!("Request {} cancelled before start", params.path());
            return Ok(AttemptOutcome::Cancelled);
        }
        params.validate()?;

        if let Some(transport) = current.filter(|t| t.is_connected()) {
            return Ok(self.request_over_current(transport, session, params).await);
        }

        if !allow_temporary {
            debug!(
                "No transport connected for {}, temporary connections disallowed",
                params.path()
            );
            return Ok(AttemptOutcome::Failed(FailureReason::TemporaryDisallowed));
        }

        let mut failures = Vec::new();

        for port in direct_ports(session) {
            if stop.is_signalled() {
                debug!("Request {} cancelled before direct port {}", params.path(), port);
                return Ok(AttemptOutcome::Cancelled);
            }

            debug!(
                "Trying {} directly at {}:{}",
                params.path(),
                session.server_address(),
                port
            );
            match self.client.attempt(session, port, params, false).await {
                Ok(body) => {
                    info!(
                        "Request {} succeeded directly on port {}",
                        params.path(),
                        port
                    );
                    return Ok(AttemptOutcome::Success(body));
                }
                Err(e) => failures.push(AttemptFailure::logged(AttemptPath::Direct { port }, e)),
            }
        }

        let candidates = select_temporary_transports(session, self.catalog.as_ref());
        if candidates.is_empty() {
            warn!("No transport can connect without a handshake");
            return Ok(AttemptOutcome::Failed(FailureReason::NoEligibleTransport(
                failures,
            )));
        }
        debug!("Temporary transport candidates: {:?}", candidates.names());

        for transport in candidates {
            if stop.is_signalled() {
                debug!(
                    "Request {} cancelled before temporary transport {}",
                    params.path(),
                    transport.name()
                );
                return Ok(AttemptOutcome::Cancelled);
            }

            let path = AttemptPath::Temporary {
                name: transport.name().to_string(),
                transport_type: transport.transport_type(),
            };

            let connection = match TransportConnection::acquire(transport, session).await {
                Ok(connection) => connection,
                Err(e) => {
                    failures.push(AttemptFailure::logged(path, e));
                    continue;
                }
            };

            if stop.is_signalled() {
                debug!(
                    "[{}] request {} cancelled after connecting",
                    connection.name(),
                    params.path()
                );
                connection.release().await;
                return Ok(AttemptOutcome::Cancelled);
            }

            let via_local_proxy = connection.routes_through_local_proxy();
            let result = connection
                .run(
                    self.client
                        .attempt(session, session.web_port(), params, via_local_proxy),
                )
                .await;

            match result {
                Ok(body) => {
                    info!("Request {} succeeded over temporary {}", params.path(), path);
                    return Ok(AttemptOutcome::Success(body));
                }
                Err(e) => failures.push(AttemptFailure::logged(path, e)),
            }
        }

        warn!("All fallback paths exhausted for {}", params.path());
        Ok(AttemptOutcome::Failed(FailureReason::Exhausted(failures)))
    }

    async fn request_over_current(
        &self,
        transport: &dyn Transport,
        session: &SessionInfo,
        params: &RequestParameters,
    ) -> AttemptOutcome {
        let via_local_proxy = transport.routes_through_local_proxy();
        debug!(
            "[{}] requesting {} over connected transport (local proxy: {})",
            transport.name(),
            params.path(),
            via_local_proxy
        );

        match self
            .client
            .attempt(session, session.web_port(), params, via_local_proxy)
            .await
        {
            Ok(body) => AttemptOutcome::Success(body),
            Err(e) => {
                warn!("[{}] request {} failed: {}", transport.name(), params.path(), e);
                AttemptOutcome::Failed(FailureReason::Request(e))
            }
        }
    }
}
