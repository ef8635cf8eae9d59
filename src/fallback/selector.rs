//! Temporary transport selection

use crate::common::SessionInfo;
use crate::transport::{Transport, TransportCatalog};
use tracing::debug;

/// Transports that can connect with no prior handshake, in catalog order.
///
/// Owned exclusively by the fallback step that consumes it.
pub struct TransportCandidates {
    candidates: Vec<Box<dyn Transport>>,
}

impl TransportCandidates {
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.candidates.iter().map(|t| t.name()).collect()
    }
}

impl IntoIterator for TransportCandidates {
    type Item = Box<dyn Transport>;
    type IntoIter = std::vec::IntoIter<Box<dyn Transport>>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.into_iter()
    }
}

/// Filter the catalog down to transports usable for a temporary connection.
///
/// Ineligible instances are dropped here and never connected. An empty
/// result is not an error.
pub fn select_temporary_transports(
    session: &SessionInfo,
    catalog: &dyn TransportCatalog,
) -> TransportCandidates {
    let mut candidates = Vec::new();

    for transport in catalog.enumerate_all() {
        if transport.requires_handshake(session) {
            debug!(
                "[{}] {} needs a handshake, not eligible for a temporary connection",
                transport.name(),
                transport.transport_type()
            );
            // no early break, every instance is either kept or dropped here
            continue;
        }
        candidates.push(transport);
    }

    TransportCandidates { candidates }
}
