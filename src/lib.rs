//! Tunnel Fallback - reach a server when no tunnel is up
//!
//! Sends one HTTPS request to a server's pinned web endpoint by the first
//! path that works:
//! - the currently connected tunnel, if any
//! - direct HTTPS on the configured port, then 443
//! - temporary handshake-free tunnels, one at a time, each torn down after
//!   its single attempt
//!
//! # Architecture
//!
//! ```text
//!                 +-----------------+
//!                 |    fallback/    |
//!                 | (orchestrator)  |
//!                 +--------+--------+
//!                          |
//!          +---------------+---------------+
//!          |                               |
//!   +------v------+                 +------v------+
//!   |  request/   |                 | transport/  |
//!   | (pinned TLS)|<-- local proxy--| (tunnels)   |
//!   +------+------+                 +------+------+
//!          |                               |
//!          +---------------+---------------+
//!                          |
//!                 +--------v--------+
//!                 | common/ config/ |
//!                 +-----------------+
//! ```

pub mod common;
pub mod config;
pub mod fallback;
pub mod request;
pub mod transport;

pub use common::error::{Error, Result};
pub use common::{NeverStop, ServerIdentity, SessionInfo, StopSignal};
pub use config::Config;
pub use fallback::{AttemptOutcome, FailureReason, RequestOrchestrator};
pub use request::{HttpsRequestClient, RequestParameters, SecureRequestClient};
pub use transport::{Transport, TransportCatalog, TransportRegistry};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
