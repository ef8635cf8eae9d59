//! Common utilities and types

pub mod cancel;
pub mod error;
pub mod net;
pub mod session;

pub use cancel::{NeverStop, StopSignal};
pub use error::{Error, Result};
pub use net::ProxyConnection;
pub use session::{ServerIdentity, SessionInfo};
