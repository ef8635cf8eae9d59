//! Error types for the request client

use std::io;
use thiserror::Error;

/// Client error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request error: {0}")]
    Request(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Handshake required: {0}")]
    HandshakeRequired(String),

    #[error("Misuse: {0}")]
    Misuse(String),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Error::Connection(msg.into())
    }

    pub fn request<S: Into<String>>(msg: S) -> Self {
        Error::Request(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Error::Timeout(msg.into())
    }

    pub fn auth<S: Into<String>>(msg: S) -> Self {
        Error::Auth(msg.into())
    }

    pub fn tls<S: Into<String>>(msg: S) -> Self {
        Error::Tls(msg.into())
    }

    pub fn handshake_required<S: Into<String>>(msg: S) -> Self {
        Error::HandshakeRequired(msg.into())
    }

    pub fn misuse<S: Into<String>>(msg: S) -> Self {
        Error::Misuse(msg.into())
    }

    /// True for errors raised while a tunnel or TCP path was being
    /// established, as opposed to a reachable endpoint refusing the request.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Connection(_)
                | Error::Timeout(_)
                | Error::Auth(_)
                | Error::Tls(_)
                | Error::HandshakeRequired(_)
        )
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Error::Tls(e.to_string())
    }
}

impl From<hyper::Error> for Error {
    fn from(e: hyper::Error) -> Self {
        Error::Request(e.to_string())
    }
}

impl From<http::Error> for Error {
    fn from(e: http::Error) -> Self {
        Error::Request(e.to_string())
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let e = Error::config("test error");
        assert!(matches!(e, Error::Config(_)));
    }

    #[test]
    fn test_error_display() {
        let e = Error::request("status 503");
        assert_eq!(e.to_string(), "Request error: status 503");
    }

    #[test]
    fn test_connection_failure_classification() {
        assert!(Error::connection("refused").is_connection_failure());
        assert!(Error::timeout("slow").is_connection_failure());
        assert!(Error::handshake_required("VPN").is_connection_failure());
        assert!(!Error::request("status 404").is_connection_failure());
        assert!(!Error::misuse("empty path").is_connection_failure());
    }
}
