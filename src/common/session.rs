//! Server session description
//!
//! A `SessionInfo` is the read-only view of one server entry: where its web
//! server listens and which certificate it must present.

use crate::{Error, Result};
use base64::Engine;
use rustls::pki_types::CertificateDer;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

const FINGERPRINT_PREFIX: &str = "sha256:";

/// Identity the server's TLS certificate is pinned to
#[derive(Clone, PartialEq, Eq)]
pub enum ServerIdentity {
    /// Exact DER encoding of the expected end-entity certificate
    Certificate(Vec<u8>),
    /// SHA-256 digest of the expected end-entity certificate
    Fingerprint([u8; 32]),
}

impl ServerIdentity {
    /// Check a presented end-entity certificate against the pin
    pub fn matches(&self, cert: &CertificateDer<'_>) -> bool {
        match self {
            ServerIdentity::Certificate(der) => der.as_slice() == cert.as_ref(),
            ServerIdentity::Fingerprint(digest) => {
                let actual: [u8; 32] = Sha256::digest(cert.as_ref()).into();
                actual == *digest
            }
        }
    }

    pub fn fingerprint(&self) -> [u8; 32] {
        match self {
            ServerIdentity::Certificate(der) => Sha256::digest(der).into(),
            ServerIdentity::Fingerprint(digest) => *digest,
        }
    }
}

impl FromStr for ServerIdentity {
    type Err = Error;

    /// Accepts `sha256:<64 hex chars>` or a base64 DER certificate.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::config("Server certificate cannot be empty"));
        }

        if let Some(hex_digest) = s.strip_prefix(FINGERPRINT_PREFIX) {
            let bytes = hex::decode(hex_digest)
                .map_err(|e| Error::config(format!("Invalid certificate fingerprint: {}", e)))?;
            let digest: [u8; 32] = bytes.try_into().map_err(|_| {
                Error::config("Certificate fingerprint must be 32 bytes")
            })?;
            return Ok(ServerIdentity::Fingerprint(digest));
        }

        // PEM bodies are often pasted with line breaks
        let compact: String = s.split_whitespace().collect();
        let der = base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| Error::config(format!("Invalid base64 certificate: {}", e)))?;
        Ok(ServerIdentity::Certificate(der))
    }
}

impl fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", FINGERPRINT_PREFIX, hex::encode(self.fingerprint()))
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Immutable description of the target server
#[derive(Debug, Clone)]
pub struct SessionInfo {
    server_address: String,
    web_port: u16,
    web_server_identity: ServerIdentity,
    capabilities: Vec<String>,
}

impl SessionInfo {
    pub fn new(
        server_address: impl Into<String>,
        web_port: u16,
        web_server_identity: ServerIdentity,
    ) -> Self {
        SessionInfo {
            server_address: server_address.into(),
            web_port,
            web_server_identity,
            capabilities: Vec::new(),
        }
    }

    /// Protocols the server entry carries enough material for to connect
    /// without a prior handshake
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    pub fn web_port(&self) -> u16 {
        self.web_port
    }

    pub fn web_server_identity(&self) -> &ServerIdentity {
        &self.web_server_identity
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.iter().any(|c| c.eq_ignore_ascii_case(tag))
    }
}
