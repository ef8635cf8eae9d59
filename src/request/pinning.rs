//! Pinned server certificate verification
//!
//! Servers present self-signed certificates and are addressed by IP, so the
//! usual WebPKI chain and name checks do not apply. The end-entity
//! certificate must equal the pinned identity; handshake signatures are
//! still verified with the crypto provider's algorithms.

use crate::common::ServerIdentity;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug)]
pub struct PinnedCertVerifier {
    identity: ServerIdentity,
    provider: Arc<CryptoProvider>,
}

impl PinnedCertVerifier {
    pub fn new(identity: ServerIdentity, provider: Arc<CryptoProvider>) -> Self {
        PinnedCertVerifier { identity, provider }
    }
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if self.identity.matches(end_entity) {
            Ok(ServerCertVerified::assertion())
        } else {
            warn!(
                "Certificate presented by {:?} does not match pinned {}",
                server_name, self.identity
            );
            Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier(identity: ServerIdentity) -> PinnedCertVerifier {
        PinnedCertVerifier::new(
            identity,
            Arc::new(rustls::crypto::aws_lc_rs::default_provider()),
        )
    }

    #[test]
    fn test_pinned_certificate_accepted() {
        let der = vec![0x30, 0x03, 0x02, 0x01, 0x01];
        let v = verifier(ServerIdentity::Certificate(der.clone()));
        let name = ServerName::try_from("203.0.113.10").unwrap();
        assert!(v
            .verify_server_cert(&CertificateDer::from(der), &[], &name, &[], UnixTime::now())
            .is_ok());
    }

    #[test]
    fn test_other_certificate_rejected() {
        let v = verifier(ServerIdentity::Fingerprint([7; 32]));
        let name = ServerName::try_from("203.0.113.10").unwrap();
        let result = v.verify_server_cert(
            &CertificateDer::from(vec![0x30, 0x00]),
            &[],
            &name,
            &[],
            UnixTime::now(),
        );
        assert!(matches!(
            result,
            Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure
            ))
        ));
    }

    #[test]
    fn test_supported_schemes_not_empty() {
        let v = verifier(ServerIdentity::Fingerprint([0; 32]));
        assert!(v
            .supported_verify_schemes()
            .contains(&SignatureScheme::ECDSA_NISTP256_SHA256));
    }
}
