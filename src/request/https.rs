//! HTTPS request client
//!
//! One attempt = one TCP connection (direct, or CONNECT through the local
//! proxy), one pinned TLS session, one HTTP/1.1 exchange.

use super::pinning::PinnedCertVerifier;
use super::{RequestParameters, SecureRequestClient};
use crate::common::net;
use crate::common::{ServerIdentity, SessionInfo};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONNECTION, HOST, USER_AGENT};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace};

const CLIENT_USER_AGENT: &str = concat!("tunnel-fallback/", env!("CARGO_PKG_VERSION"));

/// HTTPS client pinned to the session's server certificate
pub struct HttpsRequestClient {
    local_proxy: SocketAddr,
    connect_timeout: Duration,
    request_timeout: Duration,
    provider: Arc<CryptoProvider>,
}

impl HttpsRequestClient {
    pub fn new(local_proxy: SocketAddr, connect_timeout: Duration, request_timeout: Duration) -> Self {
        HttpsRequestClient {
            local_proxy,
            connect_timeout,
            request_timeout,
            provider: Arc::new(rustls::crypto::aws_lc_rs::default_provider()),
        }
    }

    fn tls_connector(&self, identity: &ServerIdentity) -> Result<TlsConnector> {
        let verifier = PinnedCertVerifier::new(identity.clone(), self.provider.clone());
        let config = ClientConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();
        Ok(TlsConnector::from(Arc::new(config)))
    }

    async fn open_stream(
        &self,
        session: &SessionInfo,
        port: u16,
        via_local_proxy: bool,
    ) -> Result<TcpStream> {
        if via_local_proxy {
            let proxy = self.local_proxy.to_string();
            let mut stream = net::connect_tcp(&proxy, self.connect_timeout).await?;
            timeout(
                self.connect_timeout,
                net::http_connect(&mut stream, session.server_address(), port, None),
            )
            .await
            .map_err(|_| Error::timeout(format!("CONNECT through {} timed out", proxy)))??;
            Ok(stream)
        } else {
            let target = net::host_port(session.server_address(), port);
            net::connect_tcp(&target, self.connect_timeout).await
        }
    }

    async fn send(
        &self,
        session: &SessionInfo,
        port: u16,
        params: &RequestParameters,
        via_local_proxy: bool,
    ) -> Result<Bytes> {
        let stream = self.open_stream(session, port, via_local_proxy).await?;

        let host = session
            .server_address()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let server_name = ServerName::try_from(host)
            .map_err(|e| Error::tls(format!("Invalid server name: {}", e)))?;
        let tls = self
            .tls_connector(session.web_server_identity())?
            .connect(server_name, stream)
            .await
            .map_err(|e| Error::tls(format!("TLS handshake failed: {}", e)))?;

        let (mut sender, connection) = http1::handshake(TokioIo::new(tls))
            .await
            .map_err(|e| Error::connection(format!("HTTP handshake failed: {}", e)))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                trace!("HTTPS connection ended: {}", e);
            }
        });

        let request = build_request(session, port, params)?;
        let response = sender.send_request(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();

        if status != StatusCode::OK {
            return Err(Error::request(format!(
                "{} returned {}",
                params.path(),
                status
            )));
        }
        Ok(body)
    }
}

fn build_request(
    session: &SessionInfo,
    port: u16,
    params: &RequestParameters,
) -> Result<Request<Full<Bytes>>> {
    let method = if params.body().is_some() {
        Method::POST
    } else {
        Method::GET
    };

    let mut builder = Request::builder()
        .method(method)
        .uri(params.path())
        .header(HOST, net::host_port(session.server_address(), port))
        .header(USER_AGENT, CLIENT_USER_AGENT)
        .header(CONNECTION, "close");
    for (name, value) in params.headers() {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let body = params.body().cloned().unwrap_or_default();
    Ok(builder.body(Full::new(body))?)
}

#[async_trait]
impl SecureRequestClient for HttpsRequestClient {
    async fn attempt(
        &self,
        session: &SessionInfo,
        port: u16,
        params: &RequestParameters,
        via_local_proxy: bool,
    ) -> Result<Bytes> {
        debug!(
            "HTTPS {} to {}:{} (local proxy: {})",
            params.path(),
            session.server_address(),
            port,
            via_local_proxy
        );

        timeout(
            self.request_timeout,
            self.send(session, port, params, via_local_proxy),
        )
        .await
        .map_err(|_| {
            Error::timeout(format!(
                "Request to {}:{} timed out",
                session.server_address(),
                port
            ))
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::net::find_header_end;
    use crate::common::ProxyConnection;
    use crate::transport::{LocalProxy, UpstreamDialer};
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_rustls::TlsAcceptor;

    struct DirectDialer;

    #[async_trait]
    impl UpstreamDialer for DirectDialer {
        fn server(&self) -> String {
            "direct".to_string()
        }

        async fn probe(&self) -> Result<()> {
            Ok(())
        }

        async fn dial(&self, host: &str, port: u16) -> Result<Box<dyn ProxyConnection>> {
            Ok(Box::new(TcpStream::connect((host, port)).await?))
        }
    }

    /// Minimal HTTPS server answering every request with a fixed response
    async fn https_server(status_line: &'static str, body: &'static str) -> (SocketAddr, Vec<u8>) {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_der = cert.serialize_der().unwrap();
        let key_der = cert.serialize_private_key_der();

        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(
                vec![CertificateDer::from(cert_der.clone())],
                PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der)),
            )
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let Ok(mut tls) = acceptor.accept(stream).await else {
                        return;
                    };
                    let mut buf = vec![0u8; 4096];
                    let mut filled = 0;
                    while find_header_end(&buf[..filled]).is_none() {
                        match tls.read(&mut buf[filled..]).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => filled += n,
                        }
                    }
                    let response = format!(
                        "{}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status_line,
                        body.len(),
                        body
                    );
                    let _ = tls.write_all(response.as_bytes()).await;
                    let _ = tls.shutdown().await;
                });
            }
        });

        (addr, cert_der)
    }

    fn client(local_proxy: SocketAddr) -> HttpsRequestClient {
        HttpsRequestClient::new(local_proxy, Duration::from_secs(5), Duration::from_secs(10))
    }

    fn session(addr: SocketAddr, identity: ServerIdentity) -> SessionInfo {
        SessionInfo::new(addr.ip().to_string(), addr.port(), identity)
    }

    #[test]
    fn test_build_request() {
        let session = SessionInfo::new("203.0.113.10", 8080, ServerIdentity::Fingerprint([0; 32]));
        let params = RequestParameters::new("/handshake?id=1").with_header("X-Trace", "1");
        let request = build_request(&session, 8080, &params).unwrap();
        assert_eq!(request.method(), Method::GET);
        assert_eq!(request.uri().path(), "/handshake");
        assert_eq!(request.headers()[HOST], "203.0.113.10:8080");
        assert_eq!(request.headers()["x-trace"], "1");

        let post = build_request(&session, 443, &params.with_body("data")).unwrap();
        assert_eq!(post.method(), Method::POST);
    }

    #[tokio::test]
    async fn test_direct_request_with_pinned_certificate() {
        let (addr, cert_der) = https_server("HTTP/1.1 200 OK", "OK").await;
        let session = session(addr, ServerIdentity::Certificate(cert_der));

        let body = client("127.0.0.1:9".parse().unwrap())
            .attempt(&session, addr.port(), &RequestParameters::new("/status"), false)
            .await
            .unwrap();
        assert_eq!(body.as_ref(), b"OK");
    }

    #[tokio::test]
    async fn test_certificate_mismatch_fails() {
        let (addr, _) = https_server("HTTP/1.1 200 OK", "OK").await;
        let session = session(addr, ServerIdentity::Fingerprint([1; 32]));

        let err = client("127.0.0.1:9".parse().unwrap())
            .attempt(&session, addr.port(), &RequestParameters::new("/status"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Tls(_)));
    }

    #[tokio::test]
    async fn test_non_ok_status_fails() {
        let (addr, cert_der) = https_server("HTTP/1.1 503 Service Unavailable", "busy").await;
        let session = session(addr, ServerIdentity::Certificate(cert_der));

        let err = client("127.0.0.1:9".parse().unwrap())
            .attempt(&session, addr.port(), &RequestParameters::new("/status"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Request(_)));
    }

    #[tokio::test]
    async fn test_request_through_local_proxy() {
        let (addr, cert_der) = https_server("HTTP/1.1 200 OK", "tunnelled").await;
        let session = session(addr, ServerIdentity::Certificate(cert_der));

        let proxy = LocalProxy::bind("127.0.0.1:0".parse().unwrap(), Arc::new(DirectDialer))
            .await
            .unwrap()
            .spawn()
            .unwrap();

        let body = client(proxy.local_addr())
            .attempt(&session, addr.port(), &RequestParameters::new("/status"), true)
            .await
            .unwrap();
        assert_eq!(body.as_ref(), b"tunnelled");

        proxy.shutdown().await;
    }
}
