//! End-to-end: direct paths unreachable, request carried by a temporary
//! HTTP CONNECT tunnel to a self-signed HTTPS server.

use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tunnel_fallback::{
    AttemptOutcome, Config, HttpsRequestClient, NeverStop, RequestOrchestrator,
    RequestParameters, TransportRegistry,
};

/// Unroutable documentation address; every direct attempt fails
const SERVER_ADDRESS: &str = "192.0.2.1";

async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> Option<Vec<u8>> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte).await {
            Ok(0) | Err(_) => return None,
            Ok(_) => head.push(byte[0]),
        }
        if head.len() > 8192 {
            return None;
        }
    }
    Some(head)
}

async fn https_server() -> (SocketAddr, Vec<u8>) {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_der = cert.serialize_der().unwrap();
    let key_der = cert.serialize_private_key_der();

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(
            vec![rustls::pki_types::CertificateDer::from(cert_der.clone())],
            rustls::pki_types::PrivateKeyDer::Pkcs8(key_der.into()),
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
                let Some(head) = read_head(&mut tls).await else {
                    return;
                };
                let body = if head.starts_with(b"POST") {
                    "posted"
                } else {
                    "hello through the tunnel"
                };
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
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

/// Upstream CONNECT proxy that sends every tunnel to `target`
async fn upstream_proxy(target: SocketAddr) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut inbound, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Some(head) = read_head(&mut inbound).await else {
                    return;
                };
                if !head.starts_with(b"CONNECT ") {
                    let _ = inbound
                        .write_all(b"HTTP/1.1 405 Method Not Allowed\r\n\r\n")
                        .await;
                    return;
                }
                let Ok(mut outbound) = TcpStream::connect(target).await else {
                    return;
                };
                let _ = inbound
                    .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                    .await;
                let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
            });
        }
    });
    addr
}

async fn free_local_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

#[tokio::test]
async fn test_request_carried_by_temporary_http_tunnel() {
    let (server, cert_der) = https_server().await;
    let upstream = upstream_proxy(server).await;
    let local_proxy = free_local_addr().await;
    let fingerprint = hex::encode(Sha256::digest(&cert_der));

    let config = Config::from_str(&format!(
        r#"
connect-timeout: 1
request-timeout: 10
local-proxy: "{local_proxy}"
server:
  address: {SERVER_ADDRESS}
  web-port: 8443
  web-server-certificate: "sha256:{fingerprint}"
  capabilities: [HTTP]
transports:
  - name: needs-handshake
    type: socks5
    server: 127.0.0.1
    port: 9
  - name: corp-http
    type: http
    server: 127.0.0.1
    port: {upstream_port}
"#,
        upstream_port = upstream.port()
    ))
    .unwrap();

    let session = config.session_info().unwrap();
    let registry = TransportRegistry::new(
        &config.transports,
        config.local_proxy_addr().unwrap(),
        config.connect_timeout(),
    )
    .unwrap();
    let client = HttpsRequestClient::new(
        config.local_proxy_addr().unwrap(),
        config.connect_timeout(),
        config.request_timeout(),
    );
    let orchestrator = RequestOrchestrator::new(Arc::new(client), Arc::new(registry));

    let outcome = orchestrator
        .make_request(
            true,
            None,
            &session,
            &RequestParameters::new("/status"),
            &NeverStop,
        )
        .await
        .unwrap();
    match outcome {
        AttemptOutcome::Success(body) => assert_eq!(body.as_ref(), b"hello through the tunnel"),
        other => panic!("expected success, got {:?}", other),
    }

    // The temporary tunnel released its local proxy
    let rebound = TcpListener::bind(local_proxy).await;
    assert!(rebound.is_ok());
    drop(rebound);

    let outcome = orchestrator
        .make_request(
            true,
            None,
            &session,
            &RequestParameters::new("/submit").with_body("payload"),
            &NeverStop,
        )
        .await
        .unwrap();
    match outcome {
        AttemptOutcome::Success(body) => assert_eq!(body.as_ref(), b"posted"),
        other => panic!("expected success, got {:?}", other),
    }
}
