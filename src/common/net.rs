//! Network utilities

use crate::{Error, Result};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Upper bound for an HTTP response head we are willing to buffer
pub const MAX_HEAD_SIZE: usize = 8192;

/// Byte stream carried through a tunnel
pub trait ProxyConnection: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Sync + Unpin> ProxyConnection for T {}

/// Open a TCP connection bounded by `connect_timeout`
pub async fn connect_tcp(addr: &str, connect_timeout: Duration) -> Result<TcpStream> {
    let stream = timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::timeout(format!("Connecting to {} timed out", addr)))?
        .map_err(|e| Error::connection(format!("Failed to connect to {}: {}", addr, e)))?;
    stream.set_nodelay(true).ok();
    Ok(stream)
}

/// Find end of HTTP headers (double CRLF)
pub fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Format `host:port`, bracketing IPv6 literals
pub fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Perform an HTTP CONNECT handshake on `stream` towards `host:port`.
///
/// Reads exactly the response head so no tunnelled bytes are consumed.
pub async fn http_connect<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    host: &str,
    port: u16,
    authorization: Option<&str>,
) -> Result<()> {
    let target = host_port(host, port);
    let mut request = format!(
        "CONNECT {target} HTTP/1.1\r\n\
         Host: {target}\r\n\
         Proxy-Connection: keep-alive\r\n"
    );
    if let Some(auth) = authorization {
        request.push_str(&format!("Proxy-Authorization: {}\r\n", auth));
    }
    request.push_str("\r\n");

    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| Error::connection(format!("Failed to send CONNECT request: {}", e)))?;
    stream.flush().await?;

    // Byte-at-a-time so the TLS handshake that follows starts on a clean stream
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    loop {
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| Error::connection(format!("Failed to read CONNECT response: {}", e)))?;
        if n == 0 {
            return Err(Error::connection("Connection closed during CONNECT"));
        }
        head.push(byte[0]);
        if head.ends_with(b"\r\n\r\n") {
            break;
        }
        if head.len() >= MAX_HEAD_SIZE {
            return Err(Error::connection("CONNECT response too large"));
        }
    }

    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut response = httparse::Response::new(&mut headers);
    response
        .parse(&head)
        .map_err(|e| Error::protocol(format!("Malformed CONNECT response: {}", e)))?;

    match response.code {
        Some(200) => {
            debug!("CONNECT to {} established", target);
            Ok(())
        }
        Some(407) => Err(Error::auth("Proxy authentication required")),
        Some(code) => Err(Error::connection(format!(
            "CONNECT to {} failed with status {}",
            target, code
        ))),
        None => Err(Error::protocol("CONNECT response without status")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_header_end() {
        assert_eq!(find_header_end(b"HTTP/1.1 200 OK\r\n\r\n"), Some(19));
        assert_eq!(
            find_header_end(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
            Some(38)
        );
        assert_eq!(find_header_end(b"incomplete"), None);
    }

    #[test]
    fn test_host_port() {
        assert_eq!(host_port("203.0.113.1", 8080), "203.0.113.1:8080");
        assert_eq!(host_port("2001:db8::1", 443), "[2001:db8::1]:443");
        assert_eq!(host_port("[2001:db8::1]", 443), "[2001:db8::1]:443");
    }

    #[tokio::test]
    async fn test_http_connect_success_leaves_payload() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let server_task = tokio::spawn(async move {
            let mut buf = vec![0u8; 512];
            let mut read = 0;
            loop {
                let n = server.read(&mut buf[read..]).await.unwrap();
                read += n;
                if find_header_end(&buf[..read]).is_some() {
                    break;
                }
            }
            let request = String::from_utf8_lossy(&buf[..read]).to_string();
            server
                .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\npayload")
                .await
                .unwrap();
            request
        });

        http_connect(&mut client, "192.0.2.10", 8080, None).await.unwrap();

        let mut rest = [0u8; 7];
        client.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"payload");

        let request = server_task.await.unwrap();
        assert!(request.starts_with("CONNECT 192.0.2.10:8080 HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn test_http_connect_rejected() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let _ = server.read(&mut buf).await;
            let _ = server
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await;
        });

        let err = http_connect(&mut client, "192.0.2.10", 443, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }
}
