//! Loopback HTTP CONNECT proxy exposed by a connected tunnel
//!
//! Only CONNECT is served. Every accepted stream is dialed through the
//! tunnel's upstream and relayed until either side closes or the proxy is
//! shut down.

use super::UpstreamDialer;
use crate::common::net::{find_header_end, MAX_HEAD_SIZE};
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Local proxy listener bound to one tunnel's upstream
pub struct LocalProxy {
    listener: TcpListener,
    dialer: Arc<dyn UpstreamDialer>,
}

impl LocalProxy {
    /// Bind the listener. Port 0 picks an ephemeral port.
    pub async fn bind(addr: SocketAddr, dialer: Arc<dyn UpstreamDialer>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            Error::connection(format!("Failed to bind local proxy on {}: {}", addr, e))
        })?;
        Ok(LocalProxy { listener, dialer })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the accept loop on a background task
    pub fn spawn(self) -> Result<LocalProxyHandle> {
        let local_addr = self.local_addr()?;
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let task = tokio::spawn(async move { self.accept_loop(token).await });

        info!("Local proxy listening on {}", local_addr);
        Ok(LocalProxyHandle {
            local_addr,
            shutdown,
            task,
        })
    }

    async fn accept_loop(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            stream.set_nodelay(true).ok();
                            let dialer = self.dialer.clone();
                            let token = shutdown.child_token();
                            tokio::spawn(async move {
                                tokio::select! {
                                    _ = token.cancelled() => {}
                                    result = handle_connection(dialer, stream) => {
                                        if let Err(e) = result {
                                            debug!("Local proxy connection from {} ended: {}", peer_addr, e);
                                        }
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            warn!("Local proxy accept error: {}", e);
                        }
                    }
                }
            }
        }
    }
}

/// Running local proxy
pub struct LocalProxyHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl LocalProxyHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, drop every relayed stream, and wait for the listener
    /// to be released
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Err(e) = (&mut self.task).await {
            warn!("Local proxy task on {} failed: {}", self.local_addr, e);
        }
        info!("Local proxy on {} stopped", self.local_addr);
    }
}

impl Drop for LocalProxyHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn handle_connection(dialer: Arc<dyn UpstreamDialer>, mut stream: TcpStream) -> Result<()> {
    let mut buf = vec![0u8; MAX_HEAD_SIZE];
    let mut filled = 0;
    let head_end = loop {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(Error::protocol("Connection closed before request head"));
        }
        filled += n;
        if let Some(end) = find_header_end(&buf[..filled]) {
            break end;
        }
        if filled == buf.len() {
            stream
                .write_all(b"HTTP/1.1 431 Request Header Fields Too Large\r\nConnection: close\r\n\r\n")
                .await?;
            return Err(Error::protocol("Request head too large"));
        }
    };

    let (method, target) = {
        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut request = httparse::Request::new(&mut headers);
        request
            .parse(&buf[..head_end])
            .map_err(|e| Error::protocol(format!("Malformed request: {}", e)))?;
        (
            request.method.unwrap_or_default().to_string(),
            request.path.unwrap_or_default().to_string(),
        )
    };

    if method != "CONNECT" {
        stream
            .write_all(b"HTTP/1.1 405 Method Not Allowed\r\nAllow: CONNECT\r\nConnection: close\r\n\r\n")
            .await?;
        return Err(Error::protocol(format!("Unsupported method {}", method)));
    }

    let (host, port) = parse_host_port(&target)?;
    debug!("Local proxy CONNECT {}:{} via {}", host, port, dialer.server());

    let mut remote = match dialer.dial(&host, port).await {
        Ok(remote) => remote,
        Err(e) => {
            let response = format!(
                "HTTP/1.1 502 Bad Gateway\r\n\
                 Content-Type: text/plain\r\n\
                 Connection: close\r\n\r\n\
                 Connection failed: {}",
                e
            );
            stream.write_all(response.as_bytes()).await?;
            return Err(e);
        }
    };

    stream
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await?;

    // Client may pipeline its first bytes right after the head
    if filled > head_end {
        remote.write_all(&buf[head_end..filled]).await?;
    }

    let (sent, received) = tokio::io::copy_bidirectional(&mut stream, &mut remote).await?;
    debug!(
        "Local proxy CONNECT {}:{} completed (sent: {}, received: {})",
        host, port, sent, received
    );
    Ok(())
}

/// Parse `host:port` from a CONNECT authority, accepting bracketed IPv6
fn parse_host_port(authority: &str) -> Result<(String, u16)> {
    let (host, port) = authority
        .rsplit_once(':')
        .ok_or_else(|| Error::protocol(format!("Missing port in {}", authority)))?;
    let port: u16 = port
        .parse()
        .map_err(|_| Error::protocol(format!("Invalid port in {}", authority)))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(Error::protocol(format!("Missing host in {}", authority)));
    }
    Ok((host.to_string(), port))
}
