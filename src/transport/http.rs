//! HTTP CONNECT upstream
//!
//! Tunnels TCP streams through an HTTP proxy server with the CONNECT method.

use super::UpstreamDialer;
use crate::common::net::{self, ProxyConnection};
use crate::Result;
use async_trait::async_trait;
use base64::Engine;
use std::time::Duration;
use tracing::debug;

/// Dialer for an upstream HTTP proxy
pub struct HttpConnectDialer {
    name: String,
    server: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    connect_timeout: Duration,
}

impl HttpConnectDialer {
    pub fn new(
        name: String,
        server: String,
        port: u16,
        username: Option<String>,
        password: Option<String>,
        connect_timeout: Duration,
    ) -> Self {
        HttpConnectDialer {
            name,
            server,
            port,
            username,
            password,
            connect_timeout,
        }
    }

    /// Build the Proxy-Authorization header value
    fn auth_header(&self) -> Option<String> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => {
                let credentials = format!("{}:{}", user, pass);
                let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
                Some(format!("Basic {}", encoded))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl UpstreamDialer for HttpConnectDialer {
    fn server(&self) -> String {
        net::host_port(&self.server, self.port)
    }

    async fn probe(&self) -> Result<()> {
        net::connect_tcp(&self.server(), self.connect_timeout).await?;
        Ok(())
    }

    async fn dial(&self, host: &str, port: u16) -> Result<Box<dyn ProxyConnection>> {
        debug!(
            "[{}] HTTP proxy connecting to {}:{} via {}",
            self.name,
            host,
            port,
            self.server()
        );

        let mut stream = net::connect_tcp(&self.server(), self.connect_timeout).await?;
        let auth = self.auth_header();
        net::http_connect(&mut stream, host, port, auth.as_deref()).await?;

        debug!("[{}] HTTP proxy connected to {}:{}", self.name, host, port);
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialer(username: Option<&str>, password: Option<&str>) -> HttpConnectDialer {
        HttpConnectDialer::new(
            "corp".to_string(),
            "proxy.example.net".to_string(),
            3128,
            username.map(String::from),
            password.map(String::from),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_auth_header_none() {
        assert!(dialer(None, None).auth_header().is_none());
        assert!(dialer(Some("user"), None).auth_header().is_none());
    }

    #[test]
    fn test_auth_header_with_creds() {
        let auth = dialer(Some("user"), Some("pass")).auth_header().unwrap();
        assert_eq!(auth, "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn test_server_address() {
        assert_eq!(dialer(None, None).server(), "proxy.example.net:3128");
    }
}
