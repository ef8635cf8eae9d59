//! SOCKS5 upstream
//!
//! Implements the client side of RFC 1928 (CONNECT only) with RFC 1929
//! username/password authentication.

use super::UpstreamDialer;
use crate::common::net::{self, ProxyConnection};
use crate::{Error, Result};
use async_trait::async_trait;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

const SOCKS5_VERSION: u8 = 0x05;

const AUTH_NONE: u8 = 0x00;
const AUTH_PASSWORD: u8 = 0x02;
const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REP_SUCCESS: u8 = 0x00;
const REP_GENERAL_FAILURE: u8 = 0x01;
const REP_CONNECTION_NOT_ALLOWED: u8 = 0x02;
const REP_NETWORK_UNREACHABLE: u8 = 0x03;
const REP_HOST_UNREACHABLE: u8 = 0x04;
const REP_CONNECTION_REFUSED: u8 = 0x05;
const REP_TTL_EXPIRED: u8 = 0x06;
const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REP_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Dialer for an upstream SOCKS5 proxy
pub struct Socks5Dialer {
    name: String,
    server: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    connect_timeout: Duration,
}

impl Socks5Dialer {
    pub fn new(
        name: String,
        server: String,
        port: u16,
        username: Option<String>,
        password: Option<String>,
        connect_timeout: Duration,
    ) -> Self {
        Socks5Dialer {
            name,
            server,
            port,
            username,
            password,
            connect_timeout,
        }
    }

    /// Perform SOCKS5 negotiation and CONNECT
    async fn socks5_connect<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        stream: &mut S,
        host: &str,
        port: u16,
    ) -> Result<()> {
        let greeting: &[u8] = if self.username.is_some() && self.password.is_some() {
            &[SOCKS5_VERSION, 2, AUTH_NONE, AUTH_PASSWORD]
        } else {
            &[SOCKS5_VERSION, 1, AUTH_NONE]
        };
        stream.write_all(greeting).await.map_err(|e| {
            Error::connection(format!("Failed to send SOCKS5 greeting: {}", e))
        })?;

        let mut choice = [0u8; 2];
        stream.read_exact(&mut choice).await.map_err(|e| {
            Error::connection(format!("Failed to read SOCKS5 response: {}", e))
        })?;
        if choice[0] != SOCKS5_VERSION {
            return Err(Error::protocol("Invalid SOCKS5 version"));
        }

        match choice[1] {
            AUTH_NONE => {}
            AUTH_PASSWORD => self.authenticate_password(stream).await?,
            AUTH_NO_ACCEPTABLE => {
                return Err(Error::auth("No acceptable authentication method"));
            }
            other => {
                return Err(Error::protocol(format!(
                    "Unsupported authentication method: {}",
                    other
                )));
            }
        }

        stream.write_all(&encode_connect_request(host, port)?).await.map_err(|e| {
            Error::connection(format!("Failed to send SOCKS5 connect request: {}", e))
        })?;

        let mut reply = [0u8; 4];
        stream.read_exact(&mut reply).await.map_err(|e| {
            Error::connection(format!("Failed to read SOCKS5 reply: {}", e))
        })?;
        if reply[0] != SOCKS5_VERSION {
            return Err(Error::protocol("Invalid SOCKS5 version in reply"));
        }
        if reply[1] != REP_SUCCESS {
            return Err(Error::connection(reply_error_message(reply[1])));
        }

        // Bound address is not needed; drain it
        let skip = match reply[3] {
            ATYP_IPV4 => 4 + 2,
            ATYP_IPV6 => 16 + 2,
            ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                stream.read_exact(&mut len).await?;
                len[0] as usize + 2
            }
            _ => return Err(Error::protocol("Invalid address type in reply")),
        };
        let mut bound = vec![0u8; skip];
        stream.read_exact(&mut bound).await?;

        Ok(())
    }

    async fn authenticate_password<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        stream: &mut S,
    ) -> Result<()> {
        let (Some(username), Some(password)) = (&self.username, &self.password) else {
            return Err(Error::auth("Credentials required for authentication"));
        };
        if username.len() > 255 || password.len() > 255 {
            return Err(Error::auth("Username or password too long"));
        }

        let mut request = vec![0x01];
        request.push(username.len() as u8);
        request.extend_from_slice(username.as_bytes());
        request.push(password.len() as u8);
        request.extend_from_slice(password.as_bytes());
        stream.write_all(&request).await?;

        let mut response = [0u8; 2];
        stream.read_exact(&mut response).await?;
        if response[1] != 0x00 {
            return Err(Error::auth("Authentication failed"));
        }

        debug!("[{}] Password authentication successful", self.name);
        Ok(())
    }
}

fn encode_connect_request(host: &str, port: u16) -> Result<Vec<u8>> {
    let mut request = vec![SOCKS5_VERSION, CMD_CONNECT, 0x00];
    let bare = host.trim_start_matches('[').trim_end_matches(']');

    if let Ok(ip) = bare.parse::<Ipv4Addr>() {
        request.push(ATYP_IPV4);
        request.extend_from_slice(&ip.octets());
    } else if let Ok(ip) = bare.parse::<Ipv6Addr>() {
        request.push(ATYP_IPV6);
        request.extend_from_slice(&ip.octets());
    } else {
        if host.len() > 255 {
            return Err(Error::connection("Domain name too long"));
        }
        request.push(ATYP_DOMAIN);
        request.push(host.len() as u8);
        request.extend_from_slice(host.as_bytes());
    }

    request.extend_from_slice(&port.to_be_bytes());
    Ok(request)
}

fn reply_error_message(code: u8) -> String {
    match code {
        REP_GENERAL_FAILURE => "General SOCKS server failure".to_string(),
        REP_CONNECTION_NOT_ALLOWED => "Connection not allowed by ruleset".to_string(),
        REP_NETWORK_UNREACHABLE => "Network unreachable".to_string(),
        REP_HOST_UNREACHABLE => "Host unreachable".to_string(),
        REP_CONNECTION_REFUSED => "Connection refused".to_string(),
        REP_TTL_EXPIRED => "TTL expired".to_string(),
        REP_COMMAND_NOT_SUPPORTED => "Command not supported".to_string(),
        REP_ADDRESS_TYPE_NOT_SUPPORTED => "Address type not supported".to_string(),
        _ => format!("Unknown error: {}", code),
    }
}

#[async_trait]
impl UpstreamDialer for Socks5Dialer {
    fn server(&self) -> String {
        net::host_port(&self.server, self.port)
    }

    async fn probe(&self) -> Result<()> {
        net::connect_tcp(&self.server(), self.connect_timeout).await?;
        Ok(())
    }

    async fn dial(&self, host: &str, port: u16) -> Result<Box<dyn ProxyConnection>> {
        debug!(
            "[{}] SOCKS5 proxy connecting to {}:{} via {}",
            self.name,
            host,
            port,
            self.server()
        );

        let mut stream = net::connect_tcp(&self.server(), self.connect_timeout).await?;
        self.socks5_connect(&mut stream, host, port).await?;

        debug!("[{}] SOCKS5 connected to {}:{}", self.name, host, port);
        Ok(Box::new(stream))
    }
}
