//! Connection utilities for direct peer connections.
//!
//! This module provides address parsing for `--sender` style arguments, a
//! bounded TCP connect, keep-alive configuration, and the `Ping`/`Pong`
//! liveness probe used to validate discovered senders.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::protocol::{self, Message, MessageCode};
use crate::DEFAULT_TRANSFER_PORT;

/// Parse a host address string into a `SocketAddr`.
///
/// Accepts formats:
/// - `IP` (e.g., `192.168.1.100`) - uses the default transfer port
/// - `IP:PORT` (e.g., `192.168.1.100:52540`) - uses specified port
/// - `[IPv6]` (e.g., `[::1]`) - uses the default transfer port
/// - `[IPv6]:PORT` (e.g., `[::1]:52540`) - uses specified port
///
/// # Examples
///
/// ```
/// use nin_core::connection::parse_host_address;
///
/// let addr = parse_host_address("192.168.1.100:52540").unwrap();
/// assert_eq!(addr.port(), 52540);
/// ```
///
/// # Errors
///
/// Returns an error if the host string cannot be parsed.
pub fn parse_host_address(host: &str) -> Result<SocketAddr> {
    let host = host.trim();

    if let Ok(addr) = host.parse::<SocketAddr>() {
        return Ok(addr);
    }

    let invalid = || {
        Error::InvalidInput(format!(
            "Invalid host format '{host}'. Use IP or IP:PORT (e.g., 192.168.1.100 or 192.168.1.100:{DEFAULT_TRANSFER_PORT})"
        ))
    };

    if let Some(ip_str) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        let ip: IpAddr = ip_str.parse().map_err(|_| invalid())?;
        return Ok(SocketAddr::new(ip, DEFAULT_TRANSFER_PORT));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_TRANSFER_PORT));
    }

    if let Some((ip_part, port_part)) = host.rsplit_once(':') {
        if !ip_part.contains(':') {
            let ip: IpAddr = ip_part.parse().map_err(|_| invalid())?;
            let port: u16 = port_part.parse().map_err(|_| {
                Error::InvalidInput(format!(
                    "Invalid port '{port_part}'. Port must be a number between 1 and 65535"
                ))
            })?;
            return Ok(SocketAddr::new(ip, port));
        }
    }

    Err(invalid())
}

/// Connect to a peer, failing with [`Error::Timeout`] after `timeout`.
pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::Timeout(timeout.as_secs()))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Configure TCP keep-alive on a stream.
///
/// Configuration:
/// - Start probing after 10 seconds of idle time
/// - Send probes every 5 seconds
pub fn configure_tcp_keepalive(stream: &TcpStream) -> Result<()> {
    let socket_ref = SockRef::from(stream);

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(10))
        .with_interval(Duration::from_secs(5));

    socket_ref
        .set_tcp_keepalive(&keepalive)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    tracing::debug!("TCP keep-alive enabled on socket");
    Ok(())
}

/// Check that a sender is alive: connect, send `Ping`, expect `Pong`.
///
/// The whole exchange is bounded by `timeout`.
pub async fn ping(addr: SocketAddr, timeout: Duration) -> Result<()> {
    tracing::debug!(%addr, "pinging");

    let exchange = async {
        let mut stream = TcpStream::connect(addr).await?;
        protocol::write_message(&mut stream, &Message::empty(MessageCode::Ping)).await?;
        protocol::expect_message(&mut stream, MessageCode::Pong, timeout).await?;
        Ok::<_, Error>(())
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| Error::Timeout(timeout.as_secs()))?
}
