//! Sender discovery on the local network.
//!
//! A sender advertises itself by repeatedly sending a small UDP datagram to
//! a multicast group; a receiver joins the group for a bounded time window,
//! collects advertisements, and validates each candidate with a `Ping`
//! before connecting to it.
//!
//! ## Protocol
//!
//! - IPv4 group: `239.255.255.250`, IPv6 group: `ff02::c`
//! - Port: 9999 (UDP)
//! - Sender advertisement: `hello` followed by the TCP port as text, e.g. `hello52600`
//! - Receiver query: `ok` (ignored by receivers that hear each other)

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::Arc;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Mutex};

use crate::connection;
use crate::error::{Error, Result};

/// Default IPv4 multicast group.
pub const DEFAULT_MULTICAST_V4: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// Default IPv6 multicast group.
pub const DEFAULT_MULTICAST_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x0c);

/// Default discovery port.
pub const DEFAULT_DISCOVERY_PORT: u16 = 9999;

/// Prefix of a sender's presence advertisement.
pub const ADVERTISEMENT_PREFIX: &[u8] = b"hello";

/// Payload a receiver sends while it listens.
pub const QUERY_PAYLOAD: &[u8] = b"ok";

/// Network-layer variant used for discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    /// IPv4 multicast
    V4,
    /// IPv6 multicast
    V6,
}

/// Discovery parameters.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    /// IPv4 multicast group
    pub multicast_v4: Ipv4Addr,
    /// IPv6 multicast group
    pub multicast_v6: Ipv6Addr,
    /// UDP port of the group
    pub port: u16,
    /// How long a receiver listens for advertisements
    pub time_limit: Duration,
    /// How often a sender re-sends its advertisement
    pub interval: Duration,
    /// Budget for the liveness probe against each candidate
    pub ping_timeout: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            multicast_v4: DEFAULT_MULTICAST_V4,
            multicast_v6: DEFAULT_MULTICAST_V6,
            port: DEFAULT_DISCOVERY_PORT,
            time_limit: Duration::from_secs(2),
            interval: Duration::from_secs(1),
            ping_timeout: Duration::from_millis(300),
        }
    }
}

impl DiscoverySettings {
    fn group(&self, version: IpVersion) -> SocketAddr {
        match version {
            IpVersion::V4 => SocketAddrV4::new(self.multicast_v4, self.port).into(),
            IpVersion::V6 => SocketAddrV6::new(self.multicast_v6, self.port, 0, 0).into(),
        }
    }
}

/// Build the advertisement payload for a sender listening on `port`.
#[must_use]
pub fn advertisement(port: u16) -> Vec<u8> {
    let mut payload = ADVERTISEMENT_PREFIX.to_vec();
    payload.extend_from_slice(port.to_string().as_bytes());
    payload
}

/// Extract the advertised port, if `payload` is a sender advertisement.
#[must_use]
pub fn parse_advertisement(payload: &[u8]) -> Option<u16> {
    let port = payload.strip_prefix(ADVERTISEMENT_PREFIX)?;
    std::str::from_utf8(port).ok()?.trim().parse().ok()
}

/// An advertisement heard on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    /// Address the datagram came from
    pub address: IpAddr,
    /// Raw advertised payload
    pub payload: Vec<u8>,
}

fn sending_socket(version: IpVersion) -> Result<UdpSocket> {
    let (domain, addr): (Domain, SocketAddr) = match version {
        IpVersion::V4 => (Domain::IPV4, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into()),
        IpVersion::V6 => (
            Domain::IPV6,
            SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0).into(),
        ),
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    match version {
        IpVersion::V4 => {
            socket.set_multicast_loop_v4(true)?;
            socket.set_multicast_ttl_v4(2)?;
        }
        IpVersion::V6 => socket.set_multicast_loop_v6(true)?,
    }
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

fn group_socket(settings: &DiscoverySettings, version: IpVersion) -> Result<UdpSocket> {
    let domain = match version {
        IpVersion::V4 => Domain::IPV4,
        IpVersion::V6 => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    match version {
        IpVersion::V4 => {
            let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, settings.port);
            socket.bind(&addr.into())?;
            socket.join_multicast_v4(&settings.multicast_v4, &Ipv4Addr::UNSPECIFIED)?;
            socket.set_multicast_loop_v4(true)?;
        }
        IpVersion::V6 => {
            socket.set_only_v6(true)?;
            let addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, settings.port, 0, 0);
            socket.bind(&addr.into())?;
            socket.join_multicast_v6(&settings.multicast_v6, 0)?;
            socket.set_multicast_loop_v6(true)?;
        }
    }

    socket.set_nonblocking(true)?;
    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

/// Periodically sends a presence advertisement to a multicast group.
#[derive(Debug)]
pub struct Broadcaster {
    /// UDP socket for sending
    socket: Arc<UdpSocket>,
    /// Multicast group and port
    target: SocketAddr,
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
    /// Whether broadcasting is active
    is_active: Arc<Mutex<bool>>,
}

impl Broadcaster {
    /// Create a broadcaster for one network-layer variant.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be created.
    pub fn new(settings: &DiscoverySettings, version: IpVersion) -> Result<Self> {
        let socket = sending_socket(version)?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            socket: Arc::new(socket),
            target: settings.group(version),
            shutdown_tx,
            is_active: Arc::new(Mutex::new(false)),
        })
    }

    /// Start advertising `payload` every `interval` until [`stop`](Self::stop).
    pub async fn start(&self, payload: Vec<u8>, interval: Duration) {
        let mut is_active = self.is_active.lock().await;
        if *is_active {
            return;
        }
        *is_active = true;
        drop(is_active);

        let socket = Arc::clone(&self.socket);
        let target = self.target;
        let is_active = Arc::clone(&self.is_active);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                if let Err(e) = socket.send_to(&payload, target).await {
                    tracing::debug!(%target, "Failed to send advertisement: {}", e);
                }

                tokio::select! {
                    () = tokio::time::sleep(interval) => {}
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Broadcaster received shutdown signal");
                        break;
                    }
                }
            }

            *is_active.lock().await = false;
        });
    }

    /// Stop advertising.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(());
        while *self.is_active.lock().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Check if currently advertising.
    pub async fn is_broadcasting(&self) -> bool {
        *self.is_active.lock().await
    }
}

/// Joins a multicast group and collects advertisements.
#[derive(Debug)]
pub struct Listener {
    socket: UdpSocket,
    group: SocketAddr,
}

impl Listener {
    /// Join the group for one network-layer variant.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound or the group joined.
    pub fn new(settings: &DiscoverySettings, version: IpVersion) -> Result<Self> {
        Ok(Self {
            socket: group_socket(settings, version)?,
            group: settings.group(version),
        })
    }

    /// Listen for up to `duration`, returning after `limit` advertisements
    /// (`None` for no limit). Advertisements are deduplicated by address.
    pub async fn scan(&self, duration: Duration, limit: Option<usize>) -> Vec<Discovered> {
        let deadline = Instant::now() + duration;
        let mut found: Vec<Discovered> = Vec::new();

        if let Err(e) = self.socket.send_to(QUERY_PAYLOAD, self.group).await {
            tracing::debug!(group = %self.group, "Failed to send discovery query: {}", e);
        }

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || limit.is_some_and(|l| found.len() >= l) {
                break;
            }

            let mut buf = [0u8; 1024];
            let result = tokio::time::timeout(remaining, self.socket.recv_from(&mut buf)).await;

            match result {
                Ok(Ok((len, source))) => {
                    let payload = &buf[..len];
                    if payload == QUERY_PAYLOAD {
                        continue;
                    }
                    if found.iter().any(|d| d.address == source.ip() && d.payload == payload) {
                        continue;
                    }
                    found.push(Discovered {
                        address: source.ip(),
                        payload: payload.to_vec(),
                    });
                }
                Ok(Err(e)) => {
                    tracing::warn!("Error receiving UDP packet: {}", e);
                }
                Err(_) => break,
            }
        }

        found
    }
}

/// Listen on both IPv4 and IPv6 groups for the configured time window.
///
/// # Errors
///
/// Returns an error only if neither variant could join its group.
pub async fn discover(settings: &DiscoverySettings) -> Result<Vec<Discovered>> {
    let scan = |version| async move {
        let listener = Listener::new(settings, version)?;
        Ok::<_, Error>(listener.scan(settings.time_limit, None).await)
    };

    let (v4, v6) = tokio::join!(scan(IpVersion::V4), scan(IpVersion::V6));

    match (v4, v6) {
        (Err(e), Err(e6)) => {
            tracing::warn!("IPv6 discovery unavailable: {}", e6);
            Err(e)
        }
        (v4, v6) => {
            let mut found = Vec::new();
            for (version, result) in [("IPv4", v4), ("IPv6", v6)] {
                match result {
                    Ok(mut discovered) => found.append(&mut discovered),
                    Err(e) => tracing::debug!("{} discovery unavailable: {}", version, e),
                }
            }
            Ok(found)
        }
    }
}

/// Find a responsive sender on the local network.
///
/// Candidates whose payload lacks the advertisement prefix are skipped; the
/// first one that answers a `Ping` wins.
///
/// # Errors
///
/// Returns [`Error::NoPeerFound`] if no candidate responds.
pub async fn find_sender(settings: &DiscoverySettings) -> Result<SocketAddr> {
    let discovered = discover(settings).await?;
    tracing::debug!(count = discovered.len(), "discovery finished");

    for candidate in discovered {
        let Some(port) = parse_advertisement(&candidate.payload) else {
            tracing::debug!(address = %candidate.address, "skipping non-sender advertisement");
            continue;
        };

        let addr = SocketAddr::new(candidate.address, port);
        match connection::ping(addr, settings.ping_timeout).await {
            Ok(()) => {
                tracing::info!(%addr, "found sender");
                return Ok(addr);
            }
            Err(e) => tracing::debug!(%addr, "candidate did not answer ping: {}", e),
        }
    }

    Err(Error::NoPeerFound)
}
