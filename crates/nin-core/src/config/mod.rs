//! Configuration management for nin.
//!
//! This module handles loading, saving, and turning the configuration file
//! into runtime options for senders and receivers.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/nin/config.toml` |
//! | macOS | `~/Library/Application Support/com.nin.nin/config.toml` |
//! | Windows | `%APPDATA%\nin\nin\config\config.toml` |
//!
//! ## Example
//!
//! ```toml
//! [sender]
//! listener_limit = 8
//! idle_shutdown = "5m"
//!
//! [receiver]
//! max_retries = 2
//! download_dir = "/home/me/Downloads"
//!
//! [discovery]
//! time_limit = "1500ms"
//! ```

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discovery::DiscoverySettings;
use crate::error::{Error, Result};
use crate::peer::{ReceiverOptions, SenderOptions};

/// Main configuration struct for nin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sender settings
    pub sender: SenderConfig,
    /// Receiver settings
    pub receiver: ReceiverConfig,
    /// Discovery settings
    pub discovery: DiscoveryConfig,
}

/// Sender configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Maximum number of receivers served at once
    pub listener_limit: usize,
    /// Shut down after this long without any receiver
    #[serde(with = "humantime_serde")]
    pub idle_shutdown: Duration,
    /// Address to bind the transfer socket on
    pub bind_addr: IpAddr,
    /// TCP port (0 lets the OS pick one)
    pub port: u16,
    /// Advertise presence on the local network
    pub advertise: bool,
    /// Where directory archives are written
    pub archive_dir: Option<PathBuf>,
    /// Remove the archive once the sender shuts down
    pub delete_archive: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            listener_limit: crate::DEFAULT_LISTENER_LIMIT,
            idle_shutdown: Duration::from_secs(crate::DEFAULT_IDLE_SHUTDOWN_SECS),
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            advertise: true,
            archive_dir: None,
            delete_archive: true,
        }
    }
}

/// Receiver configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Connect to this sender instead of discovering one
    pub sender: Option<SocketAddr>,
    /// Number of piece re-requests allowed per transfer
    pub max_retries: u32,
    /// Directory received content is written under
    pub download_dir: PathBuf,
    /// Recompute the whole-stream checksum after the last piece
    pub verify_checksum: bool,
    /// TCP connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Wait for the sender's acknowledgement at most this long
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    /// Deadline for each piece round trip
    #[serde(with = "humantime_serde")]
    pub piece_timeout: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        let timeout = Duration::from_secs(crate::DEFAULT_TIMEOUT_SECS);
        Self {
            sender: None,
            max_retries: crate::DEFAULT_MAX_RETRIES,
            download_dir: PathBuf::from("."),
            verify_checksum: true,
            connect_timeout: timeout,
            handshake_timeout: timeout,
            piece_timeout: timeout,
        }
    }
}

/// Discovery configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// IPv4 multicast group
    pub multicast_v4: Ipv4Addr,
    /// IPv6 multicast group
    pub multicast_v6: Ipv6Addr,
    /// UDP port of the group
    pub port: u16,
    /// Listening window for receivers
    #[serde(with = "humantime_serde")]
    pub time_limit: Duration,
    /// Advertisement interval for senders
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Budget for probing each candidate
    #[serde(with = "humantime_serde")]
    pub ping_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoverySettings::default().into()
    }
}

impl From<DiscoverySettings> for DiscoveryConfig {
    fn from(settings: DiscoverySettings) -> Self {
        Self {
            multicast_v4: settings.multicast_v4,
            multicast_v6: settings.multicast_v6,
            port: settings.port,
            time_limit: settings.time_limit,
            interval: settings.interval,
            ping_timeout: settings.ping_timeout,
        }
    }
}

impl From<&DiscoveryConfig> for DiscoverySettings {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            multicast_v4: config.multicast_v4,
            multicast_v6: config.multicast_v6,
            port: config.port,
            time_limit: config.time_limit,
            interval: config.interval,
            ping_timeout: config.ping_timeout,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file, falling back to defaults if
    /// it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a specific file, creating its directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "nin", "nin")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Sender options for sharing `path`.
    pub fn sender_options(&self, path: impl Into<PathBuf>) -> SenderOptions {
        let mut options = SenderOptions::new(path);
        options.listener_limit = self.sender.listener_limit;
        options.idle_shutdown = self.sender.idle_shutdown;
        options.bind_addr = self.sender.bind_addr;
        options.port = self.sender.port;
        options.advertise = self.sender.advertise;
        options.delete_archive = self.sender.delete_archive;
        if let Some(dir) = &self.sender.archive_dir {
            options.archive_dir.clone_from(dir);
        }
        options.discovery = DiscoverySettings::from(&self.discovery);
        options
    }

    /// Receiver options.
    pub fn receiver_options(&self) -> ReceiverOptions {
        ReceiverOptions {
            sender: self.receiver.sender,
            max_retries: self.receiver.max_retries,
            download_dir: self.receiver.download_dir.clone(),
            verify_checksum: self.receiver.verify_checksum,
            connect_timeout: self.receiver.connect_timeout,
            handshake_timeout: self.receiver.handshake_timeout,
            piece_timeout: self.receiver.piece_timeout,
            discovery: DiscoverySettings::from(&self.discovery),
        }
    }
}

/// Serde support for durations written as `"1500ms"`, `"60s"` or `"5m"`.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Parse a duration like `"1500ms"`, `"60s"` or `"5m"`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for anything else.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let invalid = || Error::InvalidInput(format!("invalid duration '{s}', use e.g. 500ms, 60s or 5m"));

    if let Some(ms) = s.strip_suffix("ms") {
        return ms.parse().map(Duration::from_millis).map_err(|_| invalid());
    }
    if let Some(secs) = s.strip_suffix('s') {
        return secs.parse().map(Duration::from_secs).map_err(|_| invalid());
    }
    if let Some(mins) = s.strip_suffix('m') {
        return mins
            .parse::<u64>()
            .map(|m| Duration::from_secs(m * 60))
            .map_err(|_| invalid());
    }

    Err(invalid())
}
