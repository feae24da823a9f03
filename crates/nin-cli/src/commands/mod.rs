//! CLI command definitions and handlers.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod config;
pub mod listen;
pub mod send;

/// Load configuration with graceful fallback to defaults.
///
/// A config file that exists but cannot be parsed is reported and ignored.
pub fn load_config() -> nin_core::config::Config {
    config::load_or_default(&nin_core::config::Config::config_path())
}

/// Print a failed command once, with its code and suggestion when the cause
/// is a transfer error.
pub fn report_failure(e: &anyhow::Error) {
    eprint!("{}", describe_failure(e));
}

fn describe_failure(e: &anyhow::Error) -> String {
    let core = e.downcast_ref::<nin_core::Error>();
    let mut out = String::from("\n");

    match core.and_then(nin_core::Error::code) {
        Some(code) => out.push_str(&format!("  Error [{code}]: {e:#}\n")),
        None => out.push_str(&format!("  Error: {e:#}\n")),
    }
    if let Some(suggestion) = core.and_then(nin_core::Error::suggestion) {
        out.push('\n');
        for line in suggestion.lines() {
            out.push_str(&format!("  {line}\n"));
        }
    } else if core.is_some_and(nin_core::Error::is_recoverable) {
        out.push_str("\n  This may be temporary. Try again.\n");
    }
    out.push('\n');
    out
}

/// nin - peer-to-peer file and directory transfer
#[derive(Parser)]
#[command(name = "nin")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Detailed logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Share a file or directory
    Send(SendArgs),

    /// Download from a sender
    Listen(ListenArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the send command
#[derive(Parser)]
pub struct SendArgs {
    /// File or directory to share
    pub path: PathBuf,

    /// Zip a directory and share the archive instead
    #[arg(short, long)]
    pub zip: bool,

    /// Where to write the archive (with --zip)
    #[arg(long)]
    pub archive_dir: Option<PathBuf>,

    /// Keep the archive after the sender stops
    #[arg(long)]
    pub keep_archive: bool,

    /// Maximum number of receivers served at once
    #[arg(short, long)]
    pub listeners: Option<usize>,

    /// Stop after this long without receivers (e.g., 30s, 5m)
    #[arg(short, long)]
    pub delay: Option<String>,

    /// TCP port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Do not advertise on the local network
    #[arg(long)]
    pub no_advertise: bool,
}

/// Arguments for the listen command
#[derive(Parser)]
pub struct ListenArgs {
    /// Sender address (IP or IP:PORT); discovered when omitted
    #[arg(short, long, env = "NIN_SENDER")]
    pub sender: Option<String>,

    /// Piece re-requests allowed before giving up
    #[arg(short, long)]
    pub max_retry: Option<u32>,

    /// Directory to save into
    #[arg(short = 'o', long)]
    pub path: Option<PathBuf>,

    /// Skip the final whole-file checksum
    #[arg(long)]
    pub no_verify: bool,

    /// Discovery window (e.g., 2s, 1500ms)
    #[arg(long)]
    pub scan_time: Option<String>,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Write the effective configuration to the config file
    Init,
}

/// Parse an optional `--sender` argument.
pub fn parse_sender(sender: Option<&str>) -> anyhow::Result<Option<SocketAddr>> {
    sender
        .map(nin_core::connection::parse_host_address)
        .transpose()
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_send_args() {
        let cli = Cli::try_parse_from([
            "nin", "send", "photos", "--zip", "--listeners", "2", "--delay", "30s",
        ])
        .expect("parse");

        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.path, PathBuf::from("photos"));
        assert!(args.zip);
        assert_eq!(args.listeners, Some(2));
        assert_eq!(args.delay.as_deref(), Some("30s"));
    }

    #[test]
    fn test_parse_listen_args() {
        let cli = Cli::try_parse_from([
            "nin", "-v", "listen", "--sender", "10.0.0.2:52600", "--max-retry", "0",
        ])
        .expect("parse");

        assert!(cli.verbose);
        let Command::Listen(args) = cli.command else {
            panic!("expected listen");
        };
        assert_eq!(args.max_retry, Some(0));
        let sender = parse_sender(args.sender.as_deref()).expect("address");
        assert_eq!(sender, Some("10.0.0.2:52600".parse().expect("addr")));
    }

    #[test]
    fn test_describe_failure_reports_once() {
        let e = anyhow::Error::from(nin_core::Error::NoPeerFound).context("transfer failed");
        let text = describe_failure(&e);

        assert_eq!(text.matches("no peer found").count(), 1);
        assert!(text.contains("Error [E001]: transfer failed: no peer found"));
        assert!(text.contains("nin listen --sender"));
    }

    #[test]
    fn test_describe_failure_transient_hint() {
        let e = anyhow::Error::from(nin_core::Error::PieceMismatch { index: 3 });
        assert!(describe_failure(&e).contains("Try again"));

        let e = anyhow::Error::from(nin_core::Error::Framing("short".into()));
        assert!(!describe_failure(&e).contains("Try again"));
    }

    #[test]
    fn test_describe_failure_plain_error() {
        let e = anyhow::anyhow!("invalid --delay");
        assert_eq!(describe_failure(&e), "\n  Error: invalid --delay\n\n");
    }

    #[test]
    fn test_parse_sender_rejects_garbage() {
        assert!(parse_sender(Some("nowhere")).is_err());
        assert!(parse_sender(None).expect("none").is_none());
    }
}
