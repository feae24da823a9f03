//! # Nin Core Library
//!
//! `nin-core` implements a small peer-to-peer protocol for moving a file or
//! a whole directory tree from one sender to any number of receivers on a
//! local network.
//!
//! ## Features
//!
//! - **Piece-wise transfers**: content is split into fixed-size pieces, each
//!   verified against a SHA-1 digest from the manifest
//! - **Directory trees**: many files are addressed as one logical stream
//! - **Bounded retries**: corrupted pieces are re-requested within a budget
//! - **Self-terminating senders**: an idle sender shuts itself down
//! - **LAN discovery**: senders advertise on UDP multicast
//!
//! ## Modules
//!
//! - [`archive`] - Optional zip packaging of a source directory
//! - [`config`] - Configuration management
//! - [`connection`] - Address parsing, bounded connects and liveness probes
//! - [`crypto`] - Hashing and random identifiers
//! - [`discovery`] - Sender discovery via UDP multicast
//! - [`mod@file`] - Manifest generation and the virtual multi-file view
//! - [`peer`] - Sender and receiver state machines
//! - [`protocol`] - Wire framing and message payloads
//!
//! ## Example
//!
//! ```rust,ignore
//! use nin_core::peer::{Receiver, ReceiverOptions, Sender, SenderOptions};
//!
//! // Share a directory
//! let sender = Sender::bind(SenderOptions::new("photos")).await?;
//! tokio::spawn(sender.clone().serve());
//!
//! // On another machine, fetch it
//! let summary = Receiver::new(ReceiverOptions::default()).listen().await?;
//! println!("saved to {}", summary.output_path.display());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::unused_async)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

#[cfg(feature = "archive")]
pub mod archive;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod file;
pub mod peer;
pub mod protocol;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Nominal piece length (512 KiB)
pub const PIECE_LENGTH: u32 = 512 * 1024;

/// Default TCP port a sender listens on when one is not chosen
pub const DEFAULT_TRANSFER_PORT: u16 = 52600;

/// Default number of receivers a sender admits at once
pub const DEFAULT_LISTENER_LIMIT: usize = 4;

/// Default interval after which an unused sender shuts down
pub const DEFAULT_IDLE_SHUTDOWN_SECS: u64 = 60;

/// Default number of piece re-requests a receiver may spend
pub const DEFAULT_MAX_RETRIES: u32 = 4;

/// Default timeout for connects, handshakes and piece replies
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
