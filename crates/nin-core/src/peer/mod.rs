//! Sender and receiver peers.
//!
//! A peer is committed to one role when it is built: [`Sender::bind`]
//! prepares the manifest and the listening socket, [`Receiver::new`] holds
//! the options for one download. Both end in [`PeerState::Dead`], which is
//! terminal.
//!
//! ## Session
//!
//! ```text
//! Receiver                                   Sender
//!    |-------- ListenerSenderHandshake ------->|   (ignored at the listener limit)
//!    |<------- ListenerAcknowledgement --------|
//!    |-------- RequestMetadata --------------->|
//!    |<------- Metadata (manifest) ------------|
//!    |-------- RequestPiece(i) --------------->|   one request in flight,
//!    |<------- Piece(i, offset, bytes) --------|   re-requested on hash mismatch
//!    |                 ...                     |
//!    |-------- ListenerFinishedAcknowledgement>|
//! ```

mod receiver;
mod sender;

use std::fmt;

pub use receiver::{ReceiveSummary, Receiver, ReceiverOptions, TransferProgress};
pub use sender::{Sender, SenderOptions};

use crate::crypto;
use crate::error::{Error, Result};

/// Role a peer is committed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Serves a manifest and its pieces
    Sender,
    /// Downloads from a sender
    Receiver,
    /// Reserved for forwarding peers; nothing constructs it yet
    Relay,
    /// Shut down; cannot be reused
    Dead,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sender => "sender",
            Self::Receiver => "receiver",
            Self::Relay => "relay",
            Self::Dead => "dead",
        };
        f.write_str(name)
    }
}

/// Identifier of a peer, `"<role>_<10 hex chars>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(String);

impl PeerId {
    /// Generate a fresh identifier for a peer in `role`.
    pub fn new(role: PeerState) -> Self {
        Self(format!("{role}_{}", crypto::to_hex(&crypto::random_bytes::<5>())))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Run blocking file work on the blocking pool.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Internal(format!("blocking task failed: {e}")))?
}
