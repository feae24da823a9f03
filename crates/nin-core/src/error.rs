//! Error types for nin.
//!
//! This module provides a unified error type for all nin operations,
//! with specific error variants for different failure modes.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for nin operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for nin.
#[derive(Error, Debug)]
pub enum Error {
    /// No responsive sender found on the network (E001)
    #[error("no peer found on the network")]
    NoPeerFound,

    /// Unable to broadcast presence on the network (E002)
    #[error("unable to broadcast on network: {0}")]
    BroadcastFailed(String),

    /// The remote end closed the connection (E005)
    #[error("connection closed by remote peer")]
    ConnectionClosed,

    /// A received piece did not match its manifest hash (E006)
    #[error("piece {index} failed hash verification")]
    PieceMismatch {
        /// Piece index
        index: u32,
    },

    /// A piece kept failing verification after every allowed retry (E006)
    #[error("piece {index} failed hash verification with no retries left (max {max_retries})")]
    RetriesExhausted {
        /// Piece index that exhausted the budget
        index: u32,
        /// Configured retry budget
        max_retries: u32,
    },

    /// Reassembled output does not match the manifest checksum (E006)
    #[error("checksum mismatch for '{0}'")]
    ChecksumMismatch(String),

    /// Cannot read file: permission denied (E007)
    #[error("cannot read file '{0}': permission denied")]
    PermissionDenied(String),

    /// File not found
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Invalid path
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Archive source is not a directory
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Source contains no transferable bytes
    #[error("nothing to send: '{0}' contains no non-empty files")]
    EmptySource(String),

    /// Truncated or malformed frame
    #[error("framing error: {0}")]
    Framing(String),

    /// Invalid protocol message
    #[error("invalid protocol message: {0}")]
    ProtocolError(String),

    /// Message code outside the known set
    #[error("unknown message code: {0}")]
    UnknownMessageCode(i8),

    /// Unexpected message type
    #[error("unexpected message type: expected {expected}, got {actual}")]
    UnexpectedMessage {
        /// Expected message type
        expected: String,
        /// Actual message type received
        actual: String,
    },

    /// Peer already reached its terminal state
    #[error("peer is dead and cannot be reused")]
    PeerDead,

    /// `serve` was called on a sender that is already serving
    #[error("sender is already serving")]
    AlreadyServing,

    /// Invalid user input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Archive packaging failed
    #[error("archive error: {0}")]
    ArchiveError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),

    /// Operation timeout
    #[error("operation timed out after {0} seconds")]
    Timeout(u64),
}

impl Error {
    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern EXXX where XXX is a 3-digit number.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::NoPeerFound => Some("E001"),
            Self::BroadcastFailed(_) => Some("E002"),
            Self::ConnectionClosed => Some("E005"),
            Self::PieceMismatch { .. }
            | Self::RetriesExhausted { .. }
            | Self::ChecksumMismatch(_) => Some("E006"),
            Self::PermissionDenied(_) => Some("E007"),
            _ => None,
        }
    }

    /// Returns whether this error is transient, so the same operation may
    /// succeed when tried again.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::PieceMismatch { .. } | Self::Timeout(_))
    }

    /// Returns a helpful suggestion for resolving the error, if applicable.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NoPeerFound => Some(
                "Make sure the sender is running on the same network.\n\
                 Or connect directly: nin listen --sender <IP:PORT>",
            ),
            Self::RetriesExhausted { .. } => Some(
                "The connection corrupted data repeatedly. Try again with a larger budget:\n\
                   nin listen --max-retry 8",
            ),
            Self::Timeout(_) => Some(
                "The sender may be at its listener limit. Wait for another receiver\n\
                 to finish, or ask the sender to raise --listeners.",
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_errors_share_code() {
        assert_eq!(Error::PieceMismatch { index: 1 }.code(), Some("E006"));
        assert_eq!(
            Error::RetriesExhausted {
                index: 1,
                max_retries: 0
            }
            .code(),
            Some("E006")
        );
        assert_eq!(Error::ChecksumMismatch("a".into()).code(), Some("E006"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::PieceMismatch { index: 0 }.is_recoverable());
        assert!(Error::Timeout(30).is_recoverable());
        assert!(!Error::RetriesExhausted {
            index: 0,
            max_retries: 4
        }
        .is_recoverable());
        assert!(!Error::Framing("short".into()).is_recoverable());
    }

    #[test]
    fn test_io_conversion() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
