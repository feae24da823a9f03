//! Hashing and randomness primitives.
//!
//! This module provides:
//! - SHA-1 digests for piece and whole-file integrity
//! - An incremental hasher for checksumming a stream in pieces
//! - Random bytes and hex encoding for peer identities
//!
//! SHA-1 is used as a content digest against accidental corruption, not as
//! an authentication primitive; the channel is not authenticated.

use sha1::{Digest, Sha1};

use crate::protocol::HASH_SIZE;

/// A 20-byte content digest.
pub type PieceHash = [u8; HASH_SIZE];

/// Compute the SHA-1 digest of data.
#[must_use]
pub fn sha1(data: &[u8]) -> PieceHash {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Incremental SHA-1 over a logical stream fed in arbitrary slices.
#[derive(Debug, Clone, Default)]
pub struct StreamHasher {
    inner: Sha1,
}

impl StreamHasher {
    /// Create an empty hasher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next slice of the stream.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finish and return the digest.
    pub fn finalize(self) -> PieceHash {
        self.inner.finalize().into()
    }
}

/// Constant-time comparison of two byte slices.
///
/// Returns `true` if the slices are equal, `false` otherwise.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Generate random bytes.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    use rand::RngCore;

    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Lowercase hex encoding.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
