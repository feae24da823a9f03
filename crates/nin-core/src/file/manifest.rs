//! The manifest: identity, size and per-piece hashes of a transfer unit.
//!
//! ## Wire Layout
//!
//! ```text
//! name        u32 len | bytes
//! mime type   u32 len | bytes
//! checksum    u32 len | 20 bytes
//! piece len   u32
//! pieces      u32 count | count × 20 bytes
//! total len   u64
//! ---- member block (optional) ----
//! single      u8
//! members     u32 count | count × (path str | size u64 | offset u64 | source str)
//! ```
//!
//! A manifest without the member block describes a single file.

use std::path::{Path, PathBuf};

use crate::crypto::{self, PieceHash};
use crate::error::{Error, Result};
use crate::protocol::{Message, MessageCode, PayloadReader, PayloadWriter, HASH_SIZE};
use crate::PIECE_LENGTH;

use super::{
    detect_mime_type, enumerate_members, path_from_wire, path_to_wire, MemberFile, VirtualFile,
};

/// Bytes of the first member inspected for content-type detection.
const SNIFF_LENGTH: usize = 512;

/// Describes a file or file tree as an ordered sequence of hashed pieces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Base name of the transfer root
    pub name: String,
    /// Detected content type
    pub mime_type: String,
    /// SHA-1 over the whole logical stream
    pub checksum: PieceHash,
    /// Nominal piece length in bytes
    pub piece_length: u32,
    /// Per-piece SHA-1 digests, in stream order
    pub pieces: Vec<PieceHash>,
    /// Length of the logical stream
    pub total_length: u64,
    /// Whether the transfer is a single file
    pub single: bool,
    /// Member descriptors, sorted by relative path
    pub members: Vec<MemberFile>,
}

impl Manifest {
    /// Build a manifest and its bound source view from a path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is unreadable or holds no bytes.
    pub fn generate(path: &Path) -> Result<(Self, VirtualFile)> {
        Self::generate_with_piece_length(path, PIECE_LENGTH)
    }

    /// Build a manifest with a custom piece length.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is unreadable, holds no bytes, or
    /// `piece_length` is zero.
    pub fn generate_with_piece_length(
        path: &Path,
        piece_length: u32,
    ) -> Result<(Self, VirtualFile)> {
        if piece_length == 0 {
            return Err(Error::InvalidInput("piece length must be positive".to_string()));
        }

        let root = std::path::absolute(path)?;
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;
        let single = root.is_file();

        let members = enumerate_members(&root)?;
        if members.is_empty() {
            return Err(Error::EmptySource(path.display().to_string()));
        }

        let vfile = VirtualFile::open_source(name.clone(), members, single)?;

        // The first member starts the logical stream, so its head is at offset 0.
        let mut head = vec![0u8; SNIFF_LENGTH];
        let n = vfile.read_at(&mut head, 0)?;
        let first = vfile
            .members()
            .first()
            .map_or(root.as_path(), |m| m.source_path.as_path());
        let mime_type = detect_mime_type(first, &head[..n]);

        let (pieces, checksum) = vfile.hash_pieces(piece_length)?;

        let manifest = Self {
            name,
            mime_type,
            checksum,
            piece_length,
            pieces,
            total_length: vfile.total_size(),
            single,
            members: vfile.members().to_vec(),
        };

        tracing::debug!(
            name = %manifest.name,
            members = manifest.members.len(),
            pieces = manifest.pieces.len(),
            total = manifest.total_length,
            "generated manifest"
        );

        Ok((manifest, vfile))
    }

    /// Number of pieces.
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Offset of a piece in the logical stream.
    pub fn piece_offset(&self, index: u32) -> u64 {
        u64::from(index) * u64::from(self.piece_length)
    }

    /// Length of a piece; only the last piece may be shorter than `piece_length`.
    pub fn piece_size(&self, index: u32) -> u64 {
        let offset = self.piece_offset(index);
        self.total_length
            .saturating_sub(offset)
            .min(u64::from(self.piece_length))
    }

    /// Check received bytes against the hash of piece `index`.
    pub fn verify_piece(&self, index: u32, data: &[u8]) -> bool {
        self.pieces
            .get(index as usize)
            .is_some_and(|expected| crypto::constant_time_eq(expected, &crypto::sha1(data)))
    }

    /// Whether the manifest carries a whole-stream checksum.
    pub fn has_checksum(&self) -> bool {
        self.checksum != [0u8; HASH_SIZE]
    }

    /// File-system name the receiver writes under.
    ///
    /// # Errors
    ///
    /// Returns an error if the name has no usable final component.
    pub fn base_name(&self) -> Result<String> {
        Path::new(&self.name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::InvalidPath(format!("manifest name '{}'", self.name)))
    }

    /// Check the structural invariants of the manifest.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolError`] if the members do not partition
    /// `[0, total_length)` or the piece count does not match.
    pub fn validate(&self) -> Result<()> {
        if self.piece_length == 0 {
            return Err(Error::ProtocolError("manifest piece length is zero".to_string()));
        }

        let expected = self.total_length.div_ceil(u64::from(self.piece_length));
        if self.pieces.len() as u64 != expected {
            return Err(Error::ProtocolError(format!(
                "manifest has {} piece hashes, {expected} expected for {} bytes",
                self.pieces.len(),
                self.total_length
            )));
        }

        let mut cursor = 0u64;
        for (i, member) in self.members.iter().enumerate() {
            if member.offset != cursor {
                return Err(Error::ProtocolError(format!(
                    "member {i} starts at {} but previous member ends at {cursor}",
                    member.offset
                )));
            }
            if i > 0 && self.members[i - 1].relative_path >= member.relative_path {
                return Err(Error::ProtocolError(format!(
                    "member {i} is out of path order"
                )));
            }
            cursor = member.end();
        }

        if cursor != self.total_length {
            return Err(Error::ProtocolError(format!(
                "members cover {cursor} bytes, manifest declares {}",
                self.total_length
            )));
        }

        if self.single && self.members.len() != 1 {
            return Err(Error::ProtocolError(format!(
                "single-file manifest has {} members",
                self.members.len()
            )));
        }

        Ok(())
    }

    /// Encode the manifest payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = PayloadWriter::new();
        writer
            .put_str(&self.name)
            .put_str(&self.mime_type)
            .put_bytes(&self.checksum)
            .put_u32(self.piece_length);

        #[allow(clippy::cast_possible_truncation)]
        let piece_count = self.pieces.len() as u32;
        writer.put_u32(piece_count);
        for piece in &self.pieces {
            writer.put_raw(piece);
        }
        writer.put_u64(self.total_length);

        #[allow(clippy::cast_possible_truncation)]
        let member_count = self.members.len() as u32;
        writer.put_u8(u8::from(self.single)).put_u32(member_count);
        for member in &self.members {
            writer
                .put_str(&path_to_wire(&member.relative_path))
                .put_u64(member.size)
                .put_u64(member.offset)
                .put_str(&member.source_path.to_string_lossy());
        }

        writer.finish()
    }

    /// Decode a manifest payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is short or malformed.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = PayloadReader::new(data, "metadata");

        let name = reader.string()?;
        let mime_type = reader.string()?;

        let checksum_bytes = reader.bytes()?;
        let mut checksum = [0u8; HASH_SIZE];
        match checksum_bytes.len() {
            0 => {}
            HASH_SIZE => checksum.copy_from_slice(checksum_bytes),
            n => {
                return Err(Error::ProtocolError(format!(
                    "metadata checksum is {n} bytes, expected {HASH_SIZE}"
                )))
            }
        }

        let piece_length = reader.u32()?;
        let piece_count = reader.u32()? as usize;
        let raw_pieces = reader.take(piece_count.saturating_mul(HASH_SIZE))?;
        let pieces = raw_pieces
            .chunks_exact(HASH_SIZE)
            .map(|c| {
                let mut hash = [0u8; HASH_SIZE];
                hash.copy_from_slice(c);
                hash
            })
            .collect();
        let total_length = reader.u64()?;

        let (single, members) = if reader.is_empty() {
            let member = MemberFile {
                relative_path: PathBuf::from(&name),
                size: total_length,
                offset: 0,
                source_path: PathBuf::new(),
            };
            (true, vec![member])
        } else {
            let single = reader.u8()? != 0;
            let count = reader.u32()? as usize;
            let mut members = Vec::with_capacity(count.min(reader.remaining() / 24));
            for _ in 0..count {
                let relative_path = path_from_wire(&reader.string()?);
                let size = reader.u64()?;
                let offset = reader.u64()?;
                let source_path = PathBuf::from(reader.string()?);
                members.push(MemberFile {
                    relative_path,
                    size,
                    offset,
                    source_path,
                });
            }
            (single, members)
        };

        Ok(Self {
            name,
            mime_type,
            checksum,
            piece_length,
            pieces,
            total_length,
            single,
            members,
        })
    }

    /// Wrap the encoded manifest in a `Metadata` message.
    #[must_use]
    pub fn to_message(&self) -> Message {
        Message::new(MessageCode::Metadata, self.encode())
    }
}
