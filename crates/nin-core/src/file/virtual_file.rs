//! A byte-addressable view over one file or an ordered set of files.
//!
//! The logical stream is the concatenation of every member in manifest
//! order. A global offset is translated into `(member index, local offset)`
//! by binary search over the members' cumulative offsets, and reads and
//! writes transparently continue into the next member at a boundary.
//!
//! ```text
//!  logical:  [0 ............................................. total)
//!  members:  [ a.txt (0..5) ][ b/c.bin (5..1_000_005) ][ d (..)  ]
//! ```
//!
//! All I/O is positional, so concurrent reads never race on a shared cursor.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::crypto::{self, PieceHash, StreamHasher};
use crate::error::{Error, Result};

use super::{sanitize_path, Manifest, MemberFile};

#[cfg(unix)]
fn read_at_pos(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at_pos(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(unix)]
fn write_all_at_pos(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at_pos(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Fill `buf` from `file` starting at `offset`, stopping early only at end of file.
fn fill_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match read_at_pos(file, &mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Byte-addressable view over the members of a transfer.
///
/// A source view holds one read handle per member from construction. A
/// destination view opens (and creates) each member lazily on its first
/// write, under `<destination>/<base name>` for a single file or
/// `<destination>/<base name>/<relative path>` for a tree.
pub struct VirtualFile {
    base_name: String,
    members: Vec<MemberFile>,
    handles: Vec<Option<File>>,
    total_size: u64,
    single: bool,
    destination: Option<PathBuf>,
}

impl std::fmt::Debug for VirtualFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualFile")
            .field("base_name", &self.base_name)
            .field("members", &self.members.len())
            .field("total_size", &self.total_size)
            .field("single", &self.single)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

impl VirtualFile {
    /// Open a source view over already-enumerated members.
    ///
    /// # Errors
    ///
    /// Returns an error if any member cannot be opened for reading.
    pub fn open_source(base_name: String, members: Vec<MemberFile>, single: bool) -> Result<Self> {
        let handles = members
            .iter()
            .map(|m| File::open(&m.source_path).map(Some))
            .collect::<io::Result<Vec<_>>>()?;
        let total_size = members.last().map_or(0, MemberFile::end);

        Ok(Self {
            base_name,
            members,
            handles,
            total_size,
            single,
            destination: None,
        })
    }

    /// Create a destination view for a received manifest, rooted at `download_dir`.
    ///
    /// No file is created until the first write touches it.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest's name or any member path would
    /// escape the download directory.
    pub fn for_destination(manifest: &Manifest, download_dir: &Path) -> Result<Self> {
        let base_name = manifest.base_name()?;
        let view = Self {
            base_name,
            members: manifest.members.clone(),
            handles: manifest.members.iter().map(|_| None).collect(),
            total_size: manifest.total_length,
            single: manifest.single,
            destination: Some(download_dir.to_path_buf()),
        };

        for index in 0..view.members.len() {
            view.destination_path(index)?;
        }

        Ok(view)
    }

    /// Total length of the logical stream.
    pub const fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Ordered member descriptors.
    pub fn members(&self) -> &[MemberFile] {
        &self.members
    }

    /// Top-level output path of a destination view.
    pub fn output_path(&self) -> Option<PathBuf> {
        self.destination.as_ref().map(|d| d.join(&self.base_name))
    }

    /// Destination path of one member.
    ///
    /// # Errors
    ///
    /// Returns an error for a source view or a path that escapes the
    /// download directory.
    pub fn destination_path(&self, index: usize) -> Result<PathBuf> {
        let destination = self
            .destination
            .as_ref()
            .ok_or_else(|| Error::Internal("source view has no destination".to_string()))?;
        let member = self
            .members
            .get(index)
            .ok_or_else(|| Error::Internal(format!("member {index} out of range")))?;

        let relative = if self.single {
            PathBuf::from(&self.base_name)
        } else {
            Path::new(&self.base_name).join(&member.relative_path)
        };

        sanitize_path(destination, &relative)
            .ok_or_else(|| Error::InvalidPath(relative.display().to_string()))
    }

    /// Translate a global offset into `(member index, local offset)`.
    ///
    /// Negative offsets clamp to the start of the first member; offsets at or
    /// past the end clamp to the end of the last member.
    pub fn locate(&self, offset: i64) -> (usize, u64) {
        u64::try_from(offset).map_or((0, 0), |offset| self.position(offset))
    }

    fn position(&self, offset: u64) -> (usize, u64) {
        if offset >= self.total_size {
            return self
                .members
                .last()
                .map_or((0, 0), |last| (self.members.len() - 1, last.size));
        }

        let index = self.members.partition_point(|m| m.end() <= offset);
        (index, offset - self.members[index].offset)
    }

    /// Read from the logical stream at `offset` into `buf`.
    ///
    /// Continues across member boundaries until `buf` is full or the members
    /// are exhausted. Returns the number of bytes read; reaching the end of
    /// the stream is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if a member read fails.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let (mut index, mut local) = self.position(offset);
        let mut read = 0;

        while read < buf.len() && index < self.members.len() {
            let Some(file) = self.handles[index].as_ref() else {
                break;
            };

            let available = self.members[index].size.saturating_sub(local);
            let want = usize::try_from(available)
                .unwrap_or(usize::MAX)
                .min(buf.len() - read);
            let n = fill_at(file, &mut buf[read..read + want], local)?;
            read += n;

            if n < want {
                break;
            }

            index += 1;
            local = 0;
        }

        Ok(read)
    }

    /// Write `buf` into the logical stream at `offset`.
    ///
    /// Members are created on first write together with their parent
    /// directories. No member is written past its declared size; the excess
    /// continues into the next member. Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error if a member cannot be created or written.
    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        let (mut index, mut local) = self.position(offset);
        let mut written = 0;

        while written < buf.len() && index < self.members.len() {
            let room = self.members[index].size.saturating_sub(local);
            if room == 0 {
                index += 1;
                local = 0;
                continue;
            }

            let len = usize::try_from(room)
                .unwrap_or(usize::MAX)
                .min(buf.len() - written);
            let file = self.writable_handle(index)?;
            write_all_at_pos(file, &buf[written..written + len], local)?;
            written += len;

            index += 1;
            local = 0;
        }

        Ok(written)
    }

    fn writable_handle(&mut self, index: usize) -> Result<&File> {
        if self.handles[index].is_none() {
            let path = self.destination_path(index)?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            // A longer file left at the path must not keep its tail.
            file.set_len(self.members[index].size)?;
            self.handles[index] = Some(file);
        }

        self.handles[index]
            .as_ref()
            .ok_or_else(|| Error::Internal(format!("member {index} has no handle")))
    }

    /// Read one piece of the logical stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    pub fn read_piece(&self, index: u32, piece_length: u32) -> Result<Vec<u8>> {
        let offset = u64::from(index) * u64::from(piece_length);
        let mut buf = vec![0u8; piece_length as usize];
        let n = self.read_at(&mut buf, offset)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Hash every piece of the logical stream and checksum the whole of it in
    /// one pass.
    ///
    /// # Errors
    ///
    /// Returns an error if a read fails or comes up short.
    pub fn hash_pieces(&self, piece_length: u32) -> Result<(Vec<PieceHash>, PieceHash)> {
        let piece_count = self.total_size.div_ceil(u64::from(piece_length));
        let mut pieces = Vec::with_capacity(usize::try_from(piece_count).unwrap_or(0));
        let mut whole = StreamHasher::new();
        let mut buf = vec![0u8; piece_length as usize];

        for index in 0..piece_count {
            let offset = index * u64::from(piece_length);
            let expected = (self.total_size - offset).min(u64::from(piece_length));
            let n = self.read_at(&mut buf, offset)?;
            if n as u64 != expected {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("piece {index}: read {n} of {expected} bytes, source changed?"),
                )));
            }

            pieces.push(crypto::sha1(&buf[..n]));
            whole.update(&buf[..n]);
        }

        Ok((pieces, whole.finalize()))
    }

    /// SHA-1 over the whole logical stream.
    ///
    /// # Errors
    ///
    /// Returns an error if a read fails.
    pub fn checksum(&self) -> Result<PieceHash> {
        const BLOCK: usize = 256 * 1024;

        let mut hasher = StreamHasher::new();
        let mut buf = vec![0u8; BLOCK];
        let mut offset = 0;

        while offset < self.total_size {
            let n = self.read_at(&mut buf, offset)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            offset += n as u64;
        }

        Ok(hasher.finalize())
    }

    /// Flush written members and close every handle.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing a written member fails. Handles are
    /// released either way.
    pub fn close(&mut self) -> Result<()> {
        let mut result = Ok(());
        for handle in &mut self.handles {
            if let Some(file) = handle.take() {
                if self.destination.is_some() {
                    if let Err(e) = file.sync_all() {
                        result = Err(Error::Io(e));
                    }
                }
            }
        }
        result
    }
}
