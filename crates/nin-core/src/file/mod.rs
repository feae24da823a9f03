//! File operations for nin.
//!
//! This module handles:
//! - Enumerating a file or directory tree into ordered member descriptors
//! - Manifest construction and its wire layout ([`Manifest`])
//! - The virtual multi-file addressing layer ([`VirtualFile`])
//! - Path sanitization for receiver-side output
//! - Content-type detection
//!
//! ## Member Ordering
//!
//! Members are sorted by relative path so that the same tree always produces
//! the same manifest. Zero-length files carry no bytes and are skipped.

mod manifest;
mod virtual_file;

pub use manifest::Manifest;
pub use virtual_file::VirtualFile;

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// One physical file inside a transfer unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberFile {
    /// Path relative to the transfer root
    pub relative_path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Offset of the first byte in the logical stream
    pub offset: u64,
    /// Absolute path on the sending machine
    pub source_path: PathBuf,
}

impl MemberFile {
    /// One past the last logical offset covered by this member.
    pub const fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Enumerate the members of a transfer rooted at `root`.
///
/// A regular file yields one member named after the file. A directory yields
/// every non-empty regular file beneath it, sorted by relative path, with
/// cumulative offsets assigned.
///
/// # Errors
///
/// Returns an error if `root` does not exist or cannot be walked.
pub fn enumerate_members(root: &Path) -> Result<Vec<MemberFile>> {
    let metadata = std::fs::metadata(root).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::FileNotFound(root.display().to_string()),
        std::io::ErrorKind::PermissionDenied => {
            Error::PermissionDenied(root.display().to_string())
        }
        _ => Error::Io(e),
    })?;

    let mut members = Vec::new();

    if metadata.is_file() {
        let name = root
            .file_name()
            .ok_or_else(|| Error::InvalidPath(root.display().to_string()))?;
        if metadata.len() > 0 {
            members.push(MemberFile {
                relative_path: PathBuf::from(name),
                size: metadata.len(),
                offset: 0,
                source_path: std::path::absolute(root)?,
            });
        }
        return Ok(members);
    }

    for entry in walkdir::WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let path = entry.path();

        let Ok(meta) = std::fs::metadata(path) else {
            continue;
        };
        if !meta.is_file() || meta.len() == 0 {
            continue;
        }

        let relative = path
            .strip_prefix(root)
            .map_err(|_| Error::InvalidPath(path.display().to_string()))?;

        members.push(MemberFile {
            relative_path: relative.to_path_buf(),
            size: meta.len(),
            offset: 0,
            source_path: std::path::absolute(path)?,
        });
    }

    members.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    assign_offsets(&mut members);

    Ok(members)
}

/// Assign cumulative offsets by prefix sum over the members' sizes.
pub fn assign_offsets(members: &mut [MemberFile]) -> u64 {
    let mut offset = 0;
    for member in members.iter_mut() {
        member.offset = offset;
        offset += member.size;
    }
    offset
}

/// Sanitize a relative path to prevent directory traversal attacks.
///
/// # Arguments
///
/// * `base` - Base directory
/// * `relative` - Relative path from base
///
/// # Returns
///
/// The sanitized path, or None if the path would escape `base`.
#[must_use]
pub fn sanitize_path(base: &Path, relative: &Path) -> Option<PathBuf> {
    for component in relative.components() {
        if !matches!(component, Component::Normal(_) | Component::CurDir) {
            return None;
        }
    }

    let full_path = base.join(relative);

    if full_path.starts_with(base) {
        Some(full_path)
    } else {
        None
    }
}

/// Encode a relative path with `/` separators regardless of platform.
pub(crate) fn path_to_wire(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Decode a `/`-separated wire path into a platform path.
pub(crate) fn path_from_wire(value: &str) -> PathBuf {
    value.split('/').filter(|s| !s.is_empty()).collect()
}

/// Detect the content type of a file from its name, then from its leading bytes.
///
/// `head` holds the first bytes of the file; it is inspected, never consumed.
#[must_use]
pub fn detect_mime_type(path: &Path, head: &[u8]) -> String {
    if let Some(mime) = mime_guess::from_path(path).first() {
        return mime.to_string();
    }

    let sniffed = match head {
        [0x50, 0x4B, 0x03, 0x04, ..] => "application/zip",
        [0x1F, 0x8B, ..] => "application/gzip",
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'%', b'P', b'D', b'F', ..] => "application/pdf",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        _ if !head.is_empty() && std::str::from_utf8(head).is_ok() => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    };
    sniffed.to_string()
}

/// Format a file size for display.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.0 GB");
    }

    #[test]
    fn test_sanitize_path_nested_valid() {
        let base = Path::new("/home/user/downloads");
        let relative = Path::new("subdir/file.txt");
        let result = sanitize_path(base, relative);
        assert_eq!(
            result,
            Some(PathBuf::from("/home/user/downloads/subdir/file.txt"))
        );
    }

    #[test]
    fn test_sanitize_path_traversal_attack() {
        let base = Path::new("/home/user/downloads");
        assert_eq!(sanitize_path(base, Path::new("../../../etc/passwd")), None);
        assert_eq!(sanitize_path(base, Path::new("/etc/passwd")), None);
    }

    #[test]
    fn test_wire_path_roundtrip() {
        let path: PathBuf = ["a", "b", "c.txt"].iter().collect();
        assert_eq!(path_to_wire(&path), "a/b/c.txt");
        assert_eq!(path_from_wire("a/b/c.txt"), path);
    }

    #[test]
    fn test_enumerate_single_file() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let file_path = temp_dir.path().join("report.bin");
        std::fs::write(&file_path, vec![1u8; 300]).expect("write file");

        let members = enumerate_members(&file_path).expect("enumerate");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].relative_path, PathBuf::from("report.bin"));
        assert_eq!(members[0].size, 300);
        assert_eq!(members[0].offset, 0);
        assert!(members[0].source_path.is_absolute());
    }

    #[test]
    fn test_enumerate_directory_sorted_and_skips_empty() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let root = temp_dir.path();
        std::fs::create_dir_all(root.join("nested/deeper")).expect("create dirs");
        std::fs::write(root.join("zeta.txt"), b"zzz").expect("write");
        std::fs::write(root.join("alpha.txt"), b"aaaaa").expect("write");
        std::fs::write(root.join("nested/deeper/mid.txt"), b"mm").expect("write");
        std::fs::write(root.join("empty.txt"), b"").expect("write");

        let members = enumerate_members(root).expect("enumerate");
        let paths: Vec<_> = members.iter().map(|m| path_to_wire(&m.relative_path)).collect();
        assert_eq!(paths, vec!["alpha.txt", "nested/deeper/mid.txt", "zeta.txt"]);

        assert_eq!(members[0].offset, 0);
        assert_eq!(members[1].offset, 5);
        assert_eq!(members[2].offset, 7);
        assert_eq!(members[2].end(), 10);
    }

    #[test]
    fn test_enumerate_missing_path() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let result = enumerate_members(&temp_dir.path().join("nope"));
        assert!(matches!(result, Err(Error::FileNotFound(_))));
    }

    #[test]
    fn test_detect_mime_type() {
        assert_eq!(detect_mime_type(Path::new("notes.txt"), b""), "text/plain");
        assert_eq!(
            detect_mime_type(Path::new("blob"), &[0x50, 0x4B, 0x03, 0x04, 0x00]),
            "application/zip"
        );
        assert_eq!(
            detect_mime_type(Path::new("blob"), b"plain words"),
            "text/plain; charset=utf-8"
        );
        assert_eq!(
            detect_mime_type(Path::new("blob"), &[0xC3, 0x28, 0x00]),
            "application/octet-stream"
        );
    }
}
