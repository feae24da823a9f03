//! Zip packaging of a source directory before it is sent.
//!
//! A sender can ship a directory as one archive instead of a file tree; the
//! archive then becomes the source path for manifest generation and can be
//! deleted once the sender shuts down.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::file::path_to_wire;

/// Zip every regular file under `source` into `<destination>/<base(source)>.zip`.
///
/// Entry names are `<base(source)>/<relative path>`. The destination
/// directory is created if needed and an existing archive is overwritten.
///
/// # Errors
///
/// Returns [`Error::NotADirectory`] if `source` is not a directory, or an
/// error if the archive cannot be written.
pub fn zip_folder(destination: &Path, source: &Path) -> Result<PathBuf> {
    let source = std::path::absolute(source)?;
    if !source.is_dir() {
        return Err(Error::NotADirectory(source.display().to_string()));
    }

    let base = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::InvalidPath(source.display().to_string()))?;

    std::fs::create_dir_all(destination)?;
    let archive_path = destination.join(format!("{base}.zip"));

    let file = File::create(&archive_path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let mut entries = 0usize;
    for entry in walkdir::WalkDir::new(&source).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(&source)
            .map_err(|_| Error::InvalidPath(entry.path().display().to_string()))?;
        let name = format!("{base}/{}", path_to_wire(relative));

        zip.start_file(name, options)
            .map_err(|e| Error::ArchiveError(e.to_string()))?;
        let mut f = File::open(entry.path())?;
        std::io::copy(&mut f, &mut zip)?;
        entries += 1;
    }

    zip.finish()
        .map_err(|e| Error::ArchiveError(e.to_string()))?;

    tracing::info!(
        archive = %archive_path.display(),
        entries,
        "packed directory into archive"
    );

    Ok(archive_path)
}

/// Run [`zip_folder`] on the blocking thread pool.
pub async fn zip_folder_async(destination: PathBuf, source: PathBuf) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || zip_folder(&destination, &source))
        .await
        .map_err(|e| Error::Internal(format!("archive task failed: {e}")))?
}
