//! Packaging a batch's working directory into one zip archive.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::error::{Error, Result};

/// MIME type of the produced archive.
pub const CONTENT_TYPE: &str = "application/zip";

/// A packaged archive, deleted from disk when dropped.
#[derive(Debug)]
pub struct ArchiveHandle {
    file: NamedTempFile,
    file_name: String,
    entries: Vec<String>,
}

/// The archive contents handed to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveDelivery {
    /// Zip bytes.
    pub bytes: Vec<u8>,
    /// Suggested filename.
    pub file_name: String,
    /// Always [`CONTENT_TYPE`].
    pub content_type: &'static str,
}

impl ArchiveHandle {
    /// Where the archive currently lives.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Suggested filename for the archive.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Entry names, in archive order.
    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Read the archive into memory, consuming the handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PackagingFailed`] if the file cannot be read.
    pub fn into_delivery(self) -> Result<ArchiveDelivery> {
        let bytes = std::fs::read(self.file.path())
            .map_err(|e| Error::PackagingFailed(format!("Failed to read archive: {e}")))?;
        Ok(ArchiveDelivery {
            bytes,
            file_name: self.file_name,
            content_type: CONTENT_TYPE,
        })
    }

    /// Move the archive to `path`, consuming the handle.
    ///
    /// Falls back to copying when a rename is not possible.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileSystem`] if the archive cannot be written to `path`.
    pub fn save_to(self, path: &Path) -> Result<PathBuf> {
        match self.file.persist(path) {
            Ok(_) => Ok(path.to_path_buf()),
            Err(e) => {
                debug!("Rename failed ({}), copying instead", e.error);
                std::fs::copy(e.file.path(), path).map_err(|err| Error::file_system(path, err))?;
                Ok(path.to_path_buf())
            }
        }
    }
}

/// Zip every regular file under `work_dir` into a new archive in `dest_dir`.
///
/// Entries are named after the file's base name. When a name is already
/// taken the parent directory name (the item id) is appended to the stem,
/// then a counter if needed.
///
/// # Errors
///
/// Returns [`Error::PackagingFailed`] on any I/O or zip failure.
pub fn package_archive(
    work_dir: &Path,
    dest_dir: &Path,
    archive_name: &str,
) -> Result<ArchiveHandle> {
    info!(
        "Packaging {} into {}",
        work_dir.display(),
        dest_dir.display()
    );

    let file = tempfile::Builder::new()
        .prefix("tubebatch-")
        .suffix(".zip")
        .tempfile_in(dest_dir)
        .map_err(|e| packaging_error("create archive file", &e))?;

    let target = file
        .reopen()
        .map_err(|e| packaging_error("open archive", &e))?;
    let mut zip = ZipWriter::new(target);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut used = HashSet::new();
    let mut entries = Vec::new();

    for entry in WalkDir::new(work_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| packaging_error("walk working directory", &e))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry_name(entry.path(), work_dir, &mut used);
        debug!("Adding {} as {}", entry.path().display(), name);

        zip.start_file(name.as_str(), options)
            .map_err(|e| packaging_error("start entry", &e))?;
        let mut source = File::open(entry.path()).map_err(|e| packaging_error("open file", &e))?;
        io::copy(&mut source, &mut zip).map_err(|e| packaging_error("write entry", &e))?;
        entries.push(name);
    }

    let mut inner = zip.finish().map_err(|e| packaging_error("finish archive", &e))?;
    inner.flush().map_err(|e| packaging_error("flush archive", &e))?;

    info!("Packaged {} files", entries.len());
    Ok(ArchiveHandle {
        file,
        file_name: archive_name.to_string(),
        entries,
    })
}

fn packaging_error(action: &str, e: &dyn std::fmt::Display) -> Error {
    Error::PackagingFailed(format!("Failed to {action}: {e}"))
}

/// Pick a unique entry name for `path` and record it in `used`.
fn entry_name(path: &Path, root: &Path, used: &mut HashSet<String>) -> String {
    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if used.insert(base.clone()) {
        return base;
    }

    let (stem, ext) = split_name(&base);
    let owner = path
        .parent()
        .filter(|p| *p != root)
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned());

    let tagged = owner.map_or_else(|| stem.to_string(), |id| format!("{stem} [{id}]"));
    let candidate = join_name(&tagged, ext);
    if used.insert(candidate.clone()) {
        return candidate;
    }

    let mut counter = 2;
    loop {
        let candidate = join_name(&format!("{tagged} ({counter})"), ext);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}

fn join_name(stem: &str, ext: Option<&str>) -> String {
    ext.map_or_else(|| stem.to_string(), |ext| format!("{stem}.{ext}"))
}
