//! Per-batch working directory.
//!
//! Every batch gets a fresh directory that nothing else writes into. It is
//! removed when the [`WorkDir`] is dropped, whichever way the batch ends.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::playlist::sanitize_filename;

/// Prefix of working directory names.
const PREFIX: &str = "batch-";

/// Exclusively owned temporary directory for one batch.
#[derive(Debug)]
pub struct WorkDir {
    dir: TempDir,
}

impl WorkDir {
    /// Create a new, empty working directory under `root`.
    ///
    /// `root` is created if missing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileSystem`] if the directory cannot be created.
    pub fn create(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|e| Error::file_system(root, e))?;
        let dir = tempfile::Builder::new()
            .prefix(PREFIX)
            .tempdir_in(root)
            .map_err(|e| Error::file_system(root, e))?;
        debug!("Created working directory {}", dir.path().display());
        Ok(Self { dir })
    }

    /// Path of the directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Subdirectory holding the files of one item (not created).
    #[must_use]
    pub fn item_dir(&self, id: &str) -> PathBuf {
        self.dir.path().join(sanitize_filename(id))
    }

    /// Remove the directory now, reporting failures instead of ignoring them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileSystem`] if removal fails.
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(|e| {
            warn!("Failed to remove working directory {}: {}", path.display(), e);
            Error::file_system(&path, e)
        })?;
        debug!("Removed working directory {}", path.display());
        Ok(())
    }
}
