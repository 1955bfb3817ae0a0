//! Error types for Tubebatch core operations.
//!
//! Hard stops (nothing useful can be produced) are returned as [`Error`].
//! Conditions that only degrade the result, such as a single item that
//! could not be fetched, are reported as [`Warning`]s next to the partial
//! result instead.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Tubebatch core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The playlist URL is empty or malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The source reported a playlist without any entries.
    #[error("Playlist has no entries: {url}")]
    EmptyPlaylist {
        /// The playlist URL that was resolved.
        url: String,
    },

    /// The playlist could not be enumerated.
    #[error("Failed to resolve playlist {url}: {reason}")]
    ResolutionFailed {
        /// The playlist URL that was resolved.
        url: String,
        /// Underlying cause.
        reason: String,
    },

    /// A selection referenced an item that is not loaded.
    #[error("Unknown item: {0}")]
    UnknownItem(String),

    /// A batch was requested with nothing to fetch.
    #[error("Nothing to download: no items were selected")]
    NothingToDownload,

    /// The archive could not be produced.
    #[error("Failed to package archive: {0}")]
    PackagingFailed(String),

    /// A newer resolve replaced this one before it finished.
    #[error("Resolve of {url} was superseded by a newer request")]
    Superseded {
        /// The playlist URL whose results were discarded.
        url: String,
    },

    /// Fetching a single item failed.
    #[error("Failed to fetch {url}: {reason}")]
    ItemFetchFailed {
        /// The item URL.
        url: String,
        /// Underlying cause.
        reason: String,
    },

    /// A network-bound step exceeded its time limit.
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// The configured limit.
        after: Duration,
    },

    /// An external tool could not be run or exited unsuccessfully.
    #[error("{tool} failed: {message}")]
    Tool {
        /// Name of the tool (e.g. `yt-dlp`, `ffmpeg`).
        tool: String,
        /// Error message, usually the tail of stderr.
        message: String,
    },

    /// File system operation failed.
    #[error("File system error at {path}: {message}")]
    FileSystem {
        /// Path where the error occurred.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a file system error for the given path.
    pub fn file_system(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::FileSystem {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create an external tool error.
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Whether this error prevents any useful output for the current request.
    ///
    /// Per-item failures are not fatal: the batch records them and moves on.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::ItemFetchFailed { .. } | Self::Timeout { .. })
    }

    /// Whether the user can fix this by changing their input.
    #[must_use]
    pub const fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_) | Self::NothingToDownload | Self::UnknownItem(_)
        )
    }
}

/// Non-fatal conditions surfaced next to a (partial) result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Warning {
    /// Metadata for one item could not be fetched; the item was left out.
    ItemFetchSkipped {
        /// Item identifier.
        id: String,
        /// Why the item was skipped.
        reason: String,
    },
    /// The batch finished with a mix of successes and failures.
    BatchPartialFailure {
        /// Number of items that produced output.
        succeeded: usize,
        /// Number of items that failed.
        failed: usize,
    },
    /// No item produced output; the archive is empty.
    EmptyArchive,
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ItemFetchSkipped { id, reason } => write!(f, "Skipped {id}: {reason}"),
            Self::BatchPartialFailure { succeeded, failed } => {
                write!(f, "{succeeded} succeeded, {failed} failed")
            }
            Self::EmptyArchive => write!(f, "No files were downloaded; the archive is empty"),
        }
    }
}
