//! Seams for the external media capabilities.
//!
//! The core never talks to a video platform or touches media streams
//! itself. Everything goes through [`MediaExtractor`] (enumeration,
//! metadata, payload transfer) and [`Transcoder`] (audio extraction and
//! container work). Production implementations live in [`crate::ytdlp`]
//! and [`crate::ffmpeg`]; tests substitute in-memory fakes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::format::{AudioCodec, VideoContainer};

/// One entry of a flat playlist enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPlaylistEntry {
    /// Item identifier.
    pub id: String,
    /// Title, when the source provides it cheaply.
    pub title: Option<String>,
    /// Item URL as reported by the source.
    pub url: Option<String>,
    /// Duration in seconds, when known.
    pub duration_secs: Option<u64>,
}

impl RawPlaylistEntry {
    /// Entry with only an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            url: None,
            duration_secs: None,
        }
    }

    /// Set the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Result of a flat playlist enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPlaylist {
    /// Playlist identifier, if reported.
    pub id: Option<String>,
    /// Playlist title, if reported.
    pub title: Option<String>,
    /// Entries in source order.
    pub entries: Vec<RawPlaylistEntry>,
}

/// Per-item metadata as reported by the source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItemInfo {
    /// Item identifier.
    pub id: String,
    /// Display title.
    pub title: Option<String>,
    /// Duration in seconds.
    pub duration_secs: Option<u64>,
    /// Thumbnail URL.
    pub thumbnail_url: Option<String>,
    /// Page URL of the item.
    pub webpage_url: Option<String>,
}

/// Transfer state reported while a payload is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadStatus {
    /// Bytes are still arriving.
    Downloading,
    /// The transfer of one stream completed.
    Finished,
}

/// Progress of a single payload transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadProgress {
    /// Transfer state.
    pub status: PayloadStatus,
    /// Percent complete (0.0 - 100.0), when known.
    pub percent: Option<f64>,
    /// Human-readable speed, e.g. `1.2MiB/s`.
    pub speed: Option<String>,
    /// Human-readable ETA, e.g. `00:42`.
    pub eta: Option<String>,
}

impl PayloadProgress {
    /// Progress while bytes are arriving.
    #[must_use]
    pub const fn downloading(percent: f64) -> Self {
        Self {
            status: PayloadStatus::Downloading,
            percent: Some(percent),
            speed: None,
            eta: None,
        }
    }

    /// Progress once a stream has been written.
    #[must_use]
    pub const fn finished() -> Self {
        Self {
            status: PayloadStatus::Finished,
            percent: Some(100.0),
            speed: None,
            eta: None,
        }
    }
}

/// Callback receiving payload progress, invoked on the fetching task.
pub type PayloadProgressCallback = Arc<dyn Fn(PayloadProgress) + Send + Sync>;

/// What to fetch and where to put it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadRequest {
    /// Item URL.
    pub url: String,
    /// Format selector (see [`crate::format::OutputConfig::format_spec`]).
    pub format_spec: String,
    /// Directory the payload is written into.
    pub dest_dir: PathBuf,
    /// File name without extension.
    pub file_stem: String,
    /// Container for merging separate video and audio streams, if any.
    pub merge_container: Option<VideoContainer>,
}

/// Files written by a payload fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchedPayload {
    /// One file holding everything that was requested.
    Single(PathBuf),
    /// Separate video and audio streams that still need merging.
    Separate {
        /// Video-only stream.
        video: PathBuf,
        /// Audio-only stream.
        audio: PathBuf,
    },
}

/// Playlist enumeration, metadata, and payload transfer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Enumerate a playlist without fetching per-item detail.
    async fn resolve_playlist(&self, url: &str) -> Result<ResolvedPlaylist>;

    /// Fetch rich metadata for a single item.
    async fn fetch_item_info(&self, url: &str) -> Result<RawItemInfo>;

    /// Download a single item's payload into `request.dest_dir`.
    async fn fetch_payload(
        &self,
        request: &PayloadRequest,
        on_progress: PayloadProgressCallback,
    ) -> Result<FetchedPayload>;
}

/// Audio extraction and container normalization.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Re-encode `input` to an audio-only file, returning the new path.
    async fn transcode(&self, input: &Path, codec: AudioCodec, bitrate_kbps: u32)
    -> Result<PathBuf>;

    /// Copy the streams of `input` into another container.
    async fn remux(&self, input: &Path, container: VideoContainer) -> Result<PathBuf>;

    /// Merge separate video and audio streams into one file.
    async fn merge(&self, video: &Path, audio: &Path, container: VideoContainer)
    -> Result<PathBuf>;
}
