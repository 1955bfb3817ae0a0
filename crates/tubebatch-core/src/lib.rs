//! `Tubebatch` Core Library
//!
//! This crate provides the core functionality for `Tubebatch`:
//! - Playlist resolution into addressable items
//! - Concurrent, bounded metadata fetching
//! - Item selection
//! - Sequential batch fetching with per-item outcomes
//! - Packaging the results into one zip archive
//!
//! Media work is delegated to external tools through the
//! [`MediaExtractor`] and [`Transcoder`] traits, implemented by
//! [`YtDlpExtractor`] and [`FfmpegTranscoder`].
//!
//! # Example
//!
//! ```rust,ignore
//! use tubebatch_core::{AppConfig, BatchMode, OutputConfig, Session};
//!
//! let session = Session::from_config(AppConfig::load()?);
//! session.resolve("https://www.youtube.com/playlist?list=...", None).await?;
//! session.select_all().await;
//! let batch = session.start_batch(BatchMode::Selected, OutputConfig::audio(192)).await?;
//! let report = batch.finish().await?;
//! let archive = session.take_archive().await?;
//! ```

pub mod archive;
pub mod batch;
pub mod config;
pub mod error;
pub mod extractor;
pub mod ffmpeg;
pub mod format;
pub mod metadata;
pub mod playlist;
pub mod process;
pub mod selection;
pub mod session;
pub mod workdir;
pub mod ytdlp;

pub use archive::{ArchiveDelivery, ArchiveHandle, CONTENT_TYPE, package_archive};
pub use batch::{
    BatchOptions, BatchProgress, BatchResult, BatchTarget, EventSender, FetchOutcome,
    ProgressEvent, run_batch,
};
pub use config::{
    AppConfig, ConfigManager, DEFAULT_METADATA_CONCURRENCY, DEFAULT_NETWORK_TIMEOUT_SECS,
    MAX_METADATA_CONCURRENCY, MIN_METADATA_CONCURRENCY, config_file_path,
};
pub use error::{Error, Result, Warning};
pub use extractor::{
    FetchedPayload, MediaExtractor, PayloadProgress, PayloadProgressCallback, PayloadRequest,
    PayloadStatus, RawItemInfo, RawPlaylistEntry, ResolvedPlaylist, Transcoder,
};
pub use ffmpeg::FfmpegTranscoder;
pub use format::{
    AudioCodec, DEFAULT_AUDIO_BITRATE_KBPS, OutputConfig, VideoContainer, VideoQuality,
};
pub use metadata::{
    MetadataOptions, MetadataProgress, MetadataProgressFn, MetadataReport, SkippedItem,
    fetch_all, fetch_metadata,
};
pub use playlist::{PlaylistItem, UNTITLED, canonical_item_url, resolve, sanitize_filename};
pub use selection::SelectionSet;
pub use session::{BatchHandle, BatchMode, BatchReport, ResolveReport, Session};
pub use workdir::WorkDir;
pub use ytdlp::YtDlpExtractor;
