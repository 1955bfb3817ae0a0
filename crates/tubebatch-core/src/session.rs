//! The session: loaded items, selection, and the last archive.
//!
//! A [`Session`] is the one piece of mutable state a presentation layer
//! holds. Each operation takes it explicitly; there is no global state.
//! Cloning a session yields another handle to the same state.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::archive::{ArchiveDelivery, ArchiveHandle, package_archive};
use crate::batch::{
    BatchOptions, BatchTarget, EventSender, FetchOutcome, ProgressEvent, emit, run_batch, summarize,
};
use crate::config::AppConfig;
use crate::error::{Error, Result, Warning};
use crate::extractor::{MediaExtractor, Transcoder};
use crate::ffmpeg::FfmpegTranscoder;
use crate::format::OutputConfig;
use crate::metadata::{MetadataOptions, MetadataProgressFn, SkippedItem, fetch_all};
use crate::playlist::{self, PlaylistItem, sanitize_filename, validate_playlist_url};
use crate::selection::SelectionSet;
use crate::workdir::WorkDir;
use crate::ytdlp::YtDlpExtractor;

/// Archive filename used when the playlist has no title.
const DEFAULT_ARCHIVE_NAME: &str = "playlist.zip";

/// Which items a batch covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchMode {
    /// Only the selected items.
    Selected,
    /// Every loaded item.
    All,
}

/// Summary of a resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveReport {
    /// The resolved URL.
    pub url: String,
    /// Playlist title, if reported.
    pub title: Option<String>,
    /// Items now loaded.
    pub item_count: usize,
    /// Items left out because their metadata failed.
    pub skipped: Vec<SkippedItem>,
    /// Soft conditions for the user.
    pub warnings: Vec<Warning>,
}

/// Summary of a finished batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// One outcome per item, in order.
    pub outcomes: Vec<FetchOutcome>,
    /// Items that produced a file.
    pub succeeded: usize,
    /// Items that failed.
    pub failed: usize,
    /// Suggested archive filename.
    pub archive_name: String,
    /// Entry names in the archive.
    pub entries: Vec<String>,
    /// Soft conditions for the user.
    pub warnings: Vec<Warning>,
}

/// A running batch.
#[derive(Debug)]
pub struct BatchHandle {
    events: mpsc::UnboundedReceiver<ProgressEvent>,
    task: JoinHandle<Result<BatchReport>>,
}

impl BatchHandle {
    /// Next progress event, or `None` once the batch is over.
    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        self.events.recv().await
    }

    /// Wait for the batch to finish, discarding unread events.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the batch, if any.
    pub async fn finish(self) -> Result<BatchReport> {
        drop(self.events);
        self.task
            .await
            .map_err(|e| Error::PackagingFailed(format!("batch task ended abnormally: {e}")))?
    }
}

#[derive(Debug, Default)]
struct SessionState {
    generation: u64,
    cancel: Option<Arc<AtomicBool>>,
    url: Option<String>,
    title: Option<String>,
    items: Vec<PlaylistItem>,
    selection: SelectionSet,
    archive: Option<ArchiveHandle>,
    batch_running: bool,
}

impl SessionState {
    fn supersede(&mut self) {
        self.generation += 1;
        if let Some(flag) = self.cancel.take() {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

/// Interactive session over one playlist at a time.
#[derive(Clone)]
pub struct Session {
    extractor: Arc<dyn MediaExtractor>,
    transcoder: Arc<dyn Transcoder>,
    config: Arc<AppConfig>,
    state: Arc<RwLock<SessionState>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session over the given capabilities.
    #[must_use]
    pub fn new(
        extractor: Arc<dyn MediaExtractor>,
        transcoder: Arc<dyn Transcoder>,
        config: AppConfig,
    ) -> Self {
        Self {
            extractor,
            transcoder,
            config: Arc::new(config),
            state: Arc::new(RwLock::new(SessionState::default())),
        }
    }

    /// Create a session using `yt-dlp` and `ffmpeg` as configured.
    #[must_use]
    pub fn from_config(config: AppConfig) -> Self {
        let extractor = YtDlpExtractor::new(config.ytdlp_path.clone(), config.ffmpeg_path.clone());
        let transcoder = FfmpegTranscoder::new(config.ffmpeg_path.clone());
        Self::new(Arc::new(extractor), Arc::new(transcoder), config)
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Resolve a playlist and fetch metadata for its items.
    ///
    /// Replaces the loaded items and resets the selection. A resolve that
    /// is overtaken by a newer one fails with [`Error::Superseded`] and
    /// leaves the newer one's state alone.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`], [`Error::EmptyPlaylist`],
    /// [`Error::ResolutionFailed`] or [`Error::Superseded`].
    pub async fn resolve(
        &self,
        url: &str,
        on_progress: Option<&MetadataProgressFn<'_>>,
    ) -> Result<ResolveReport> {
        let url = validate_playlist_url(url)?;
        let timeout = self.config.network_timeout();

        let (generation, cancel) = {
            let mut state = self.state.write().await;
            state.supersede();
            let flag = Arc::new(AtomicBool::new(false));
            state.cancel = Some(Arc::clone(&flag));
            state.url = Some(url.clone());
            state.title = None;
            state.items.clear();
            state.selection = SelectionSet::default();
            (state.generation, flag)
        };
        debug!("Resolve generation {} for {}", generation, url);

        let resolved = playlist::resolve(self.extractor.as_ref(), &url, timeout).await;
        if self.state.read().await.generation != generation {
            info!("Discarding superseded resolve of {}", url);
            return Err(Error::Superseded { url });
        }
        let resolved = resolved?;

        let options = MetadataOptions {
            concurrency: self.config.metadata_concurrency,
            timeout,
            cancel: Some(cancel),
        };
        let report = fetch_all(
            Arc::clone(&self.extractor),
            resolved.entries,
            &options,
            on_progress,
        )
        .await;

        let mut state = self.state.write().await;
        if report.cancelled || state.generation != generation {
            info!("Discarding superseded resolve of {}", url);
            return Err(Error::Superseded { url });
        }

        let warnings = report.warnings();
        for warning in &warnings {
            warn!("{}", warning);
        }
        state.cancel = None;
        state.title.clone_from(&resolved.title);
        state.selection = SelectionSet::new(report.items.iter().map(|i| i.id.clone()));
        state.items = report.items;

        info!("Loaded {} items from {}", state.items.len(), url);
        Ok(ResolveReport {
            url,
            title: resolved.title,
            item_count: state.items.len(),
            skipped: report.skipped,
            warnings,
        })
    }

    /// Items of the last successful resolve, in playlist order.
    pub async fn items(&self) -> Vec<PlaylistItem> {
        self.state.read().await.items.clone()
    }

    /// Title of the loaded playlist.
    pub async fn title(&self) -> Option<String> {
        self.state.read().await.title.clone()
    }


    /// Mark one item as wanted or not.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownItem`] if `id` is not loaded.
    pub async fn toggle_selection(&self, id: &str, wanted: bool) -> Result<()> {
        self.state.write().await.selection.set_wanted(id, wanted)
    }

    /// Want every loaded item.
    pub async fn select_all(&self) {
        self.state.write().await.selection.select_all();
    }

    /// Want nothing.
    pub async fn clear_all(&self) {
        self.state.write().await.selection.clear_all();
    }

    /// Ids currently wanted.
    pub async fn selected_ids(&self) -> HashSet<String> {
        self.state.read().await.selection.wanted_ids()
    }

    /// Start fetching the items chosen by `mode`.
    ///
    /// Progress arrives through the returned handle; the archive becomes
    /// available through [`Session::take_archive`] once the batch is over.
    /// Starting a batch discards any archive not yet retrieved.
    ///
    /// # Errors
    ///
    /// - [`Error::NothingToDownload`] when no item is chosen
    /// - [`Error::InvalidInput`] for an invalid output or while another batch runs
    /// - [`Error::FileSystem`] if the working directory cannot be created
    pub async fn start_batch(&self, mode: BatchMode, output: OutputConfig) -> Result<BatchHandle> {
        output.validate()?;

        let (targets, archive_name) = {
            let mut state = self.state.write().await;
            if state.batch_running {
                return Err(Error::InvalidInput(
                    "A batch is already running".to_string(),
                ));
            }
            let targets: Vec<BatchTarget> = state
                .items
                .iter()
                .filter(|item| mode == BatchMode::All || state.selection.is_wanted(&item.id))
                .map(BatchTarget::from_item)
                .collect();
            if targets.is_empty() {
                return Err(Error::NothingToDownload);
            }
            if state.archive.take().is_some() {
                debug!("Dropping unretrieved archive");
            }
            state.batch_running = true;
            (targets, suggested_archive_name(state.title.as_deref()))
        };

        let work_dir = match WorkDir::create(&self.config.work_root) {
            Ok(dir) => dir,
            Err(e) => {
                self.state.write().await.batch_running = false;
                return Err(e);
            }
        };

        info!("Starting {:?} batch of {} items", mode, targets.len());
        let (tx, rx) = mpsc::unbounded_channel();
        let session = self.clone();
        let state = Arc::clone(&self.state);
        let task = tokio::spawn(async move {
            // The inner task may panic; the flag is cleared either way.
            let batch = tokio::spawn(async move {
                session
                    .execute_batch(targets, output, work_dir, archive_name, &tx)
                    .await
            });
            let result = batch
                .await
                .map_err(|e| Error::PackagingFailed(format!("batch task ended abnormally: {e}")))
                .and_then(|r| r);
            state.write().await.batch_running = false;
            if let Err(e) = &result {
                error!("Batch failed: {}", e);
            }
            result
        });

        Ok(BatchHandle { events: rx, task })
    }

    async fn execute_batch(
        &self,
        targets: Vec<BatchTarget>,
        output: OutputConfig,
        work_dir: WorkDir,
        archive_name: String,
        events: &EventSender,
    ) -> Result<BatchReport> {
        let options = BatchOptions {
            timeout: self.config.network_timeout(),
        };
        let result = run_batch(
            self.extractor.as_ref(),
            self.transcoder.as_ref(),
            &targets,
            &output,
            work_dir,
            &options,
            Some(events),
        )
        .await?;

        let succeeded = result.succeeded();
        let failed = result.failed();
        emit(Some(events), ProgressEvent::Packaging { files: succeeded });

        let work_path: PathBuf = result.work_dir.path().to_path_buf();
        let dest = self.config.work_root.clone();
        let name = archive_name.clone();
        let packaged =
            tokio::task::spawn_blocking(move || package_archive(&work_path, &dest, &name))
                .await
                .map_err(|e| Error::PackagingFailed(format!("packaging task failed: {e}")))
                .and_then(|r| r);

        if let Err(e) = result.work_dir.close() {
            warn!("{}", e);
        }
        let archive = packaged?;

        let entries = archive.entries().to_vec();
        let warnings = summarize(&result.outcomes);
        for warning in &warnings {
            warn!("{}", warning);
        }

        self.state.write().await.archive = Some(archive);
        emit(
            Some(events),
            ProgressEvent::ArchiveReady {
                file_name: archive_name.clone(),
                entries: entries.clone(),
            },
        );
        emit(Some(events), ProgressEvent::BatchFinished { succeeded, failed });

        Ok(BatchReport {
            outcomes: result.outcomes,
            succeeded,
            failed,
            archive_name,
            entries,
            warnings,
        })
    }

    /// Hand over the archive of the last batch. Only the first call after a
    /// batch returns it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PackagingFailed`] if the archive cannot be read.
    pub async fn take_archive(&self) -> Result<Option<ArchiveDelivery>> {
        self.take_archive_handle()
            .await
            .map(ArchiveHandle::into_delivery)
            .transpose()
    }

    /// Like [`Session::take_archive`], but keeps the archive on disk.
    pub async fn take_archive_handle(&self) -> Option<ArchiveHandle> {
        self.state.write().await.archive.take()
    }

    /// End the session: stop any resolve and delete the undelivered archive.
    pub async fn close(&self) {
        let mut state = self.state.write().await;
        state.supersede();
        state.items.clear();
        state.selection = SelectionSet::default();
        state.title = None;
        if state.archive.take().is_some() {
            debug!("Deleted undelivered archive");
        }
        match state.url.take() {
            Some(url) => info!("Session for {} closed", url),
            None => info!("Session closed"),
        }
    }
}

/// Archive filename for a playlist title.
#[must_use]
pub fn suggested_archive_name(title: Option<&str>) -> String {
    title
        .filter(|t| !t.trim().is_empty())
        .map_or_else(
            || DEFAULT_ARCHIVE_NAME.to_string(),
            |t| format!("{}.zip", sanitize_filename(t)),
        )
}
