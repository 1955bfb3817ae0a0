//! Sequential batch fetching.
//!
//! Items are fetched one at a time, in order, into their own subdirectory
//! of the batch [`WorkDir`]. A failing item is recorded as
//! [`FetchOutcome::Failed`] and the batch moves on; only an empty batch
//! is an error.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::DEFAULT_NETWORK_TIMEOUT_SECS;
use crate::error::{Error, Result, Warning};
use crate::extractor::{
    FetchedPayload, MediaExtractor, PayloadProgress, PayloadProgressCallback, PayloadRequest,
    Transcoder,
};
use crate::format::OutputConfig;
use crate::playlist::{PlaylistItem, sanitize_filename};
use crate::process::with_timeout;
use crate::workdir::WorkDir;

/// Channel end receiving [`ProgressEvent`]s.
pub type EventSender = mpsc::UnboundedSender<ProgressEvent>;

/// One item to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTarget {
    /// Item identifier.
    pub id: String,
    /// Item URL.
    pub url: String,
    /// Title used for the output filename. Falls back to the id.
    pub title: Option<String>,
}

impl BatchTarget {
    /// Target for a resolved item.
    #[must_use]
    pub fn from_item(item: &PlaylistItem) -> Self {
        Self {
            id: item.id.clone(),
            url: item.url.clone(),
            title: Some(item.title.clone()),
        }
    }

    fn file_stem(&self) -> String {
        sanitize_filename(self.title.as_deref().unwrap_or(&self.id))
    }
}

/// What happened to one item of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchOutcome {
    /// The item produced a file.
    Succeeded {
        /// Item identifier.
        id: String,
        /// Item URL.
        url: String,
        /// Output file, relative to the working directory.
        file: PathBuf,
    },
    /// The item produced nothing.
    Failed {
        /// Item identifier.
        id: String,
        /// Item URL.
        url: String,
        /// Why it failed.
        reason: String,
    },
}

impl FetchOutcome {
    /// Item identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Succeeded { id, .. } | Self::Failed { id, .. } => id,
        }
    }

    /// Item URL.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Succeeded { url, .. } | Self::Failed { url, .. } => url,
        }
    }

    /// Whether the item produced a file.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Completed/total counter for a batch. Never decreases, never exceeds `total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// Items finished, successfully or not.
    pub completed: usize,
    /// Items in the batch.
    pub total: usize,
}

impl BatchProgress {
    /// Progress of a batch that has not started.
    #[must_use]
    pub const fn new(total: usize) -> Self {
        Self {
            completed: 0,
            total,
        }
    }

    /// Count one more finished item.
    pub fn advance(&mut self) {
        self.completed = (self.completed + 1).min(self.total);
    }

    /// Progress as a fraction (0.0 - 1.0).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }

    /// Whether every item has finished.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.completed >= self.total
    }
}

/// Events emitted while a batch runs.
///
/// Events of one item are always emitted before the next item starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ProgressEvent {
    /// The batch started.
    BatchStarted {
        /// Items in the batch.
        total: usize,
    },
    /// An item started fetching.
    ItemStarted {
        /// Position in the batch (0-based).
        index: usize,
        /// Item identifier.
        id: String,
        /// Item title, if known.
        title: Option<String>,
    },
    /// Transfer progress of the current item.
    ItemProgress {
        /// Position in the batch (0-based).
        index: usize,
        /// Item identifier.
        id: String,
        /// Transfer progress.
        progress: PayloadProgress,
    },
    /// An item finished.
    ItemFinished {
        /// Position in the batch (0-based).
        index: usize,
        /// What happened.
        outcome: FetchOutcome,
        /// Batch progress after this item.
        progress: BatchProgress,
    },
    /// The archive is being built.
    Packaging {
        /// Files going into the archive.
        files: usize,
    },
    /// The archive is ready for retrieval.
    ArchiveReady {
        /// Suggested archive filename.
        file_name: String,
        /// Entry names in the archive.
        entries: Vec<String>,
    },
    /// The batch is over.
    BatchFinished {
        /// Items that produced a file.
        succeeded: usize,
        /// Items that failed.
        failed: usize,
    },
}

/// Batch tunables.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Time limit for each extractor or transcoder call.
    pub timeout: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_NETWORK_TIMEOUT_SECS),
        }
    }
}

/// Result of a batch run.
#[derive(Debug)]
pub struct BatchResult {
    /// One outcome per target, in order.
    pub outcomes: Vec<FetchOutcome>,
    /// Directory holding the produced files.
    pub work_dir: WorkDir,
}

impl BatchResult {
    /// Number of items that produced a file.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Number of items that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Soft conditions worth telling the user about.
    #[must_use]
    pub fn warnings(&self) -> Vec<Warning> {
        summarize(&self.outcomes)
    }
}

/// Warnings for a list of outcomes.
#[must_use]
pub fn summarize(outcomes: &[FetchOutcome]) -> Vec<Warning> {
    let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
    let failed = outcomes.len() - succeeded;
    let mut warnings = Vec::new();
    if failed > 0 && succeeded > 0 {
        warnings.push(Warning::BatchPartialFailure { succeeded, failed });
    }
    if succeeded == 0 && !outcomes.is_empty() {
        warnings.push(Warning::EmptyArchive);
    }
    warnings
}

/// Best-effort event emission; a closed receiver is not an error.
pub(crate) fn emit(events: Option<&EventSender>, event: ProgressEvent) {
    if let Some(tx) = events
        && tx.send(event).is_err()
    {
        debug!("Progress receiver dropped");
    }
}

/// Fetch every target in order into `work_dir`.
///
/// # Errors
///
/// Returns [`Error::NothingToDownload`] if `targets` is empty and
/// [`Error::InvalidInput`] if `output` is invalid. Per-item failures are
/// recorded in the outcomes instead.
pub async fn run_batch(
    extractor: &dyn MediaExtractor,
    transcoder: &dyn Transcoder,
    targets: &[BatchTarget],
    output: &OutputConfig,
    work_dir: WorkDir,
    options: &BatchOptions,
    events: Option<&EventSender>,
) -> Result<BatchResult> {
    if targets.is_empty() {
        return Err(Error::NothingToDownload);
    }
    output.validate()?;

    let total = targets.len();
    let started = Instant::now();
    info!("Starting batch of {} items as {}", total, output);
    emit(events, ProgressEvent::BatchStarted { total });

    let mut progress = BatchProgress::new(total);
    let mut outcomes = Vec::with_capacity(total);

    for (index, target) in targets.iter().enumerate() {
        info!("[{}/{}] Fetching {}", index + 1, total, target.id);
        emit(
            events,
            ProgressEvent::ItemStarted {
                index,
                id: target.id.clone(),
                title: target.title.clone(),
            },
        );

        let on_progress = progress_forwarder(events, index, &target.id);
        let outcome = match fetch_one(
            extractor,
            transcoder,
            target,
            output,
            &work_dir,
            options.timeout,
            on_progress,
        )
        .await
        {
            Ok(file) => {
                let file = file
                    .strip_prefix(work_dir.path())
                    .map(Path::to_path_buf)
                    .unwrap_or(file);
                info!("[{}/{}] Saved {}", index + 1, total, file.display());
                FetchOutcome::Succeeded {
                    id: target.id.clone(),
                    url: target.url.clone(),
                    file,
                }
            }
            Err(e) => {
                error!("[{}/{}] {} failed: {}", index + 1, total, target.id, e);
                discard_item_dir(&work_dir.item_dir(&target.id)).await;
                FetchOutcome::Failed {
                    id: target.id.clone(),
                    url: target.url.clone(),
                    reason: e.to_string(),
                }
            }
        };

        progress.advance();
        emit(
            events,
            ProgressEvent::ItemFinished {
                index,
                outcome: outcome.clone(),
                progress,
            },
        );
        outcomes.push(outcome);
    }

    let result = BatchResult {
        outcomes,
        work_dir,
    };
    info!(
        "Batch finished in {:.1}s: {} succeeded, {} failed",
        started.elapsed().as_secs_f64(),
        result.succeeded(),
        result.failed()
    );
    Ok(result)
}

fn progress_forwarder(
    events: Option<&EventSender>,
    index: usize,
    id: &str,
) -> PayloadProgressCallback {
    let events = events.cloned();
    let id = id.to_string();
    Arc::new(move |progress: PayloadProgress| {
        emit(
            events.as_ref(),
            ProgressEvent::ItemProgress {
                index,
                id: id.clone(),
                progress,
            },
        );
    })
}

/// Fetch and post-process one item, returning the absolute output path.
async fn fetch_one(
    extractor: &dyn MediaExtractor,
    transcoder: &dyn Transcoder,
    target: &BatchTarget,
    output: &OutputConfig,
    work_dir: &WorkDir,
    timeout: Duration,
    on_progress: PayloadProgressCallback,
) -> Result<PathBuf> {
    let item_dir = work_dir.item_dir(&target.id);
    tokio::fs::create_dir_all(&item_dir)
        .await
        .map_err(|e| Error::file_system(&item_dir, e))?;

    let stem = target.file_stem();
    let merge_container = match output {
        OutputConfig::Video { container, .. } => Some(*container),
        OutputConfig::Audio { .. } => None,
    };
    let request = PayloadRequest {
        url: target.url.clone(),
        format_spec: output.format_spec(),
        dest_dir: item_dir.clone(),
        file_stem: stem.clone(),
        merge_container,
    };

    let payload = with_timeout(
        format!("Download of {}", target.id),
        timeout,
        extractor.fetch_payload(&request, on_progress),
    )
    .await?;
    debug!("Fetched {:?}", payload);

    let (produced, sources) = match (*output, payload) {
        (
            OutputConfig::Audio {
                codec,
                bitrate_kbps,
            },
            FetchedPayload::Single(source),
        ) => {
            let out = with_timeout(
                format!("Transcoding {}", target.id),
                timeout,
                transcoder.transcode(&source, codec, bitrate_kbps),
            )
            .await?;
            (out, vec![source])
        }
        (
            OutputConfig::Audio {
                codec,
                bitrate_kbps,
            },
            FetchedPayload::Separate { video, audio },
        ) => {
            let out = with_timeout(
                format!("Transcoding {}", target.id),
                timeout,
                transcoder.transcode(&audio, codec, bitrate_kbps),
            )
            .await?;
            (out, vec![video, audio])
        }
        (OutputConfig::Video { container, .. }, FetchedPayload::Single(source)) => {
            let out = with_timeout(
                format!("Remuxing {}", target.id),
                timeout,
                transcoder.remux(&source, container),
            )
            .await?;
            (out, vec![source])
        }
        (OutputConfig::Video { container, .. }, FetchedPayload::Separate { video, audio }) => {
            let out = with_timeout(
                format!("Merging {}", target.id),
                timeout,
                transcoder.merge(&video, &audio, container),
            )
            .await?;
            (out, vec![video, audio])
        }
    };

    for source in sources.iter().filter(|s| **s != produced) {
        if let Err(e) = tokio::fs::remove_file(source).await {
            warn!("Failed to remove intermediate {}: {}", source.display(), e);
        }
    }

    let desired = item_dir.join(format!("{stem}.{}", output.target_extension()));
    if produced != desired && !desired.exists() {
        tokio::fs::rename(&produced, &desired)
            .await
            .map_err(|e| Error::file_system(&produced, e))?;
        return Ok(desired);
    }
    Ok(produced)
}

/// Remove whatever a failed item left behind so it cannot reach the archive.
async fn discard_item_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!("Discarded {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to discard {}: {}", dir.display(), e),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use mockall::predicate::eq;
    use tempfile::TempDir;

    use super::*;
    use crate::extractor::{MockMediaExtractor, MockTranscoder};
    use crate::format::{AudioCodec, VideoContainer, VideoQuality};

    fn targets(ids: &[&str]) -> Vec<BatchTarget> {
        ids.iter()
            .map(|id| BatchTarget {
                id: (*id).to_string(),
                url: format!("https://www.youtube.com/watch?v={id}"),
                title: Some(format!("Song {id}")),
            })
            .collect()
    }

    /// Extractor that writes `<stem>.webm` and reports progress.
    fn writing_extractor(failing: &'static [&'static str]) -> MockMediaExtractor {
        let mut extractor = MockMediaExtractor::new();
        extractor
            .expect_fetch_payload()
            .returning(move |request, on_progress| {
                if failing.iter().any(|id| request.url.ends_with(id)) {
                    std::fs::write(request.dest_dir.join("partial.webm.part"), b"x").unwrap();
                    return Err(Error::tool("yt-dlp", "Video unavailable"));
                }
                on_progress(PayloadProgress::downloading(50.0));
                on_progress(PayloadProgress::finished());
                let path = request.dest_dir.join(format!("{}.webm", request.file_stem));
                std::fs::write(&path, b"media").unwrap();
                Ok(FetchedPayload::Single(path))
            });
        extractor
    }

    /// Transcoder that writes the target file next to its input.
    fn writing_transcoder() -> MockTranscoder {
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_transcode()
            .returning(|input, codec, _| {
                let out = input.with_extension(codec.extension());
                std::fs::write(&out, b"audio").unwrap();
                Ok(out)
            });
        transcoder.expect_remux().returning(|input, container| {
            let out = input.with_extension(container.extension());
            std::fs::write(&out, b"video").unwrap();
            Ok(out)
        });
        transcoder
    }

    fn drain(mut rx: mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    mod progress_tests {
        use super::*;

        #[test]
        fn test_progress_saturates_at_total() {
            let mut progress = BatchProgress::new(2);
            progress.advance();
            progress.advance();
            progress.advance();
            assert_eq!(progress.completed, 2);
            assert!(progress.is_complete());
            assert!((progress.fraction() - 1.0).abs() < f64::EPSILON);
        }

        #[test]
        fn test_summarize_partial_failure() {
            let outcomes = vec![
                FetchOutcome::Succeeded {
                    id: "a".into(),
                    url: "u".into(),
                    file: PathBuf::from("a/A.mp3"),
                },
                FetchOutcome::Failed {
                    id: "b".into(),
                    url: "u".into(),
                    reason: "gone".into(),
                },
            ];
            assert_eq!(
                summarize(&outcomes),
                vec![Warning::BatchPartialFailure {
                    succeeded: 1,
                    failed: 1
                }]
            );
        }

        #[test]
        fn test_summarize_all_failed() {
            let outcomes = vec![FetchOutcome::Failed {
                id: "b".into(),
                url: "u".into(),
                reason: "gone".into(),
            }];
            assert_eq!(summarize(&outcomes), vec![Warning::EmptyArchive]);
        }

        #[test]
        fn test_event_serialization_is_tagged() {
            let event = ProgressEvent::BatchStarted { total: 3 };
            let json = serde_json::to_string(&event).unwrap();
            assert_eq!(json, r#"{"type":"BatchStarted","data":{"total":3}}"#);
        }
    }

    mod run_tests {
        use super::*;

        #[tokio::test]
        async fn test_empty_batch_rejected_before_io() {
            let mut extractor = MockMediaExtractor::new();
            extractor.expect_fetch_payload().never();
            let transcoder = MockTranscoder::new();
            let root = TempDir::new().unwrap();
            let work = WorkDir::create(root.path()).unwrap();

            let result = run_batch(
                &extractor,
                &transcoder,
                &[],
                &OutputConfig::default(),
                work,
                &BatchOptions::default(),
                None,
            )
            .await;
            assert!(matches!(result, Err(Error::NothingToDownload)));
        }

        #[tokio::test]
        async fn test_audio_batch_transcodes_and_removes_source() {
            let extractor = writing_extractor(&[]);
            let transcoder = writing_transcoder();
            let root = TempDir::new().unwrap();
            let work = WorkDir::create(root.path()).unwrap();

            let result = run_batch(
                &extractor,
                &transcoder,
                &targets(&["a", "b"]),
                &OutputConfig::audio(192),
                work,
                &BatchOptions::default(),
                None,
            )
            .await
            .unwrap();

            assert_eq!(result.succeeded(), 2);
            match &result.outcomes[0] {
                FetchOutcome::Succeeded { file, .. } => {
                    assert_eq!(file, &PathBuf::from("a").join("Song a.mp3"));
                    assert!(result.work_dir.path().join(file).is_file());
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
            assert!(!result.work_dir.path().join("a").join("Song a.webm").exists());
            assert!(result.warnings().is_empty());
        }

        #[tokio::test]
        async fn test_failure_does_not_abort_batch() {
            let extractor = writing_extractor(&["b"]);
            let transcoder = writing_transcoder();
            let root = TempDir::new().unwrap();
            let work = WorkDir::create(root.path()).unwrap();
            let (tx, rx) = mpsc::unbounded_channel();

            let result = run_batch(
                &extractor,
                &transcoder,
                &targets(&["a", "b", "c"]),
                &OutputConfig::audio(192),
                work,
                &BatchOptions::default(),
                Some(&tx),
            )
            .await
            .unwrap();

            let ids: Vec<(&str, bool)> = result
                .outcomes
                .iter()
                .map(|o| (o.id(), o.is_success()))
                .collect();
            assert_eq!(ids, [("a", true), ("b", false), ("c", true)]);
            assert!(!result.work_dir.path().join("b").exists());
            assert_eq!(
                result.warnings(),
                vec![Warning::BatchPartialFailure {
                    succeeded: 2,
                    failed: 1
                }]
            );

            let finished: Vec<BatchProgress> = drain(rx)
                .into_iter()
                .filter_map(|e| match e {
                    ProgressEvent::ItemFinished { progress, .. } => Some(progress),
                    _ => None,
                })
                .collect();
            let completed: Vec<usize> = finished.iter().map(|p| p.completed).collect();
            assert_eq!(completed, [1, 2, 3]);
            assert!(finished.iter().all(|p| p.total == 3));
        }

        #[tokio::test]
        async fn test_events_do_not_interleave() {
            let extractor = writing_extractor(&[]);
            let transcoder = writing_transcoder();
            let root = TempDir::new().unwrap();
            let work = WorkDir::create(root.path()).unwrap();
            let (tx, rx) = mpsc::unbounded_channel();

            run_batch(
                &extractor,
                &transcoder,
                &targets(&["a", "b"]),
                &OutputConfig::video(VideoQuality::P720),
                work,
                &BatchOptions::default(),
                Some(&tx),
            )
            .await
            .unwrap();

            let events = drain(rx);
            assert!(matches!(events[0], ProgressEvent::BatchStarted { total: 2 }));
            let mut current = None;
            for event in &events[1..] {
                match event {
                    ProgressEvent::ItemStarted { index, .. } => {
                        assert_eq!(current, None);
                        current = Some(*index);
                    }
                    ProgressEvent::ItemProgress { index, .. } => {
                        assert_eq!(current, Some(*index));
                    }
                    ProgressEvent::ItemFinished { index, .. } => {
                        assert_eq!(current, Some(*index));
                        current = None;
                    }
                    other => panic!("unexpected event {other:?}"),
                }
            }
        }

        #[tokio::test]
        async fn test_video_batch_passes_format_spec() {
            let mut extractor = MockMediaExtractor::new();
            extractor
                .expect_fetch_payload()
                .withf(|request, _| {
                    request.format_spec == "bv*[height<=480]+ba/b[height<=480]/bv*+ba/b"
                        && request.merge_container == Some(VideoContainer::Mp4)
                })
                .times(1)
                .returning(|request, _| {
                    let path = request.dest_dir.join(format!("{}.mp4", request.file_stem));
                    std::fs::write(&path, b"video").unwrap();
                    Ok(FetchedPayload::Single(path))
                });
            let mut transcoder = MockTranscoder::new();
            transcoder
                .expect_remux()
                .with(mockall::predicate::always(), eq(VideoContainer::Mp4))
                .returning(|input, _| Ok(input.to_path_buf()));

            let root = TempDir::new().unwrap();
            let work = WorkDir::create(root.path()).unwrap();
            let result = run_batch(
                &extractor,
                &transcoder,
                &targets(&["v1"]),
                &OutputConfig::video(VideoQuality::P480),
                work,
                &BatchOptions::default(),
                None,
            )
            .await
            .unwrap();
            assert_eq!(result.succeeded(), 1);
        }

        #[tokio::test]
        async fn test_separate_streams_are_merged() {
            let mut extractor = MockMediaExtractor::new();
            extractor.expect_fetch_payload().returning(|request, _| {
                let video = request.dest_dir.join("v.f137.mp4");
                let audio = request.dest_dir.join("v.f140.m4a");
                std::fs::write(&video, b"v").unwrap();
                std::fs::write(&audio, b"a").unwrap();
                Ok(FetchedPayload::Separate { video, audio })
            });
            let mut transcoder = MockTranscoder::new();
            transcoder.expect_merge().times(1).returning(|video, _, _| {
                let out = video.with_file_name("merged.mp4");
                std::fs::write(&out, b"av").unwrap();
                Ok(out)
            });

            let root = TempDir::new().unwrap();
            let work = WorkDir::create(root.path()).unwrap();
            let result = run_batch(
                &extractor,
                &transcoder,
                &targets(&["m"]),
                &OutputConfig::Video {
                    quality: VideoQuality::Best,
                    container: VideoContainer::Mp4,
                },
                work,
                &BatchOptions::default(),
                None,
            )
            .await
            .unwrap();

            let dir = result.work_dir.path().join("m");
            let mut names: Vec<String> = std::fs::read_dir(&dir)
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            assert_eq!(names, ["Song m.mp4"]);
        }

        #[tokio::test(start_paused = true)]
        async fn test_timeout_marks_item_failed() {
            struct Stalled;

            #[async_trait::async_trait]
            impl MediaExtractor for Stalled {
                async fn resolve_playlist(
                    &self,
                    _url: &str,
                ) -> Result<crate::extractor::ResolvedPlaylist> {
                    Ok(crate::extractor::ResolvedPlaylist::default())
                }

                async fn fetch_item_info(
                    &self,
                    _url: &str,
                ) -> Result<crate::extractor::RawItemInfo> {
                    Ok(crate::extractor::RawItemInfo::default())
                }

                async fn fetch_payload(
                    &self,
                    _request: &PayloadRequest,
                    _on_progress: PayloadProgressCallback,
                ) -> Result<FetchedPayload> {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(Error::tool("yt-dlp", "unreachable"))
                }
            }

            let transcoder = MockTranscoder::new();
            let root = TempDir::new().unwrap();
            let work = WorkDir::create(root.path()).unwrap();
            let options = BatchOptions {
                timeout: Duration::from_secs(5),
            };

            let result = run_batch(
                &Stalled,
                &transcoder,
                &targets(&["slow"]),
                &OutputConfig::audio(128),
                work,
                &options,
                None,
            )
            .await
            .unwrap();

            match &result.outcomes[0] {
                FetchOutcome::Failed { reason, .. } => assert!(reason.contains("timed out")),
                other => panic!("unexpected outcome: {other:?}"),
            }
            assert_eq!(result.warnings(), vec![Warning::EmptyArchive]);
        }

        #[tokio::test]
        async fn test_progress_events_reach_receiver() {
            let extractor = writing_extractor(&[]);
            let transcoder = writing_transcoder();
            let root = TempDir::new().unwrap();
            let work = WorkDir::create(root.path()).unwrap();
            let (tx, rx) = mpsc::unbounded_channel();

            run_batch(
                &extractor,
                &transcoder,
                &targets(&["p"]),
                &OutputConfig::Audio {
                    codec: AudioCodec::M4a,
                    bitrate_kbps: 128,
                },
                work,
                &BatchOptions::default(),
                Some(&tx),
            )
            .await
            .unwrap();

            let seen: Vec<Option<f64>> = drain(rx)
                .into_iter()
                .filter_map(|e| match e {
                    ProgressEvent::ItemProgress { progress, .. } => Some(progress.percent),
                    _ => None,
                })
                .collect();
            assert_eq!(seen, [Some(50.0), Some(100.0)]);
        }
    }
}
