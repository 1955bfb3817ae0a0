//! Concurrent per-item metadata fetching.
//!
//! One task is spawned per playlist entry and a semaphore bounds how many
//! requests are in flight. Tasks are detached: when the caller stops
//! listening (cancellation or a dropped future) the requests already in
//! flight still run to completion and their results are discarded, while
//! tasks that have not started yet exit without touching the network.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_METADATA_CONCURRENCY, DEFAULT_NETWORK_TIMEOUT_SECS};
use crate::error::{Error, Result, Warning};
use crate::extractor::{MediaExtractor, RawPlaylistEntry};
use crate::playlist::{PlaylistItem, canonical_item_url};
use crate::process::with_timeout;

/// Options for a metadata pass.
#[derive(Debug, Clone)]
pub struct MetadataOptions {
    /// Maximum number of fetches in flight.
    pub concurrency: usize,
    /// Time limit for each fetch.
    pub timeout: Duration,
    /// Set to stop collecting results.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for MetadataOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_METADATA_CONCURRENCY,
            timeout: Duration::from_secs(DEFAULT_NETWORK_TIMEOUT_SECS),
            cancel: None,
        }
    }
}

impl MetadataOptions {
    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

/// Aggregate progress of a metadata pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataProgress {
    /// Fetches that finished, successfully or not.
    pub completed: usize,
    /// Fetches dispatched.
    pub total: usize,
}

/// Callback receiving metadata progress.
pub type MetadataProgressFn<'a> = dyn Fn(MetadataProgress) + Send + Sync + 'a;

/// An entry whose metadata could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    /// Item identifier.
    pub id: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Outcome of a metadata pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataReport {
    /// Items fetched successfully, in playlist order.
    pub items: Vec<PlaylistItem>,
    /// Items that were skipped, in playlist order.
    pub skipped: Vec<SkippedItem>,
    /// Whether collection stopped early because of cancellation.
    pub cancelled: bool,
}

impl MetadataReport {
    /// Skips as warnings for the caller.
    #[must_use]
    pub fn warnings(&self) -> Vec<Warning> {
        self.skipped
            .iter()
            .map(|s| Warning::ItemFetchSkipped {
                id: s.id.clone(),
                reason: s.reason.clone(),
            })
            .collect()
    }
}

/// Fetch metadata for a single entry.
///
/// # Errors
///
/// Returns [`Error::ItemFetchFailed`] when the extractor fails or times out.
pub async fn fetch_metadata(
    extractor: &dyn MediaExtractor,
    entry: &RawPlaylistEntry,
    timeout: Duration,
) -> Result<PlaylistItem> {
    let url = entry
        .url
        .clone()
        .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
        .unwrap_or_else(|| canonical_item_url(&entry.id));

    let info = with_timeout("Metadata fetch", timeout, extractor.fetch_item_info(&url))
        .await
        .map_err(|e| Error::ItemFetchFailed {
            url: url.clone(),
            reason: e.to_string(),
        })?;

    let duration = info.duration_secs.or(entry.duration_secs);
    let mut item = PlaylistItem::from_info(&entry.id, info, entry.title.as_deref());
    item.duration_secs = duration;
    Ok(item)
}

/// Fetch metadata for every entry with bounded concurrency.
///
/// `on_progress` is called after every completion, with `completed`
/// increasing by one each time and ending at `total`.
pub async fn fetch_all(
    extractor: Arc<dyn MediaExtractor>,
    entries: Vec<RawPlaylistEntry>,
    options: &MetadataOptions,
    on_progress: Option<&MetadataProgressFn<'_>>,
) -> MetadataReport {
    let total = entries.len();
    let concurrency = options.concurrency.max(1);
    info!(
        "Fetching metadata for {} items ({} concurrent)",
        total, concurrency
    );

    let ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Result<PlaylistItem>)>();

    for (index, entry) in entries.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let extractor = Arc::clone(&extractor);
        let tx = tx.clone();
        let cancel = options.cancel.clone();
        let timeout = options.timeout;

        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            if cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                debug!("Not starting metadata fetch for {}: cancelled", entry.id);
                return;
            }
            let result = fetch_metadata(extractor.as_ref(), &entry, timeout).await;
            // The receiver is gone when the pass was abandoned.
            let _ = tx.send((index, result));
        });
    }
    drop(tx);

    let mut slots: Vec<Option<std::result::Result<PlaylistItem, String>>> = vec![None; total];
    let mut completed = 0;
    let mut cancelled = false;

    while let Some((index, result)) = rx.recv().await {
        if options.is_cancelled() {
            info!("Metadata pass cancelled after {}/{}", completed, total);
            cancelled = true;
            break;
        }
        completed += 1;
        slots[index] = Some(result.map_err(|e| {
            warn!("Skipping {}: {}", ids[index], e);
            e.to_string()
        }));
        if let Some(callback) = on_progress {
            callback(MetadataProgress { completed, total });
        }
    }

    if !cancelled && options.is_cancelled() {
        cancelled = true;
    }

    let mut report = MetadataReport {
        cancelled,
        ..MetadataReport::default()
    };
    if cancelled {
        return report;
    }

    for (index, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(Ok(item)) => report.items.push(item),
            Some(Err(reason)) => report.skipped.push(SkippedItem {
                id: ids[index].clone(),
                reason,
            }),
            None => {
                // A worker ended without reporting (it panicked).
                completed += 1;
                report.skipped.push(SkippedItem {
                    id: ids[index].clone(),
                    reason: "metadata worker terminated unexpectedly".to_string(),
                });
                if let Some(callback) = on_progress {
                    callback(MetadataProgress { completed, total });
                }
            }
        }
    }

    info!(
        "Metadata complete: {} items, {} skipped",
        report.items.len(),
        report.skipped.len()
    );
    report
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;
    use crate::extractor::{
        FetchedPayload, MockMediaExtractor, PayloadProgressCallback, PayloadRequest, RawItemInfo,
        ResolvedPlaylist,
    };

    fn entries(ids: &[&str]) -> Vec<RawPlaylistEntry> {
        ids.iter().map(|id| RawPlaylistEntry::new(*id)).collect()
    }

    fn info_for(url: &str) -> RawItemInfo {
        let id = url.rsplit('=').next().unwrap_or_default().to_string();
        RawItemInfo {
            title: Some(format!("Title {id}")),
            id,
            duration_secs: Some(60),
            ..Default::default()
        }
    }

    /// Extractor that tracks how many metadata fetches overlap.
    struct SlowExtractor {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        started: AtomicUsize,
        failing: Vec<String>,
        stalling: Vec<String>,
    }

    impl SlowExtractor {
        fn new(failing: &[&str]) -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                started: AtomicUsize::new(0),
                failing: failing.iter().map(|s| (*s).to_string()).collect(),
                stalling: Vec::new(),
            }
        }

        fn stalling(mut self, ids: &[&str]) -> Self {
            self.stalling = ids.iter().map(|s| (*s).to_string()).collect();
            self
        }
    }

    #[async_trait]
    impl MediaExtractor for SlowExtractor {
        async fn resolve_playlist(&self, _url: &str) -> Result<ResolvedPlaylist> {
            Ok(ResolvedPlaylist::default())
        }

        async fn fetch_item_info(&self, url: &str) -> Result<RawItemInfo> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if self.stalling.iter().any(|id| url.ends_with(id.as_str())) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.iter().any(|id| url.ends_with(id.as_str())) {
                return Err(Error::tool("yt-dlp", "Private video"));
            }
            Ok(info_for(url))
        }

        async fn fetch_payload(
            &self,
            request: &PayloadRequest,
            _on_progress: PayloadProgressCallback,
        ) -> Result<FetchedPayload> {
            Err(Error::ItemFetchFailed {
                url: request.url.clone(),
                reason: "not used".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_fetch_metadata_uses_canonical_url() {
        let mut extractor = MockMediaExtractor::new();
        extractor
            .expect_fetch_item_info()
            .withf(|url| url == "https://www.youtube.com/watch?v=abc")
            .times(1)
            .returning(|url| Ok(info_for(url)));

        let entry = RawPlaylistEntry::new("abc");
        let item = fetch_metadata(&extractor, &entry, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(item.id, "abc");
        assert_eq!(item.title, "Title abc");
    }

    #[tokio::test]
    async fn test_fetch_metadata_failure_is_item_error() {
        let mut extractor = MockMediaExtractor::new();
        extractor
            .expect_fetch_item_info()
            .returning(|_| Err(Error::tool("yt-dlp", "Video unavailable")));

        let entry = RawPlaylistEntry::new("gone");
        let err = fetch_metadata(&extractor, &entry, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ItemFetchFailed { .. }));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_fetch_all_keeps_order_and_skips_failures() {
        let extractor = Arc::new(SlowExtractor::new(&["b", "d"]));
        let progress = Mutex::new(Vec::new());
        let record = |p: MetadataProgress| progress.lock().unwrap().push(p);

        let report = fetch_all(
            extractor,
            entries(&["a", "b", "c", "d", "e"]),
            &MetadataOptions::default(),
            Some(&record),
        )
        .await;

        let ids: Vec<&str> = report.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["a", "c", "e"]);
        let skipped: Vec<&str> = report.skipped.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(skipped, ["b", "d"]);
        assert!(!report.cancelled);
        assert_eq!(report.warnings().len(), 2);

        let progress = progress.into_inner().unwrap();
        assert_eq!(progress.len(), 5);
        for (i, p) in progress.iter().enumerate() {
            assert_eq!(p.completed, i + 1);
            assert_eq!(p.total, 5);
        }
    }

    #[tokio::test]
    async fn test_fetch_all_respects_concurrency_bound() {
        let extractor = Arc::new(SlowExtractor::new(&[]));
        let options = MetadataOptions {
            concurrency: 3,
            ..Default::default()
        };
        let ids: Vec<String> = (0..12).map(|i| format!("v{i}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

        let report = fetch_all(
            Arc::clone(&extractor) as Arc<dyn MediaExtractor>,
            entries(&id_refs),
            &options,
            None,
        )
        .await;

        assert_eq!(report.items.len(), 12);
        let max = extractor.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 3, "observed {max} concurrent fetches");
        assert!(max >= 1);
    }

    #[tokio::test]
    async fn test_fetch_all_all_failures_still_completes() {
        let extractor = Arc::new(SlowExtractor::new(&["x", "y"]));
        let count = AtomicUsize::new(0);
        let record = |_: MetadataProgress| {
            count.fetch_add(1, Ordering::SeqCst);
        };

        let report = fetch_all(
            extractor,
            entries(&["x", "y"]),
            &MetadataOptions::default(),
            Some(&record),
        )
        .await;

        assert!(report.items.is_empty());
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_all_cancelled_before_start() {
        let extractor = Arc::new(SlowExtractor::new(&[]));
        let flag = Arc::new(AtomicBool::new(true));
        let options = MetadataOptions {
            cancel: Some(Arc::clone(&flag)),
            ..Default::default()
        };

        let report = fetch_all(
            Arc::clone(&extractor) as Arc<dyn MediaExtractor>,
            entries(&["a", "b", "c"]),
            &options,
            None,
        )
        .await;

        assert!(report.cancelled);
        assert!(report.items.is_empty());
        assert_eq!(extractor.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetch_all_empty() {
        let extractor = Arc::new(SlowExtractor::new(&[]));
        let report = fetch_all(extractor, Vec::new(), &MetadataOptions::default(), None).await;
        assert_eq!(report, MetadataReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_all_stalled_item_becomes_skip() {
        let extractor = Arc::new(SlowExtractor::new(&[]).stalling(&["b"]));
        let options = MetadataOptions {
            concurrency: 3,
            timeout: Duration::from_secs(5),
            cancel: None,
        };

        let report = fetch_all(extractor, entries(&["a", "b", "c"]), &options, None).await;

        let ids: Vec<&str> = report.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].id, "b");
        assert!(report.skipped[0].reason.contains("timed out after 5s"));
        assert!(!report.cancelled);
    }
}
