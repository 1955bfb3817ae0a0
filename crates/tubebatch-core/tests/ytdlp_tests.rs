//! Tests for the yt-dlp extractor, scripted and against the real binaries.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use tubebatch_core::{
    AppConfig, BatchMode, FfmpegTranscoder, MediaExtractor, OutputConfig, Session,
    YtDlpExtractor,
};

const PLAYLIST_URL: &str = "https://www.youtube.com/playlist?list=PLw-VjHDlEOgvtnnnqWlTqByAtC7tXBg6D";

/// Downloads driven by a shell script standing in for yt-dlp.
#[cfg(unix)]
mod scripted {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    use tubebatch_core::{
        Error, FetchedPayload, MediaExtractor, PayloadProgress, PayloadProgressCallback,
        PayloadRequest, PayloadStatus, YtDlpExtractor,
    };

    /// Write an executable shell script standing in for yt-dlp.
    fn fake_ytdlp(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("yt-dlp");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn download_request(dest_dir: &Path) -> PayloadRequest {
        PayloadRequest {
            url: "https://www.youtube.com/watch?v=x1".to_string(),
            format_spec: "ba/b".to_string(),
            dest_dir: dest_dir.to_path_buf(),
            file_stem: "Song".to_string(),
            merge_container: None,
        }
    }

    fn recording_callback() -> (PayloadProgressCallback, Arc<Mutex<Vec<PayloadProgress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: PayloadProgressCallback = Arc::new(move |p| sink.lock().unwrap().push(p));
        (callback, seen)
    }

    #[tokio::test]
    async fn test_download_reports_progress_written_to_stderr() {
        let temp = tempfile::TempDir::new().unwrap();
        let dest = temp.path().join("x1");
        std::fs::create_dir_all(&dest).unwrap();
        let output = dest.join("Song.webm");

        // Quiet mode: progress on stderr, only the printed path on stdout.
        let script = fake_ytdlp(
            temp.path(),
            &format!(
                "echo '[download]  50.0% of 3.20MiB at 1.00MiB/s ETA 00:02' >&2\n\
                 echo '[download] 100% of 3.20MiB in 00:00:01 at 2.51MiB/s' >&2\n\
                 printf data > '{0}'\n\
                 echo '{0}'",
                output.display()
            ),
        );
        let extractor = YtDlpExtractor::new(Some(script), None);
        let (callback, seen) = recording_callback();

        let payload = extractor
            .fetch_payload(&download_request(&dest), callback)
            .await
            .unwrap();

        assert_eq!(payload, FetchedPayload::Single(output));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].status, PayloadStatus::Downloading);
        assert_eq!(seen[0].percent, Some(50.0));
        assert_eq!(seen[0].eta.as_deref(), Some("00:02"));
        assert_eq!(seen[1].status, PayloadStatus::Finished);
    }

    #[tokio::test]
    async fn test_download_failure_keeps_error_lines_only() {
        let temp = tempfile::TempDir::new().unwrap();
        let script = fake_ytdlp(
            temp.path(),
            "echo '[download]  10.0% of 3.20MiB at 1.00MiB/s ETA 00:09' >&2\n\
             echo 'ERROR: [youtube] x1: Video unavailable' >&2\n\
             exit 1",
        );
        let extractor = YtDlpExtractor::new(Some(script), None);
        let (callback, seen) = recording_callback();

        let err = extractor
            .fetch_payload(&download_request(temp.path()), callback)
            .await
            .unwrap_err();

        match err {
            Error::ItemFetchFailed { reason, .. } => {
                assert!(reason.contains("Video unavailable"));
                assert!(!reason.contains("10.0%"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_missing_binary_fails_resolution() {
    let extractor = YtDlpExtractor::new(Some("/nonexistent/yt-dlp".into()), None);
    let result = extractor.resolve_playlist(PLAYLIST_URL).await;
    assert!(result.is_err());
}

#[tokio::test]
#[ignore = "requires yt-dlp and network access - run with: cargo test --ignored -- --nocapture"]
async fn test_resolve_real_playlist() {
    let extractor = YtDlpExtractor::new(None, None);
    println!("yt-dlp version: {}", extractor.version().await.unwrap());

    let playlist = extractor.resolve_playlist(PLAYLIST_URL).await.unwrap();
    println!("Playlist: {:?} ({} entries)", playlist.title, playlist.entries.len());
    for entry in &playlist.entries {
        println!("  - {:?} ({})", entry.title, entry.id);
    }
    assert!(!playlist.entries.is_empty(), "Should find at least one item");
}

#[tokio::test]
#[ignore = "downloads from YouTube - run with: cargo test --ignored -- --nocapture"]
async fn test_download_first_item_as_audio() {
    let work_root = tempfile::TempDir::new().unwrap();
    let config = AppConfig {
        work_root: work_root.path().to_path_buf(),
        ..AppConfig::default()
    };
    let session = Session::new(
        Arc::new(YtDlpExtractor::new(None, None)),
        Arc::new(FfmpegTranscoder::new(None)),
        config,
    );

    let report = session.resolve(PLAYLIST_URL, None).await.unwrap();
    println!("Resolved {} items", report.item_count);

    let first = session.items().await.remove(0);
    session.toggle_selection(&first.id, true).await.unwrap();

    let batch = session
        .start_batch(BatchMode::Selected, OutputConfig::audio(128))
        .await
        .unwrap();
    let report = batch.finish().await.unwrap();
    println!("Outcomes: {:?}", report.outcomes);
    assert_eq!(report.succeeded, 1);

    let delivery = session.take_archive().await.unwrap().unwrap();
    assert!(delivery.file_name.ends_with(".zip"));
    assert!(!delivery.bytes.is_empty());
}
