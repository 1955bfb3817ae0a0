//! [`MediaExtractor`] backed by the `yt-dlp` executable.
//!
//! Enumeration and metadata read one JSON document from stdout.
//! Payload downloads run with `--newline` so that every progress update
//! arrives as its own line, and `--print after_move:filepath` so the final
//! path is reported once post-processing is done. Progress lines are read
//! from both streams.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::extractor::{
    FetchedPayload, MediaExtractor, PayloadProgress, PayloadProgressCallback, PayloadRequest,
    PayloadStatus, RawItemInfo, RawPlaylistEntry, ResolvedPlaylist,
};
use crate::process::{command, run_output, spawn_error, stderr_tail};

const TOOL: &str = "yt-dlp";

/// Non-progress stderr lines kept for error messages.
const STDERR_KEPT_LINES: usize = 32;

/// `[download]  12.5% of ~ 310.04MiB at  374.36KiB/s ETA 11:59 (frag 56/454)`
#[allow(clippy::expect_used)]
static PROGRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[download\]\s+(\d+(?:\.\d+)?)%\s+of\s+~?\s*\S+(?:\s+at\s+(\S+))?(?:\s+ETA\s+(\S+))?",
    )
    .expect("valid progress pattern")
});

/// `[download] 100% of 3.20MiB in 00:00:01 at 2.5MiB/s`
#[allow(clippy::expect_used)]
static FINISHED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[download\]\s+100(?:\.0)?%\s+of\s+~?\s*\S+\s+in\s+")
        .expect("valid finished pattern")
});

/// `[download] <file> has already been downloaded`
#[allow(clippy::expect_used)]
static ALREADY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[download\].*has already been downloaded")
        .expect("valid already-downloaded pattern")
});

/// Process-based extractor using `yt-dlp`.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    program: PathBuf,
    ffmpeg_location: Option<PathBuf>,
}

impl Default for YtDlpExtractor {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl YtDlpExtractor {
    /// Create an extractor. `None` means "look up in PATH".
    #[must_use]
    pub fn new(program: Option<PathBuf>, ffmpeg_location: Option<PathBuf>) -> Self {
        Self {
            program: program.unwrap_or_else(|| PathBuf::from(TOOL)),
            ffmpeg_location,
        }
    }

    /// Path or name of the executable.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Report the installed version, e.g. `2025.01.15`.
    pub async fn version(&self) -> Result<String> {
        let mut cmd = command(&self.program);
        cmd.arg("--version");
        let output = run_output(TOOL, cmd).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn dump_json(&self, args: &[&str], url: &str) -> Result<Vec<u8>> {
        let mut cmd = command(&self.program);
        cmd.args(["--no-warnings", "--ignore-config"])
            .args(args)
            .arg("--")
            .arg(url);
        let output = run_output(TOOL, cmd).await?;
        Ok(output.stdout)
    }

    fn payload_args(&self, request: &PayloadRequest) -> Vec<String> {
        let template = request
            .dest_dir
            .join(format!("{}.%(ext)s", escape_template(&request.file_stem)));

        let mut args: Vec<String> = [
            "--ignore-config",
            "--newline",
            "--no-playlist",
            "--no-mtime",
            "--progress",
            "--print",
            "after_move:filepath",
            "-f",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        args.push(request.format_spec.clone());
        args.push("-o".to_string());
        args.push(template.to_string_lossy().into_owned());

        if let Some(container) = request.merge_container {
            args.push("--merge-output-format".to_string());
            args.push(container.extension().to_string());
        }
        if let Some(ffmpeg) = &self.ffmpeg_location {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.to_string_lossy().into_owned());
        }
        args.push("--".to_string());
        args.push(request.url.clone());
        args
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn resolve_playlist(&self, url: &str) -> Result<ResolvedPlaylist> {
        info!("Enumerating playlist: {}", url);
        let stdout = self
            .dump_json(&["--flat-playlist", "--dump-single-json"], url)
            .await?;
        let resolved = parse_flat_playlist(&stdout)?;
        info!(
            "Playlist '{}' has {} entries",
            resolved.title.as_deref().unwrap_or("untitled"),
            resolved.entries.len()
        );
        Ok(resolved)
    }

    async fn fetch_item_info(&self, url: &str) -> Result<RawItemInfo> {
        debug!("Fetching item info: {}", url);
        let stdout = self
            .dump_json(&["--no-playlist", "--skip-download", "--dump-json"], url)
            .await?;
        parse_item_info(&stdout)
    }

    async fn fetch_payload(
        &self,
        request: &PayloadRequest,
        on_progress: PayloadProgressCallback,
    ) -> Result<FetchedPayload> {
        info!("Downloading {} ({})", request.url, request.format_spec);

        let mut child = command(&self.program)
            .args(self.payload_args(request))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(TOOL, &e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::tool(TOOL, "failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::tool(TOOL, "failed to capture stderr"))?;

        // `--print` puts yt-dlp in quiet mode, which moves progress to stderr.
        let stderr_progress = Arc::clone(&on_progress);
        let stderr_task = tokio::spawn(async move {
            let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_KEPT_LINES);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(progress) = parse_progress_line(&line) {
                    stderr_progress(progress);
                } else {
                    if tail.len() == STDERR_KEPT_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            Vec::from(tail).join("\n").into_bytes()
        });

        let mut final_path: Option<PathBuf> = None;
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(progress) = parse_progress_line(&line) {
                on_progress(progress);
            } else if let Some(path) = parse_printed_path(&line) {
                final_path = Some(path);
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(Error::ItemFetchFailed {
                url: request.url.clone(),
                reason: stderr_tail(&stderr),
            });
        }

        let path = final_path.ok_or_else(|| Error::ItemFetchFailed {
            url: request.url.clone(),
            reason: "yt-dlp did not report an output file".to_string(),
        })?;
        if !path.is_file() {
            warn!("Reported output {} does not exist", path.display());
            return Err(Error::ItemFetchFailed {
                url: request.url.clone(),
                reason: format!("output file {} is missing", path.display()),
            });
        }

        Ok(FetchedPayload::Single(path))
    }
}

#[derive(Debug, Deserialize)]
struct FlatPlaylistJson {
    id: Option<String>,
    title: Option<String>,
    #[serde(rename = "_type")]
    kind: Option<String>,
    entries: Option<Vec<FlatEntryJson>>,
    duration: Option<f64>,
    webpage_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FlatEntryJson {
    id: Option<String>,
    title: Option<String>,
    url: Option<String>,
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ItemJson {
    id: String,
    title: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
}

/// Parse `--flat-playlist --dump-single-json` output.
///
/// A URL pointing at a single video yields a one-entry playlist.
fn parse_flat_playlist(stdout: &[u8]) -> Result<ResolvedPlaylist> {
    let json: FlatPlaylistJson = serde_json::from_slice(stdout)?;

    let entries = match json.entries {
        Some(entries) => entries
            .into_iter()
            .filter_map(|entry| {
                let id = entry.id.filter(|id| !id.is_empty())?;
                Some(RawPlaylistEntry {
                    id,
                    title: entry.title.filter(|t| !is_placeholder_title(t)),
                    url: entry.url,
                    duration_secs: entry.duration.and_then(seconds),
                })
            })
            .collect(),
        None if json.kind.as_deref() != Some("playlist") => json
            .id
            .clone()
            .map(|id| RawPlaylistEntry {
                id,
                title: json.title.clone(),
                url: json.webpage_url.clone(),
                duration_secs: json.duration.and_then(seconds),
            })
            .into_iter()
            .collect(),
        None => Vec::new(),
    };

    Ok(ResolvedPlaylist {
        id: json.id,
        title: json.title,
        entries,
    })
}

/// Parse `--dump-json` output for a single item.
fn parse_item_info(stdout: &[u8]) -> Result<RawItemInfo> {
    let json: ItemJson = serde_json::from_slice(stdout)?;
    Ok(RawItemInfo {
        id: json.id,
        title: json.title,
        duration_secs: json.duration.and_then(seconds),
        thumbnail_url: json.thumbnail,
        webpage_url: json.webpage_url,
    })
}

/// Titles yt-dlp reports for entries it could not inspect.
fn is_placeholder_title(title: &str) -> bool {
    matches!(title, "[Private video]" | "[Deleted video]")
}

fn seconds(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 0.0).then(|| value.round() as u64)
}

/// Parse one output line of a download into a progress update.
fn parse_progress_line(line: &str) -> Option<PayloadProgress> {
    let line = line.trim();
    if FINISHED_RE.is_match(line) || ALREADY_RE.is_match(line) {
        return Some(PayloadProgress::finished());
    }
    let caps = PROGRESS_RE.captures(line)?;
    let percent: f64 = caps.get(1)?.as_str().parse().ok()?;
    Some(PayloadProgress {
        status: PayloadStatus::Downloading,
        percent: Some(percent),
        speed: caps
            .get(2)
            .map(|m| m.as_str().to_string())
            .filter(|s| s != "Unknown"),
        eta: caps
            .get(3)
            .map(|m| m.as_str().to_string())
            .filter(|s| s != "Unknown"),
    })
}

/// Lines printed by `--print after_move:filepath` are bare paths.
fn parse_printed_path(line: &str) -> Option<PathBuf> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('[') {
        return None;
    }
    Some(PathBuf::from(line))
}

/// Escape `%` so a title cannot inject output template fields.
fn escape_template(stem: &str) -> String {
    stem.replace('%', "%%")
}
