//! Playlist resolution and the item model.
//!
//! Resolution is a flat enumeration: it lists item identifiers (and any
//! titles that come for free) without touching per-item detail, so it
//! stays fast for playlists with hundreds of entries.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::extractor::{MediaExtractor, RawItemInfo, ResolvedPlaylist};
use crate::process::with_timeout;

/// Title used when the source does not provide one.
pub const UNTITLED: &str = "Untitled";

/// Maximum length of a sanitized filename, in characters.
const MAX_FILENAME_CHARS: usize = 200;

/// One downloadable unit within a playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistItem {
    /// Identifier, unique within the playlist.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Duration in seconds.
    pub duration_secs: Option<u64>,
    /// Thumbnail URL.
    pub thumbnail_url: Option<String>,
    /// Canonical item URL, derived from `id`.
    pub url: String,
}

impl PlaylistItem {
    /// Build an item from source metadata.
    ///
    /// `fallback_title` comes from the flat enumeration and is used when the
    /// metadata has no title.
    #[must_use]
    pub fn from_info(id: &str, info: RawItemInfo, fallback_title: Option<&str>) -> Self {
        let title = info
            .title
            .filter(|t| !t.trim().is_empty())
            .or_else(|| fallback_title.map(str::to_string))
            .unwrap_or_else(|| UNTITLED.to_string());

        Self {
            id: id.to_string(),
            title,
            duration_secs: info.duration_secs,
            thumbnail_url: info.thumbnail_url,
            url: canonical_item_url(id),
        }
    }

    /// Duration as `m:ss` or `h:mm:ss`, if known.
    #[must_use]
    pub fn formatted_duration(&self) -> Option<String> {
        self.duration_secs.map(format_duration)
    }
}

/// Canonical URL of an item identifier.
#[must_use]
pub fn canonical_item_url(id: &str) -> String {
    format!("https://www.youtube.com/watch?v={id}")
}

/// Validate a playlist URL supplied by the user.
///
/// Accepts any absolute `http(s)` URL; whether it actually points at a
/// playlist is for the extractor to decide.
pub fn validate_playlist_url(url: &str) -> Result<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(Error::InvalidInput("URL cannot be empty".to_string()));
    }

    let parsed = url::Url::parse(url)
        .map_err(|e| Error::InvalidInput(format!("'{url}' is not a valid URL: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::InvalidInput(
            "URL must start with http:// or https://".to_string(),
        ));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(Error::InvalidInput(format!("'{url}' has no host")));
    }

    Ok(url.to_string())
}

/// Enumerate a playlist.
///
/// # Errors
///
/// - [`Error::InvalidInput`] for an empty or malformed URL
/// - [`Error::ResolutionFailed`] when the extractor fails or times out
/// - [`Error::EmptyPlaylist`] when the source reports no entries
pub async fn resolve(
    extractor: &dyn MediaExtractor,
    url: &str,
    timeout: Duration,
) -> Result<ResolvedPlaylist> {
    let url = validate_playlist_url(url)?;
    info!("Resolving playlist {}", url);

    let mut resolved = with_timeout("Playlist enumeration", timeout, extractor.resolve_playlist(&url))
        .await
        .map_err(|e| {
            warn!("Failed to resolve {}: {}", url, e);
            Error::ResolutionFailed {
                url: url.clone(),
                reason: e.to_string(),
            }
        })?;

    let before = resolved.entries.len();
    let mut seen = HashSet::with_capacity(before);
    resolved
        .entries
        .retain(|entry| !entry.id.is_empty() && seen.insert(entry.id.clone()));
    if resolved.entries.len() != before {
        debug!(
            "Dropped {} duplicate or empty entries",
            before - resolved.entries.len()
        );
    }

    if resolved.entries.is_empty() {
        return Err(Error::EmptyPlaylist { url });
    }

    info!("Resolved {} items", resolved.entries.len());
    Ok(resolved)
}

/// Identifiers of a resolved playlist, in source order.
#[must_use]
pub fn item_ids(resolved: &ResolvedPlaylist) -> Vec<String> {
    resolved.entries.iter().map(|e| e.id.clone()).collect()
}

/// Sanitize a string for use as a filename.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let invalid_chars = ['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'];

    let sanitized: String = name
        .chars()
        .map(|c| {
            if invalid_chars.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    // Trim whitespace and dots from ends
    let trimmed = sanitized.trim().trim_matches('.');

    // Limit length (leaving room for extension)
    let limited: String = trimmed.chars().take(MAX_FILENAME_CHARS).collect();
    let limited = limited.trim_end().to_string();

    if limited.is_empty() {
        UNTITLED.to_string()
    } else {
        limited
    }
}

/// Format duration in seconds as a human-readable string.
#[must_use]
pub fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}
