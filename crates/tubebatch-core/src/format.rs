//! Output format and quality selection.
//!
//! Maps an [`OutputConfig`] to the format selector understood by the
//! extractor. Video tiers cap the stream height and prefer a separate
//! video+audio pair that can be merged, falling back to the best single
//! stream when nothing satisfies the cap. Audio always takes the best audio
//! stream and is transcoded afterwards.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default bitrate for audio extraction, in kbps.
pub const DEFAULT_AUDIO_BITRATE_KBPS: u32 = 192;

/// Named upper bound on video resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VideoQuality {
    /// Unconstrained.
    #[default]
    #[serde(rename = "best")]
    Best,
    /// At most 1080 lines.
    #[serde(rename = "1080p")]
    P1080,
    /// At most 720 lines.
    #[serde(rename = "720p")]
    P720,
    /// At most 480 lines.
    #[serde(rename = "480p")]
    P480,
    /// At most 360 lines.
    #[serde(rename = "360p")]
    P360,
}

impl VideoQuality {
    /// All tiers, from best to worst.
    pub const ALL: [Self; 5] = [Self::Best, Self::P1080, Self::P720, Self::P480, Self::P360];

    /// Height bound of the tier, `None` for [`VideoQuality::Best`].
    #[must_use]
    pub const fn max_height(self) -> Option<u32> {
        match self {
            Self::Best => None,
            Self::P1080 => Some(1080),
            Self::P720 => Some(720),
            Self::P480 => Some(480),
            Self::P360 => Some(360),
        }
    }

    /// Short label, as accepted by [`FromStr`].
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Best => "best",
            Self::P1080 => "1080p",
            Self::P720 => "720p",
            Self::P480 => "480p",
            Self::P360 => "360p",
        }
    }
}

impl std::fmt::Display for VideoQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for VideoQuality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|q| q.label() == normalized || q.label().trim_end_matches('p') == normalized)
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "Unknown quality '{s}', expected one of: best, 1080p, 720p, 480p, 360p"
                ))
            })
    }
}

/// Target container for video output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoContainer {
    /// MPEG-4.
    #[default]
    Mp4,
    /// Matroska.
    Mkv,
}

impl VideoContainer {
    /// File extension of the container.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mkv => "mkv",
        }
    }
}

/// Target codec for audio output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    /// MPEG-1 Layer III.
    #[default]
    Mp3,
    /// AAC in an m4a container.
    M4a,
}

impl AudioCodec {
    /// File extension of the encoded file.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
        }
    }
}

/// What a batch produces for every item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum OutputConfig {
    /// Video with audio, capped at a quality tier.
    Video {
        /// Resolution cap.
        #[serde(default)]
        quality: VideoQuality,
        /// Container every output is normalized to.
        #[serde(default)]
        container: VideoContainer,
    },
    /// Audio only, transcoded to a fixed codec and bitrate.
    Audio {
        /// Target codec.
        #[serde(default)]
        codec: AudioCodec,
        /// Target bitrate in kbps.
        #[serde(default = "default_bitrate")]
        bitrate_kbps: u32,
    },
}

const fn default_bitrate() -> u32 {
    DEFAULT_AUDIO_BITRATE_KBPS
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::video(VideoQuality::Best)
    }
}

impl OutputConfig {
    /// Video output in mp4 at the given tier.
    #[must_use]
    pub const fn video(quality: VideoQuality) -> Self {
        Self::Video {
            quality,
            container: VideoContainer::Mp4,
        }
    }

    /// Audio output as mp3 at the given bitrate.
    #[must_use]
    pub const fn audio(bitrate_kbps: u32) -> Self {
        Self::Audio {
            codec: AudioCodec::Mp3,
            bitrate_kbps,
        }
    }

    /// Format selector passed to the extractor.
    #[must_use]
    pub fn format_spec(&self) -> String {
        match self {
            Self::Video { quality, .. } => match quality.max_height() {
                None => "bv*+ba/b".to_string(),
                Some(h) => format!("bv*[height<={h}]+ba/b[height<={h}]/bv*+ba/b"),
            },
            Self::Audio { .. } => "ba/b".to_string(),
        }
    }

    /// Extension of the final output files.
    #[must_use]
    pub const fn target_extension(&self) -> &'static str {
        match self {
            Self::Video { container, .. } => container.extension(),
            Self::Audio { codec, .. } => codec.extension(),
        }
    }

    /// Whether this produces audio only.
    #[must_use]
    pub const fn is_audio(&self) -> bool {
        matches!(self, Self::Audio { .. })
    }

    /// Validate user-supplied values.
    pub fn validate(&self) -> crate::Result<()> {
        if let Self::Audio { bitrate_kbps, .. } = self
            && !(32..=320).contains(bitrate_kbps)
        {
            return Err(Error::InvalidInput(format!(
                "Audio bitrate must be between 32 and 320 kbps, got {bitrate_kbps}"
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for OutputConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video { quality, container } => {
                write!(f, "video {quality} ({})", container.extension())
            }
            Self::Audio {
                codec,
                bitrate_kbps,
            } => write!(f, "audio {} @ {bitrate_kbps} kbps", codec.extension()),
        }
    }
}
