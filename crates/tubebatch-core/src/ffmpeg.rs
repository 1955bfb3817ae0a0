//! [`Transcoder`] backed by the `ffmpeg` executable.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::extractor::Transcoder;
use crate::format::{AudioCodec, VideoContainer};
use crate::process::{command, run_output};

const TOOL: &str = "ffmpeg";

/// Process-based transcoder using `ffmpeg`.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: PathBuf,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new(None)
    }
}

impl FfmpegTranscoder {
    /// Create a transcoder. `None` means "look up in PATH".
    #[must_use]
    pub fn new(program: Option<PathBuf>) -> Self {
        Self {
            program: program.unwrap_or_else(|| PathBuf::from(TOOL)),
        }
    }

    /// Path or name of the executable.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn run(&self, args: Vec<OsString>, output: &Path) -> Result<()> {
        let mut cmd = command(&self.program);
        cmd.args(["-hide_banner", "-nostdin", "-loglevel", "error", "-y"])
            .args(args)
            .arg(output);
        run_output(TOOL, cmd).await?;
        if !output.is_file() {
            return Err(Error::tool(
                TOOL,
                format!("expected output {} was not written", output.display()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        codec: AudioCodec,
        bitrate_kbps: u32,
    ) -> Result<PathBuf> {
        let output = output_path(input, codec.extension());
        info!(
            "Transcoding {} to {} @ {} kbps",
            input.display(),
            codec.extension(),
            bitrate_kbps
        );

        let encoder = match codec {
            AudioCodec::Mp3 => "libmp3lame",
            AudioCodec::M4a => "aac",
        };
        let args: Vec<OsString> = vec![
            "-i".into(),
            input.into(),
            "-vn".into(),
            "-c:a".into(),
            encoder.into(),
            "-b:a".into(),
            format!("{bitrate_kbps}k").into(),
        ];
        self.run(args, &output).await?;
        Ok(output)
    }

    async fn remux(&self, input: &Path, container: VideoContainer) -> Result<PathBuf> {
        if has_extension(input, container.extension()) {
            debug!("{} is already {}", input.display(), container.extension());
            return Ok(input.to_path_buf());
        }
        let output = output_path(input, container.extension());
        info!("Remuxing {} into {}", input.display(), output.display());

        let args: Vec<OsString> = vec![
            "-i".into(),
            input.into(),
            "-map".into(),
            "0".into(),
            "-c".into(),
            "copy".into(),
        ];
        self.run(args, &output).await?;
        Ok(output)
    }

    async fn merge(
        &self,
        video: &Path,
        audio: &Path,
        container: VideoContainer,
    ) -> Result<PathBuf> {
        let output = output_path(video, container.extension());
        info!(
            "Merging {} + {} into {}",
            video.display(),
            audio.display(),
            output.display()
        );

        let mut args: Vec<OsString> = vec![
            "-i".into(),
            video.into(),
            "-i".into(),
            audio.into(),
            "-map".into(),
            "0:v:0".into(),
            "-map".into(),
            "1:a:0".into(),
            "-c:v".into(),
            "copy".into(),
        ];
        // mp4 cannot carry every source audio codec, so re-encode to aac there
        match container {
            VideoContainer::Mp4 => args.extend(["-c:a".into(), "aac".into()]),
            VideoContainer::Mkv => args.extend(["-c:a".into(), "copy".into()]),
        }
        self.run(args, &output).await?;
        Ok(output)
    }
}

/// Output path next to `input` with a new extension, never equal to `input`.
fn output_path(input: &Path, extension: &str) -> PathBuf {
    let candidate = input.with_extension(extension);
    if candidate == input {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        input.with_file_name(format!("{stem}.out.{extension}"))
    } else {
        candidate
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}
