//! Tubebatch - download a playlist, or part of it, into one zip archive.
//!
//! This binary is a thin presentation layer over `tubebatch-core`: it
//! resolves the playlist, lists its items, applies the selection given on
//! the command line, runs the batch while printing progress, and writes
//! the resulting archive to disk.

mod logging;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::{debug, error, info};
use tubebatch_core::{
    AppConfig, AudioCodec, BatchMode, BatchReport, ConfigManager, FetchOutcome, MetadataProgress,
    OutputConfig, PlaylistItem, ProgressEvent, ResolveReport, Session, VideoContainer,
    VideoQuality,
};

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "tubebatch", version, about)]
struct Args {
    /// Playlist URL.
    url: String,

    /// Download every item (the default when nothing is selected).
    #[arg(long, conflicts_with = "select")]
    all: bool,

    /// Download only these items, by their 1-based position (e.g. 2,4).
    #[arg(long, value_delimiter = ',')]
    select: Vec<usize>,

    /// Only list the playlist items.
    #[arg(long)]
    list: bool,

    /// Output kind.
    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Maximum video quality (best, 1080p, 720p, 480p, 360p).
    #[arg(long)]
    quality: Option<VideoQuality>,

    /// Video container.
    #[arg(long, value_enum)]
    container: Option<ContainerArg>,

    /// Audio codec.
    #[arg(long, value_enum)]
    codec: Option<CodecArg>,

    /// Audio bitrate in kbps.
    #[arg(long)]
    bitrate: Option<u32>,

    /// Where to write the archive (file or existing directory).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Time limit for every network step, in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Number of concurrent metadata fetches.
    #[arg(long)]
    workers: Option<usize>,

    /// Configuration file to use instead of the default one.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Store the effective settings (including --timeout and --workers)
    /// in the configuration file.
    #[arg(long)]
    save_config: bool,

    /// Print machine-readable JSON lines instead of text.
    #[arg(long)]
    json: bool,

    /// Verbose logging on stderr.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Video,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ContainerArg {
    Mp4,
    Mkv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CodecArg {
    Mp3,
    M4a,
}

impl From<ContainerArg> for VideoContainer {
    fn from(arg: ContainerArg) -> Self {
        match arg {
            ContainerArg::Mp4 => Self::Mp4,
            ContainerArg::Mkv => Self::Mkv,
        }
    }
}

impl From<CodecArg> for AudioCodec {
    fn from(arg: CodecArg) -> Self {
        match arg {
            CodecArg::Mp3 => Self::Mp3,
            CodecArg::M4a => Self::M4a,
        }
    }
}

/// Errors reported by the command line front end.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] tubebatch_core::Error),

    #[error("Item {position} does not exist; the playlist has {count} items")]
    SelectionOutOfRange { position: usize, count: usize },

    #[error("No archive was produced")]
    MissingArchive,

    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),

    #[error("Failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code for this error.
    fn exit_code(&self) -> u8 {
        match self {
            Self::SelectionOutOfRange { .. } => 2,
            Self::Core(e) if e.is_user_correctable() => 2,
            _ => 1,
        }
    }
}

/// Exit code when the batch finished but some items failed.
const EXIT_PARTIAL: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let log_config = logging::LoggingConfig::auto(args.verbose).with_ansi(!args.json);
    let _guard = match logging::init(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("warning: file logging disabled: {e}");
            None
        }
    };

    info!("Starting Tubebatch {}", env!("CARGO_PKG_VERSION"));

    match run(&args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(args: &Args) -> Result<u8, CliError> {
    let config = load_config(args)?;
    let output = output_config(args, config.default_output);
    output.validate()?;
    config.prepare_work_root()?;
    debug!("Effective configuration: {:?}", config);

    let session = Session::from_config(config);
    let result = download(&session, args, output).await;
    session.close().await;
    result
}

fn load_config(args: &Args) -> Result<AppConfig, CliError> {
    let mut manager = match &args.config {
        Some(path) => ConfigManager::with_path(path.clone())?,
        None => ConfigManager::new()?,
    };
    let mut config = manager.config().clone();

    if let Some(timeout) = args.timeout {
        config.network_timeout_secs = timeout;
    }
    if let Some(workers) = args.workers {
        config.metadata_concurrency = workers;
    }
    config.validate();

    if args.save_config {
        manager.update(config.clone())?;
        info!("Saved settings to {}", manager.path().display());
    }
    Ok(config)
}

/// Output settings from the flags, falling back to the configured default.
fn output_config(args: &Args, default: OutputConfig) -> OutputConfig {
    let audio = match args.format {
        Some(FormatArg::Audio) => true,
        Some(FormatArg::Video) => false,
        None => default.is_audio(),
    };

    if audio {
        let (codec, bitrate_kbps) = match default {
            OutputConfig::Audio {
                codec,
                bitrate_kbps,
            } => (codec, bitrate_kbps),
            OutputConfig::Video { .. } => (
                AudioCodec::default(),
                tubebatch_core::DEFAULT_AUDIO_BITRATE_KBPS,
            ),
        };
        OutputConfig::Audio {
            codec: args.codec.map_or(codec, AudioCodec::from),
            bitrate_kbps: args.bitrate.unwrap_or(bitrate_kbps),
        }
    } else {
        let (quality, container) = match default {
            OutputConfig::Video { quality, container } => (quality, container),
            OutputConfig::Audio { .. } => (VideoQuality::default(), VideoContainer::default()),
        };
        OutputConfig::Video {
            quality: args.quality.unwrap_or(quality),
            container: args.container.map_or(container, VideoContainer::from),
        }
    }
}

async fn download(session: &Session, args: &Args, output: OutputConfig) -> Result<u8, CliError> {
    let json = args.json;
    let show_metadata = move |p: MetadataProgress| {
        if !json {
            eprint!("\rFetching details {}/{}", p.completed, p.total);
            if p.completed == p.total {
                eprintln!();
            }
        }
    };

    let resolved = session.resolve(&args.url, Some(&show_metadata)).await?;
    let items = session.items().await;
    let title = session.title().await;
    print_listing(&resolved, title.as_deref(), &items, json)?;

    if args.list {
        return Ok(0);
    }

    let mode = if args.select.is_empty() || args.all {
        BatchMode::All
    } else {
        for &position in &args.select {
            let item = position
                .checked_sub(1)
                .and_then(|i| items.get(i))
                .ok_or(CliError::SelectionOutOfRange {
                    position,
                    count: items.len(),
                })?;
            session.toggle_selection(&item.id, true).await?;
        }
        BatchMode::Selected
    };

    if !json {
        eprintln!("Downloading as {output}");
    }
    let mut batch = session.start_batch(mode, output).await?;
    while let Some(event) = batch.next_event().await {
        if json {
            print_json(&event)?;
        } else {
            render_event(&event);
        }
    }
    let report = batch.finish().await?;

    let handle = session
        .take_archive_handle()
        .await
        .ok_or(CliError::MissingArchive)?;
    let destination = archive_destination(args.output.as_deref(), handle.file_name());
    let saved = handle.save_to(&destination)?;
    info!("Archive written to {}", saved.display());

    print_summary(&report, &saved, json)?;

    Ok(if report.failed > 0 { EXIT_PARTIAL } else { 0 })
}

/// Resolve where the archive goes: a file path, a directory, or the
/// current directory.
fn archive_destination(output: Option<&Path>, file_name: &str) -> PathBuf {
    match output {
        Some(path) if path.is_dir() => path.join(file_name),
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(file_name),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let line = serde_json::to_string(value)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;
    Ok(())
}

fn print_listing(
    resolved: &ResolveReport,
    title: Option<&str>,
    items: &[PlaylistItem],
    json: bool,
) -> Result<(), CliError> {
    if json {
        print_json(&serde_json::json!({
            "type": "Resolved",
            "data": { "report": resolved, "items": items },
        }))?;
        return Ok(());
    }

    let mut stdout = std::io::stdout().lock();
    writeln!(
        stdout,
        "{} ({} items)",
        title.unwrap_or("Playlist"),
        resolved.item_count
    )?;
    for (i, item) in items.iter().enumerate() {
        let duration = item.formatted_duration().unwrap_or_else(|| "-:--".to_string());
        writeln!(stdout, "{:>4}. {} ({duration}) [{}]", i + 1, item.title, item.id)?;
    }
    for warning in &resolved.warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

fn render_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::BatchStarted { total } => eprintln!("{total} items to download"),
        ProgressEvent::ItemStarted { index, id, title } => {
            eprintln!("[{}] {}", index + 1, title.as_deref().unwrap_or(id));
        }
        ProgressEvent::ItemProgress { progress, .. } => {
            if let Some(percent) = progress.percent {
                eprint!(
                    "\r      {percent:5.1}% {} {}",
                    progress.speed.as_deref().unwrap_or(""),
                    progress.eta.as_deref().map_or(String::new(), |eta| format!("ETA {eta}"))
                );
            }
        }
        ProgressEvent::ItemFinished {
            outcome, progress, ..
        } => {
            eprintln!();
            match outcome {
                FetchOutcome::Succeeded { file, .. } => {
                    eprintln!("      saved {}", file.display());
                }
                FetchOutcome::Failed { reason, .. } => eprintln!("      failed: {reason}"),
            }
            eprintln!("      {}/{} done", progress.completed, progress.total);
        }
        ProgressEvent::Packaging { files } => eprintln!("Packaging {files} files"),
        ProgressEvent::ArchiveReady { .. } | ProgressEvent::BatchFinished { .. } => {}
    }
}

fn print_summary(report: &BatchReport, archive: &Path, json: bool) -> Result<(), CliError> {
    if json {
        print_json(&serde_json::json!({
            "type": "Report",
            "data": { "report": report, "archive": archive },
        }))?;
        return Ok(());
    }

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "Downloaded files:")?;
    for entry in &report.entries {
        writeln!(stdout, "- {entry}")?;
    }
    writeln!(
        stdout,
        "{} succeeded, {} failed. Archive: {}",
        report.succeeded,
        report.failed,
        archive.display()
    )?;
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}
