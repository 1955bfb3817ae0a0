//! Application configuration management.
//!
//! Handles loading, saving, and validating settings: external tool
//! locations, the root under which batch working directories are created,
//! metadata worker count, the network timeout, and the default output.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::format::OutputConfig;

/// Default number of metadata fetches in flight.
pub const DEFAULT_METADATA_CONCURRENCY: usize = 3;

/// Minimum allowed metadata concurrency.
pub const MIN_METADATA_CONCURRENCY: usize = 1;

/// Maximum allowed metadata concurrency.
pub const MAX_METADATA_CONCURRENCY: usize = 8;

/// Default timeout for a single network-bound step, in seconds.
pub const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 300;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Path to the yt-dlp executable. Searched in PATH when unset.
    #[serde(default)]
    pub ytdlp_path: Option<PathBuf>,
    /// Path to the ffmpeg executable. Searched in PATH when unset.
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,
    /// Directory under which per-batch working directories are created.
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,
    /// Number of metadata fetches allowed in flight at once.
    #[serde(default = "default_metadata_concurrency")]
    pub metadata_concurrency: usize,
    /// Upper bound for every network-bound step, in seconds.
    #[serde(default = "default_network_timeout_secs")]
    pub network_timeout_secs: u64,
    /// Output used when the caller does not pick one.
    #[serde(default)]
    pub default_output: OutputConfig,
}

fn default_work_root() -> PathBuf {
    std::env::temp_dir().join("tubebatch")
}

const fn default_metadata_concurrency() -> usize {
    DEFAULT_METADATA_CONCURRENCY
}

const fn default_network_timeout_secs() -> u64 {
    DEFAULT_NETWORK_TIMEOUT_SECS
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            ffmpeg_path: None,
            work_root: default_work_root(),
            metadata_concurrency: DEFAULT_METADATA_CONCURRENCY,
            network_timeout_secs: DEFAULT_NETWORK_TIMEOUT_SECS,
            default_output: OutputConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location, or defaults if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific file, or defaults if absent.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| Error::file_system(path, format!("Failed to read config file: {e}")))?;

        let mut config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file: {e}")))?;
        config.validate();

        info!("Loaded config from {}", path.display());
        debug!("Work root: {}", config.work_root.display());

        Ok(config)
    }

    /// Save configuration to the given file.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| {
                Error::file_system(parent, format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .map_err(|e| Error::file_system(path, format!("Failed to write config file: {e}")))?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Clamp values into their supported ranges.
    pub fn validate(&mut self) {
        let clamped = self
            .metadata_concurrency
            .clamp(MIN_METADATA_CONCURRENCY, MAX_METADATA_CONCURRENCY);
        if clamped != self.metadata_concurrency {
            warn!(
                "metadata_concurrency {} out of range, using {}",
                self.metadata_concurrency, clamped
            );
            self.metadata_concurrency = clamped;
        }
        if self.network_timeout_secs == 0 {
            warn!("network_timeout_secs must be positive, using default");
            self.network_timeout_secs = DEFAULT_NETWORK_TIMEOUT_SECS;
        }
    }

    /// The network timeout as a [`Duration`].
    #[must_use]
    pub const fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    /// Ensure the work root exists and is a writable directory.
    pub fn prepare_work_root(&self) -> Result<()> {
        validate_work_root(&self.work_root)
    }
}

/// Get the path to the default config file.
#[must_use]
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tubebatch")
        .join("config.json")
}

/// Validate that a directory can hold batch working directories.
fn validate_work_root(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            return Err(Error::Configuration(format!(
                "Work root exists but is not a directory: {}",
                path.display()
            )));
        }
        let metadata = fs::metadata(path)?;
        if metadata.permissions().readonly() {
            return Err(Error::Configuration(format!(
                "Work root is not writable: {}",
                path.display()
            )));
        }
    } else {
        fs::create_dir_all(path).map_err(|e| {
            Error::Configuration(format!("Cannot create directory {}: {}", path.display(), e))
        })?;
    }
    Ok(())
}

/// Configuration manager that handles loading and caching config.
pub struct ConfigManager {
    config: AppConfig,
    path: PathBuf,
}

impl ConfigManager {
    /// Create a config manager backed by the default config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be loaded.
    pub fn new() -> Result<Self> {
        Self::with_path(config_file_path())
    }

    /// Create a config manager backed by a specific file.
    pub fn with_path(path: PathBuf) -> Result<Self> {
        let config = AppConfig::load_from(&path)?;
        Ok(Self { config, path })
    }

    /// Get a reference to the current configuration.
    #[must_use]
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Path of the backing config file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace and persist the configuration.
    pub fn update(&mut self, mut config: AppConfig) -> Result<()> {
        config.validate();
        self.config = config;
        self.config.save_to(&self.path)
    }
}
