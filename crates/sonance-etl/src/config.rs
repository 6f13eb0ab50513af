use anyhow::{Context, Result};
use confyg::{env, Confygery};
use serde::Deserialize;
use sonance_search::maintenance::DEFAULT_REBUILD_THRESHOLD;
use sonance_search::PlaylistSettings;
use std::path::PathBuf;
use std::time::Duration;

use crate::extract::AnalyzerSettings;
use crate::pipeline::IndexerSettings;

/// Configuration for sonance.
///
/// Configuration is loaded from multiple sources with the following priority:
/// 1. CLI arguments (highest priority)
/// 2. Environment variables (SONANCE_* prefix)
/// 3. Config file (~/.config/sonance/config.toml)
/// 4. Built-in defaults (lowest priority)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite database.
    ///
    /// Can be set via:
    /// - CLI: --db /path/to/db
    /// - ENV: SONANCE_DATABASE_PATH
    /// - Default: ~/.local/share/sonance/sonance.db
    pub database_path: PathBuf,

    /// Path to the persisted vector index.
    ///
    /// Can be set via:
    /// - CLI: --index /path/to/index.bin
    /// - ENV: SONANCE_INDEX_PATH
    /// - Default: ~/.local/share/sonance/index.bin
    pub index_path: PathBuf,

    /// Default playlist output file; the extension picks the format.
    pub playlist_output: PathBuf,

    /// Audio file extensions to index (lowercase, without the dot).
    pub extensions: Vec<String>,

    /// Store writes between commits.
    pub batch_size: usize,

    /// Concurrent feature extraction tasks.
    pub workers: usize,

    /// Per-file feature extraction deadline, in seconds.
    pub task_timeout_secs: u64,

    /// Decoding rate for feature extraction, in Hz.
    pub sample_rate: u32,

    /// Seconds of audio analysed per file. 0 analyses the whole file.
    pub max_duration_secs: u32,

    /// Fraction of changed tracks above which the index is rebuilt.
    pub rebuild_threshold: f64,

    pub candidate_multiplier: usize,
    pub candidate_buffer: usize,
    pub query_noise_scale: f32,
    pub default_length: usize,
    pub default_bpm_jitter: f32,

    pub logging: twyg::Opts,
}

impl Default for Config {
    fn default() -> Self {
        let indexer = IndexerSettings::default();
        let playlist = PlaylistSettings::default();
        let analyzer = AnalyzerSettings::default();
        Self {
            database_path: default_data_path("sonance.db"),
            index_path: default_data_path("index.bin"),
            playlist_output: PathBuf::from("playlist.m3u"),
            extensions: indexer.extensions,
            batch_size: indexer.batch_size,
            workers: indexer.workers,
            task_timeout_secs: indexer.task_timeout.as_secs(),
            sample_rate: analyzer.sample_rate,
            max_duration_secs: analyzer.max_duration_secs.unwrap_or(0),
            rebuild_threshold: DEFAULT_REBUILD_THRESHOLD,
            candidate_multiplier: playlist.candidate_multiplier,
            candidate_buffer: playlist.candidate_buffer,
            query_noise_scale: playlist.query_noise_scale,
            default_length: playlist.default_length,
            default_bpm_jitter: playlist.default_bpm_jitter,
            logging: twyg::Opts::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Searches for config file at: ~/.config/sonance/config.toml
    /// Reads environment variables with SONANCE_ prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_path = config_file_path();

        let mut builder = Confygery::new().context("Failed to create config builder")?;

        if config_path.exists() {
            let path_str = config_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("Config path contains invalid UTF-8"))?;
            builder
                .add_file(path_str)
                .context("Failed to load config file")?;
        }

        let env_opts = env::Options::with_top_level("sonance");
        builder
            .add_env(env_opts)
            .context("Failed to load environment variables")?;

        let config: Self = builder.build().context("Failed to build configuration")?;

        Ok(config)
    }

    /// Apply CLI path overrides on top of the loaded values.
    #[must_use]
    pub fn with_overrides(mut self, db: Option<PathBuf>, index: Option<PathBuf>) -> Self {
        if let Some(db) = db {
            self.database_path = db;
        }
        if let Some(index) = index {
            self.index_path = index;
        }
        self
    }

    /// Settings for the indexing pipeline. Zero values fall back to the
    /// smallest workable setting.
    #[must_use]
    pub fn indexer(&self) -> IndexerSettings {
        IndexerSettings {
            extensions: self.extensions.iter().map(|e| e.to_lowercase()).collect(),
            batch_size: self.batch_size.max(1),
            workers: self.workers.max(1),
            task_timeout: Duration::from_secs(self.task_timeout_secs.max(1)),
            rebuild_threshold: self.rebuild_threshold,
        }
    }

    #[must_use]
    pub fn analyzer(&self) -> AnalyzerSettings {
        AnalyzerSettings {
            sample_rate: if self.sample_rate == 0 {
                AnalyzerSettings::default().sample_rate
            } else {
                self.sample_rate
            },
            max_duration_secs: (self.max_duration_secs > 0).then_some(self.max_duration_secs),
        }
    }

    #[must_use]
    pub fn playlist(&self) -> PlaylistSettings {
        PlaylistSettings {
            candidate_multiplier: self.candidate_multiplier.max(1),
            candidate_buffer: self.candidate_buffer,
            query_noise_scale: self.query_noise_scale,
            default_length: self.default_length,
            default_bpm_jitter: self.default_bpm_jitter,
        }
    }
}

fn default_data_path(file: &str) -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sonance")
        .join(file)
}

/// Get the config file path.
///
/// Returns:
/// - Linux: ~/.config/sonance/config.toml
/// - macOS: ~/Library/Application Support/sonance/config.toml
/// - Windows: %APPDATA%\sonance\config.toml
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sonance")
        .join("config.toml")
}

/// Get the example config file content.
pub fn example_config() -> &'static str {
    r#"# Sonance Configuration File
#
# Configuration is loaded from multiple sources with the following priority:
# 1. CLI arguments (highest priority)
# 2. Environment variables (SONANCE_* prefix)
# 3. This config file
# 4. Built-in defaults (lowest priority)

# Where track metadata and feature vectors are stored
#
# Can also be set via:
# - CLI: sonance --db /custom/path.db index /music
# - Environment: SONANCE_DATABASE_PATH=/custom/path.db
#
# Default: Platform-specific data directory
#database_path = "/path/to/custom/sonance.db"

# Where the similarity index is persisted
#index_path = "/path/to/custom/index.bin"

# Default playlist file; .m3u, .m3u8 and .json are supported
playlist_output = "playlist.m3u"

# Indexing
extensions = ["mp3", "flac", "wav", "ogg"]
batch_size = 10
# Defaults to the number of CPU cores
#workers = 8
task_timeout_secs = 30

# Feature extraction decodes at this rate and reads at most this many
# seconds of each file (0 reads everything)
sample_rate = 22050
max_duration_secs = 180

# Rebuild the index when more than this fraction of it changed in one run
rebuild_threshold = 0.10

# Playlist generation
candidate_multiplier = 4
candidate_buffer = 50
query_noise_scale = 0.1
default_length = 20
default_bpm_jitter = 5.0
"#
}

/// Create default config file if it doesn't exist.
///
/// Returns true if a new file was created, false if it already existed.
pub fn ensure_config_file() -> Result<bool> {
    let config_path = config_file_path();

    if config_path.exists() {
        return Ok(false);
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;
    }

    std::fs::write(&config_path, example_config()).context("Failed to write config file")?;

    Ok(true)
}
