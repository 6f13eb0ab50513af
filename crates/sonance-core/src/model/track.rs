use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::model::ids::TrackId;

/// Placeholder used when a tag is missing from the file.
pub const UNKNOWN: &str = "Unknown";

/// The format of an audio file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioFormat {
    Flac,
    Mp3,
    Ogg,
    Wav,
    Other,
}

impl AudioFormat {
    /// Detect format from a file extension.
    #[must_use]
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "flac" => Self::Flac,
            "mp3" => Self::Mp3,
            "ogg" | "oga" => Self::Ogg,
            "wav" => Self::Wav,
            _ => Self::Other,
        }
    }

    /// Detect format from a path's extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .map(|ext| Self::from_extension(&ext.to_string_lossy()))
            .unwrap_or(Self::Other)
    }
}

/// One audio file's metadata record.
///
/// Identity is [`Track::file_path`]; `id` is assigned by the store on first
/// insert and stays stable across later updates of the same path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// `None` until the track has been persisted.
    pub id: Option<TrackId>,

    /// Absolute path to the audio file.
    pub file_path: PathBuf,

    pub title: String,
    pub artist: String,
    pub album: String,
    pub genre: String,

    /// Source file modification time (for change detection).
    pub last_modified: DateTime<Utc>,

    /// Duration in whole seconds, rounded up.
    pub duration_secs: Option<u32>,
}

impl Track {
    #[must_use]
    pub fn new(file_path: PathBuf, last_modified: DateTime<Utc>) -> Self {
        let title = file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            id: None,
            file_path,
            title,
            artist: UNKNOWN.to_string(),
            album: UNKNOWN.to_string(),
            genre: UNKNOWN.to_string(),
            last_modified,
            duration_secs: None,
        }
    }

    #[must_use]
    pub fn format(&self) -> AudioFormat {
        AudioFormat::from_path(&self.file_path)
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.artist, self.title)
    }
}

/// Convert a filesystem timestamp to the store's mtime representation.
#[must_use]
pub fn mtime_from_system_time(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}
