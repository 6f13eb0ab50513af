//! Per-file metadata and feature extraction.

use anyhow::{Context, Result};
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::tag::Accessor;
use sonance_core::model::{Features, UNKNOWN};
use std::path::Path;

use crate::audio::{decode_audio, describe};

/// Tags read from an audio file, with fallbacks already applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackTags {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
}

impl TrackTags {
    /// File name as title, [`UNKNOWN`] for everything else.
    #[must_use]
    pub fn fallback(path: &Path) -> Self {
        Self {
            title: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            artist: UNKNOWN.to_string(),
            album: UNKNOWN.to_string(),
            genre: UNKNOWN.to_string(),
        }
    }
}

/// Turns audio files into metadata and feature vectors.
///
/// Implementations are called from blocking worker threads and must not
/// assume any particular thread.
pub trait FeatureExtractor: Send + Sync {
    /// Compute the feature vector and tempo. Every vector an extractor
    /// returns must have the same dimension.
    fn extract_features(&self, path: &Path) -> Result<Features>;

    /// Read tags. Never fails; missing values use [`TrackTags::fallback`].
    fn extract_metadata(&self, path: &Path) -> TrackTags;

    /// Duration in whole seconds, rounded up.
    fn get_duration(&self, path: &Path) -> Option<u32>;
}

/// Decoding parameters for [`AudioAnalyzer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyzerSettings {
    pub sample_rate: u32,
    /// Only the first this-many seconds are analysed.
    pub max_duration_secs: Option<u32>,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            max_duration_secs: Some(180),
        }
    }
}

/// The default extractor: `lofty` for tags, `symphonia` for decoding.
#[derive(Debug, Clone, Default)]
pub struct AudioAnalyzer {
    settings: AnalyzerSettings,
}

impl AudioAnalyzer {
    #[must_use]
    pub const fn new(settings: AnalyzerSettings) -> Self {
        Self { settings }
    }

    fn read_tags(path: &Path) -> Result<TrackTags> {
        let tagged_file = lofty::read_from_path(path)?;
        let mut tags = TrackTags::fallback(path);

        if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
            let non_empty = |value: Option<std::borrow::Cow<'_, str>>| {
                value
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
            };
            if let Some(title) = non_empty(tag.title()) {
                tags.title = title;
            }
            if let Some(artist) = non_empty(tag.artist()) {
                tags.artist = artist;
            }
            if let Some(album) = non_empty(tag.album()) {
                tags.album = album;
            }
            if let Some(genre) = non_empty(tag.genre()) {
                tags.genre = genre;
            }
        }

        Ok(tags)
    }
}

impl FeatureExtractor for AudioAnalyzer {
    fn extract_features(&self, path: &Path) -> Result<Features> {
        let audio = decode_audio(path, self.settings.sample_rate, self.settings.max_duration_secs)?;
        let descriptor = describe(&audio.samples, audio.sample_rate)
            .with_context(|| format!("No audio samples decoded from {}", path.display()))?;
        Ok(Features::new(descriptor.vector, descriptor.bpm))
    }

    fn extract_metadata(&self, path: &Path) -> TrackTags {
        Self::read_tags(path).unwrap_or_else(|e| {
            log::warn!("Failed to extract tags from {}: {e}", path.display());
            TrackTags::fallback(path)
        })
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn get_duration(&self, path: &Path) -> Option<u32> {
        match lofty::read_from_path(path) {
            Ok(tagged_file) => {
                let secs = tagged_file.properties().duration().as_secs_f64();
                (secs > 0.0).then(|| secs.ceil() as u32)
            }
            Err(e) => {
                log::warn!("Failed to get duration from {}: {e}", path.display());
                None
            }
        }
    }
}
