//! The persistence contract consumed by the indexer and playlist generator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::model::{Features, Track, TrackId};

/// Counts describing how far indexing has progressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexingStats {
    pub total_tracks: usize,
    pub tracks_with_features: usize,
    pub tracks_without_features: usize,
}

/// Durable storage for tracks and their feature vectors.
///
/// Writes are staged until [`MetadataStore::commit`] is called, so callers
/// control how much progress a crash can lose.
pub trait MetadataStore {
    /// Insert or update the track keyed by its file path, optionally
    /// replacing its features. Returns the track's stable id.
    ///
    /// Updating a track whose `last_modified` changed without supplying
    /// features drops the now stale features row.
    fn upsert_track(&self, track: &Track, features: Option<&Features>) -> Result<TrackId>;

    fn get_track(&self, id: TrackId) -> Result<Option<Track>>;

    fn get_track_by_path(&self, path: &Path) -> Result<Option<Track>>;

    /// Exact, case-sensitive match on all three fields.
    fn find_exact(&self, title: &str, artist: &str, album: &str) -> Result<Option<Track>>;

    fn get_features(&self, id: TrackId) -> Result<Option<Features>>;

    /// The track together with its features, if both exist.
    fn track_with_features(&self, id: TrackId) -> Result<Option<(Track, Features)>>;

    /// Tracks that have metadata but no features yet.
    fn tracks_without_features(&self) -> Result<Vec<Track>>;

    /// All tracks with features, ordered by id.
    fn tracks_with_features(&self) -> Result<Vec<(Track, Features)>>;

    /// Ids of all tracks with features, ascending.
    fn featured_track_ids(&self) -> Result<Vec<TrackId>>;

    fn all_paths_with_mtime(&self) -> Result<HashMap<PathBuf, DateTime<Utc>>>;

    /// Delete a track (and its features). Returns whether a row existed.
    fn delete_track(&self, path: &Path) -> Result<bool>;

    /// Make all staged writes durable.
    fn commit(&self) -> Result<()>;

    fn stats(&self) -> Result<IndexingStats>;

    /// Dimension of the stored feature vectors, if any exist.
    fn feature_dimension(&self) -> Result<Option<usize>>;
}
