use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::TrackId;
use crate::model::track::Track;

/// A generated, ordered list of tracks. Never persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub songs: Vec<Track>,
    pub seed_songs: Vec<Track>,
    pub created_at: DateTime<Utc>,
}

impl Playlist {
    #[must_use]
    pub fn new(songs: Vec<Track>, seed_songs: Vec<Track>) -> Self {
        Self {
            songs,
            seed_songs,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.songs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    pub fn add(&mut self, track: Track) {
        self.songs.push(track);
    }

    /// Remove the first song with the given id. Returns whether one was found.
    pub fn remove(&mut self, id: TrackId) -> bool {
        match self.songs.iter().position(|t| t.id == Some(id)) {
            Some(pos) => {
                self.songs.remove(pos);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn track_ids(&self) -> Vec<TrackId> {
        self.songs.iter().filter_map(|t| t.id).collect()
    }
}
