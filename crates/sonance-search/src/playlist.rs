//! Similarity playlists from seed tracks.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use sonance_core::model::{Playlist, Track, TrackId};
use sonance_core::MetadataStore;
use std::collections::HashSet;
use std::fmt;

use crate::error::PlaylistError;
use crate::shared::SharedIndex;

/// Tuning for playlist generation, owned by the caller's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistSettings {
    /// Candidates fetched per requested song before random down-selection.
    pub candidate_multiplier: usize,
    /// Extra neighbours fetched to absorb ids that fail to resolve.
    pub candidate_buffer: usize,
    /// Query noise, relative to the query's standard deviation. 0 disables it.
    pub query_noise_scale: f32,
    pub default_length: usize,
    pub default_bpm_jitter: f32,
}

impl Default for PlaylistSettings {
    fn default() -> Self {
        Self {
            candidate_multiplier: 4,
            candidate_buffer: 50,
            query_noise_scale: 0.1,
            default_length: 20,
            default_bpm_jitter: 5.0,
        }
    }
}

/// A user-supplied reference to a library track.
///
/// All three fields must be non-empty and must match a stored track exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedSpec {
    pub title: String,
    pub artist: String,
    pub album: String,
}

impl SeedSpec {
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        artist: impl Into<String>,
        album: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            album: album.into(),
        }
    }

    /// Parse `Title|Artist|Album`. Returns `None` unless there are exactly
    /// three parts.
    #[must_use]
    pub fn parse(spec: &str) -> Option<Self> {
        let mut parts = spec.split('|');
        let seed = Self::new(parts.next()?, parts.next()?, parts.next()?);
        parts.next().is_none().then_some(seed)
    }

    fn is_complete(&self) -> bool {
        !self.title.is_empty() && !self.artist.is_empty() && !self.album.is_empty()
    }
}

impl fmt::Display for SeedSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} by {} from {}", self.title, self.artist, self.album)
    }
}

/// Generates playlists by searching the vector index around the seeds.
///
/// Output is deliberately randomized (query noise, random down-selection
/// and tempo jitter) so repeated requests vary. Use
/// [`PlaylistGenerator::with_seed`] for reproducible runs.
pub struct PlaylistGenerator<'a, S: MetadataStore + ?Sized> {
    store: &'a S,
    index: &'a SharedIndex,
    settings: PlaylistSettings,
    rng: StdRng,
}

impl<S: MetadataStore + ?Sized> fmt::Debug for PlaylistGenerator<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaylistGenerator")
            .field("index", &self.index)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<'a, S: MetadataStore + ?Sized> PlaylistGenerator<'a, S> {
    pub fn new(store: &'a S, index: &'a SharedIndex, settings: PlaylistSettings) -> Self {
        Self {
            store,
            index,
            settings,
            rng: StdRng::from_os_rng(),
        }
    }

    /// A generator whose random choices are reproducible.
    pub fn with_seed(
        store: &'a S,
        index: &'a SharedIndex,
        settings: PlaylistSettings,
        seed: u64,
    ) -> Self {
        Self {
            store,
            index,
            settings,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &PlaylistSettings {
        &self.settings
    }

    /// Generate with the configured default length and tempo jitter.
    pub fn generate_default(
        &mut self,
        seeds: &[SeedSpec],
    ) -> Result<Option<Playlist>, PlaylistError> {
        let length = self.settings.default_length;
        let jitter = self.settings.default_bpm_jitter;
        self.generate(seeds, length, jitter)
    }

    /// Generate a playlist of up to `length` tracks similar to `seeds`.
    ///
    /// Returns `Ok(None)` when the search finds no usable tracks.
    pub fn generate(
        &mut self,
        seeds: &[SeedSpec],
        length: usize,
        bpm_jitter_percent: f32,
    ) -> Result<Option<Playlist>, PlaylistError> {
        if seeds.is_empty() {
            return Err(PlaylistError::NoSeeds);
        }

        let seed_tracks = self.resolve_seeds(seeds)?;
        if seed_tracks.is_empty() {
            return Err(PlaylistError::NoSeedsFound);
        }

        let seed_vectors = self.seed_vectors(&seed_tracks)?;
        let Some(mean) = mean_vector(&seed_vectors) else {
            return Err(PlaylistError::NoFeaturesForSeeds);
        };
        let query = self.perturb(mean);

        let exclude: HashSet<TrackId> = seed_tracks.iter().filter_map(|t| t.id).collect();
        let candidates = self.find_similar(&query, length, &exclude)?;
        if candidates.is_empty() {
            log::warn!("No similar songs found");
            return Ok(None);
        }

        let songs = self.sort_by_bpm(candidates, bpm_jitter_percent);
        let playlist = Playlist::new(songs, seed_tracks);
        log::info!("Generated playlist with {} songs", playlist.len());
        Ok(Some(playlist))
    }

    fn resolve_seeds(&self, seeds: &[SeedSpec]) -> Result<Vec<Track>, PlaylistError> {
        let mut found = Vec::with_capacity(seeds.len());
        for seed in seeds {
            if !seed.is_complete() {
                log::warn!(
                    "Missing required fields in seed ({seed}); title, artist and album are all needed"
                );
                continue;
            }
            match self
                .store
                .find_exact(&seed.title, &seed.artist, &seed.album)?
            {
                Some(track) => {
                    log::info!("Found seed song: {track}");
                    found.push(track);
                }
                None => log::warn!("No exact match found for seed: {seed}"),
            }
        }
        Ok(found)
    }

    fn seed_vectors(&self, seeds: &[Track]) -> Result<Vec<Vec<f32>>, PlaylistError> {
        let mut vectors = Vec::with_capacity(seeds.len());
        for track in seeds {
            let features = match track.id {
                Some(id) => self.store.get_features(id)?,
                None => None,
            };
            match features {
                Some(features) => vectors.push(features.vector),
                None => log::warn!("No features found for seed song: {track}"),
            }
        }
        Ok(vectors)
    }

    /// Add Gaussian noise scaled by the query's spread.
    fn perturb(&mut self, mut query: Vec<f32>) -> Vec<f32> {
        let scale = self.settings.query_noise_scale;
        if scale <= 0.0 {
            return query;
        }
        let spread = std_dev(&query) * scale;
        match Normal::new(0.0_f32, spread) {
            Ok(noise) => {
                for value in &mut query {
                    *value += noise.sample(&mut self.rng);
                }
            }
            Err(e) => log::warn!("Skipping query noise: {e}"),
        }
        query
    }

    /// Over-fetch neighbours, drop unusable ones, then sample `length` of
    /// them uniformly at random. Returns each track with its tempo.
    fn find_similar(
        &mut self,
        query: &[f32],
        length: usize,
        exclude: &HashSet<TrackId>,
    ) -> Result<Vec<(Track, f32)>, PlaylistError> {
        let wanted = length.saturating_mul(self.settings.candidate_multiplier);
        let k = wanted
            .saturating_add(exclude.len())
            .saturating_add(self.settings.candidate_buffer);

        let index = self.index.get()?;
        let (_, ids) = index.search(query, k)?;

        let mut pool = Vec::with_capacity(wanted.min(ids.len()));
        for id in ids {
            if pool.len() >= wanted {
                break;
            }
            if exclude.contains(&id) {
                continue;
            }
            match self.store.track_with_features(id)? {
                Some((track, features)) => pool.push((track, features.bpm)),
                None => log::debug!("Index entry {id} has no track with features; skipping"),
            }
        }

        if pool.len() <= length {
            return Ok(pool);
        }

        let mut picked = rand::seq::index::sample(&mut self.rng, pool.len(), length).into_vec();
        picked.sort_unstable();
        let mut slots: Vec<Option<(Track, f32)>> = pool.into_iter().map(Some).collect();
        Ok(picked.into_iter().filter_map(|i| slots[i].take()).collect())
    }

    /// Order by tempo, with each tempo nudged by up to ±`jitter_percent`%
    /// so transitions aren't rigidly monotonic.
    fn sort_by_bpm(&mut self, tracks: Vec<(Track, f32)>, jitter_percent: f32) -> Vec<Track> {
        let spread = if jitter_percent.is_finite() {
            jitter_percent.abs() / 100.0
        } else {
            0.0
        };
        let mut keyed: Vec<(f32, Track)> = tracks
            .into_iter()
            .map(|(track, bpm)| {
                let jitter = if spread > 0.0 {
                    self.rng.random_range(-spread..=spread)
                } else {
                    0.0
                };
                (bpm * (1.0 + jitter), track)
            })
            .collect();
        keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
        keyed.into_iter().map(|(_, track)| track).collect()
    }
}

/// Element-wise mean. Vectors whose length differs from the first are
/// ignored.
fn mean_vector(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let mut sum = vec![0.0_f32; first.len()];
    let mut count = 0_u32;
    for vector in vectors {
        if vector.len() != sum.len() {
            log::warn!(
                "Ignoring seed vector of dimension {} (expected {})",
                vector.len(),
                sum.len()
            );
            continue;
        }
        for (acc, value) in sum.iter_mut().zip(vector) {
            *acc += value;
        }
        count += 1;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = count as f32;
    Some(sum.into_iter().map(|v| v / n).collect())
}

/// Population standard deviation.
#[allow(clippy::cast_precision_loss)]
fn std_dev(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::VectorIndex;
    use chrono::Utc;
    use sonance_core::model::Features;
    use sonance_core::schema::Database;
    use std::path::PathBuf;

    struct Library {
        db: Database,
        index: SharedIndex,
    }

    /// Tracks `song0..songN` by "Artist" on "Album"; song `i` sits at
    /// `(i, 0)` with tempo `80 + i`.
    fn library(n: usize) -> Library {
        let db = Database::open_in_memory().unwrap();
        let mut vectors = Vec::new();
        let mut ids = Vec::new();
        for i in 0..n {
            let mut track = Track::new(PathBuf::from(format!("/music/song{i}.mp3")), Utc::now());
            track.title = format!("song{i}");
            track.artist = "Artist".to_string();
            track.album = "Album".to_string();
            let vector = vec![i as f32, 0.0];
            let features = Features::new(vector.clone(), 80.0 + i as f32);
            ids.push(db.upsert_track(&track, Some(&features)).unwrap());
            vectors.push(vector);
        }
        db.commit().unwrap();

        let index = SharedIndex::new("/nonexistent/index.bin");
        let mut built = VectorIndex::new();
        built.build(&vectors, &ids).unwrap();
        index.replace(built);
        Library { db, index }
    }

    fn quiet() -> PlaylistSettings {
        PlaylistSettings {
            query_noise_scale: 0.0,
            ..PlaylistSettings::default()
        }
    }

    fn seed(i: usize) -> SeedSpec {
        SeedSpec::new(format!("song{i}"), "Artist", "Album")
    }

    fn titles(playlist: &Playlist) -> Vec<String> {
        playlist.songs.iter().map(|t| t.title.clone()).collect()
    }

    #[test]
    fn test_seed_spec_parse() {
        assert_eq!(
            SeedSpec::parse("So What|Miles Davis|Kind of Blue"),
            Some(SeedSpec::new("So What", "Miles Davis", "Kind of Blue"))
        );
        assert_eq!(SeedSpec::parse("So What|Miles Davis"), None);
        assert_eq!(SeedSpec::parse("a|b|c|d"), None);
    }

    #[test]
    fn test_no_seeds() {
        let lib = library(3);
        let mut gen = PlaylistGenerator::with_seed(&lib.db, &lib.index, quiet(), 1);
        assert!(matches!(
            gen.generate(&[], 5, 0.0),
            Err(PlaylistError::NoSeeds)
        ));
    }

    #[test]
    fn test_unmatched_seed_is_not_fuzzy_matched() {
        let lib = library(3);
        let mut gen = PlaylistGenerator::with_seed(&lib.db, &lib.index, quiet(), 1);
        let result = gen.generate(&[SeedSpec::new("song1", "Artist", "album")], 5, 0.0);
        assert!(matches!(result, Err(PlaylistError::NoSeedsFound)));
    }

    #[test]
    fn test_incomplete_seed_is_dropped() {
        let lib = library(3);
        let mut gen = PlaylistGenerator::with_seed(&lib.db, &lib.index, quiet(), 1);
        let result = gen.generate(&[SeedSpec::new("song1", "Artist", "")], 5, 0.0);
        assert!(matches!(result, Err(PlaylistError::NoSeedsFound)));
    }

    #[test]
    fn test_seed_without_features() {
        let lib = library(3);
        let mut bare = Track::new(PathBuf::from("/music/bare.mp3"), Utc::now());
        bare.title = "bare".to_string();
        bare.artist = "Artist".to_string();
        bare.album = "Album".to_string();
        lib.db.upsert_track(&bare, None).unwrap();

        let mut gen = PlaylistGenerator::with_seed(&lib.db, &lib.index, quiet(), 1);
        let result = gen.generate(&[SeedSpec::new("bare", "Artist", "Album")], 5, 0.0);
        assert!(matches!(result, Err(PlaylistError::NoFeaturesForSeeds)));
    }

    #[test]
    fn test_excludes_seeds_and_orders_by_tempo() {
        let lib = library(10);
        let mut gen = PlaylistGenerator::with_seed(&lib.db, &lib.index, quiet(), 7);

        let playlist = gen.generate(&[seed(0)], 20, 0.0).unwrap().unwrap();

        assert_eq!(playlist.len(), 9);
        assert!(!titles(&playlist).contains(&"song0".to_string()));
        assert_eq!(playlist.seed_songs[0].title, "song0");
        let expected: Vec<String> = (1..10).map(|i| format!("song{i}")).collect();
        assert_eq!(titles(&playlist), expected);
    }

    #[test]
    fn test_samples_down_to_length() {
        let lib = library(30);
        let mut gen = PlaylistGenerator::with_seed(&lib.db, &lib.index, quiet(), 3);

        let playlist = gen.generate(&[seed(0)], 5, 0.0).unwrap().unwrap();
        assert_eq!(playlist.len(), 5);

        // Without jitter the sample comes back tempo-ascending.
        let bpms: Vec<f32> = playlist
            .songs
            .iter()
            .map(|t| lib.db.get_features(t.id.unwrap()).unwrap().unwrap().bpm)
            .collect();
        assert!(bpms.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_candidates_come_from_nearest_neighbours() {
        let lib = library(100);
        let settings = PlaylistSettings {
            candidate_multiplier: 2,
            ..quiet()
        };
        let mut gen = PlaylistGenerator::with_seed(&lib.db, &lib.index, settings, 11);

        // Pool is the 2 * 3 nearest non-seed tracks: song1..=song6.
        let playlist = gen.generate(&[seed(0)], 3, 0.0).unwrap().unwrap();
        for track in &playlist.songs {
            let n: usize = track.title.trim_start_matches("song").parse().unwrap();
            assert!((1..=6).contains(&n), "unexpected candidate {}", track.title);
        }
    }

    #[test]
    fn test_fixed_seed_is_deterministic() {
        let lib = library(40);
        let settings = PlaylistSettings {
            query_noise_scale: 0.5,
            ..PlaylistSettings::default()
        };
        let seeds = [seed(3), seed(20)];

        let mut a = PlaylistGenerator::with_seed(&lib.db, &lib.index, settings.clone(), 42);
        let mut b = PlaylistGenerator::with_seed(&lib.db, &lib.index, settings, 42);
        let first = a.generate(&seeds, 8, 10.0).unwrap().unwrap();
        let second = b.generate(&seeds, 8, 10.0).unwrap().unwrap();

        assert_eq!(titles(&first), titles(&second));
    }

    #[test]
    fn test_no_candidates_returns_none() {
        let lib = library(1);
        let mut gen = PlaylistGenerator::with_seed(&lib.db, &lib.index, quiet(), 1);
        assert!(gen.generate(&[seed(0)], 5, 5.0).unwrap().is_none());
    }

    #[test]
    fn test_generate_default_uses_settings() {
        let lib = library(10);
        let settings = PlaylistSettings {
            default_length: 2,
            ..quiet()
        };
        let mut gen = PlaylistGenerator::with_seed(&lib.db, &lib.index, settings, 5);
        let playlist = gen.generate_default(&[seed(0)]).unwrap().unwrap();
        assert_eq!(playlist.len(), 2);
    }

    #[test]
    fn test_mean_vector() {
        let mean = mean_vector(&[vec![1.0, 2.0], vec![3.0, 6.0]]).unwrap();
        assert_eq!(mean, vec![2.0, 4.0]);
        assert!(mean_vector(&[]).is_none());
    }

    #[test]
    fn test_std_dev() {
        assert_eq!(std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 2.0);
        assert_eq!(std_dev(&[]), 0.0);
    }
}
