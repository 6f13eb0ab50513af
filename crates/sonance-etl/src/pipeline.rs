//! The incremental indexing pipeline.
//!
//! A run walks the library, stores metadata for new or modified files,
//! extracts features for every track that lacks them on a bounded worker
//! pool, drops tracks whose files are gone, and finally brings the vector
//! index up to date. Each phase commits as it goes, so an interrupted run
//! resumes where it stopped.

use anyhow::anyhow;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use sonance_core::model::{Features, Track, TrackId};
use sonance_core::MetadataStore;
use sonance_search::{MaintenanceAction, SharedIndex};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{EtlError, EtlResult};
use crate::extract::FeatureExtractor;
use crate::maintain::maintain_index;
use crate::progress::{self, Phase, Progress, ProgressCallback};
use crate::scan;

/// Tuning for an indexing run.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexerSettings {
    /// Lowercase file extensions to index.
    pub extensions: Vec<String>,
    /// Store writes between commits.
    pub batch_size: usize,
    /// Concurrent feature extraction tasks.
    pub workers: usize,
    /// Deadline for one file's feature extraction.
    pub task_timeout: Duration,
    /// Changed fraction of the index above which it is rebuilt.
    pub rebuild_threshold: f64,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            extensions: ["mp3", "flac", "wav", "ogg"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            batch_size: 10,
            workers: std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get),
            task_timeout: Duration::from_secs(30),
            rebuild_threshold: sonance_search::maintenance::DEFAULT_REBUILD_THRESHOLD,
        }
    }
}

/// Successes and per-file failures for one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseCounts {
    pub ok: usize,
    pub failed: usize,
}

/// Result of the feature phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureOutcome {
    pub counts: PhaseCounts,
    /// Tracks that gained features, in completion order.
    pub changed: Vec<TrackId>,
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub scanned: usize,
    pub selected: usize,
    pub metadata_ok: usize,
    pub metadata_failed: usize,
    pub features_ok: usize,
    pub features_failed: usize,
    pub deleted: usize,
    pub maintenance: MaintenanceAction,
}

impl fmt::Display for IndexReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Files scanned:      {}", self.scanned)?;
        writeln!(f, "New or modified:    {}", self.selected)?;
        writeln!(
            f,
            "Metadata stored:    {} ({} failed)",
            self.metadata_ok, self.metadata_failed
        )?;
        writeln!(
            f,
            "Features extracted: {} ({} failed)",
            self.features_ok, self.features_failed
        )?;
        writeln!(f, "Deleted:            {}", self.deleted)?;
        write!(f, "Index:              {}", self.maintenance)
    }
}

/// Counts commits so writes land in batches.
struct Batch<'a, S: MetadataStore + ?Sized> {
    store: &'a S,
    size: usize,
    pending: usize,
}

impl<'a, S: MetadataStore + ?Sized> Batch<'a, S> {
    fn new(store: &'a S, size: usize) -> Self {
        Self {
            store,
            size: size.max(1),
            pending: 0,
        }
    }

    fn record(&mut self) -> EtlResult<()> {
        self.pending += 1;
        if self.pending >= self.size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> EtlResult<()> {
        if self.pending > 0 {
            self.store.commit()?;
            log::debug!("Committed batch of {}", self.pending);
            self.pending = 0;
        }
        Ok(())
    }
}

/// Drives indexing runs against one store and one index.
pub struct IndexingPipeline<'a, S: MetadataStore + ?Sized> {
    store: &'a S,
    index: &'a SharedIndex,
    extractor: Arc<dyn FeatureExtractor>,
    settings: IndexerSettings,
    progress: ProgressCallback,
}

impl<S: MetadataStore + ?Sized> fmt::Debug for IndexingPipeline<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexingPipeline")
            .field("index", &self.index)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<'a, S: MetadataStore + ?Sized> IndexingPipeline<'a, S> {
    pub fn new(
        store: &'a S,
        index: &'a SharedIndex,
        extractor: Arc<dyn FeatureExtractor>,
        settings: IndexerSettings,
    ) -> Self {
        Self {
            store,
            index,
            extractor,
            settings,
            progress: progress::silent(),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub const fn settings(&self) -> &IndexerSettings {
        &self.settings
    }

    /// Run every phase over the library rooted at `root`.
    ///
    /// On cancellation the pending batch is committed and
    /// [`EtlError::Interrupted`] is returned; deletion cleanup and index
    /// maintenance are skipped, leaving the persisted index untouched.
    pub async fn index_library(
        &self,
        root: &Path,
        cancel: &CancellationToken,
    ) -> EtlResult<IndexReport> {
        log::info!("Indexing {}", root.display());
        self.log_existing_progress()?;

        let scanned = self.scan(root)?;
        let stored = self.store.all_paths_with_mtime()?;

        let mut unreadable = 0;
        let mut with_mtimes = Vec::with_capacity(scanned.len());
        for path in &scanned {
            match scan::read_mtime(path) {
                Ok(mtime) => with_mtimes.push((path.clone(), mtime)),
                Err(e) => {
                    log::warn!("Cannot read mtime of {}: {e}", path.display());
                    unreadable += 1;
                }
            }
        }
        let selected = scan::select_changed(&with_mtimes, &stored);
        log::info!(
            "Found {} audio files, {} new or modified",
            scanned.len(),
            selected.len()
        );

        let metadata = self.run_metadata_phase(&selected, cancel)?;
        let features = self.run_feature_phase(cancel).await?;

        if cancel.is_cancelled() {
            return Err(EtlError::Interrupted);
        }
        let deleted = self.cleanup_deleted(&scanned, &stored)?;

        let maintenance = maintain_index(
            self.store,
            self.index,
            &features.changed,
            &deleted,
            self.settings.rebuild_threshold,
        )?;

        let report = IndexReport {
            scanned: scanned.len(),
            selected: selected.len(),
            metadata_ok: metadata.ok,
            metadata_failed: metadata.failed + unreadable,
            features_ok: features.counts.ok,
            features_failed: features.counts.failed,
            deleted: deleted.len(),
            maintenance,
        };
        log::info!(
            "Indexing complete: {} scanned, {} metadata, {} features ({} failed), {} deleted; {}",
            report.scanned,
            report.metadata_ok,
            report.features_ok,
            report.features_failed,
            report.deleted,
            report.maintenance
        );
        Ok(report)
    }

    /// All audio files under `root`.
    pub fn scan(&self, root: &Path) -> EtlResult<BTreeSet<PathBuf>> {
        Ok(scan::scan_library(root, &self.settings.extensions)?)
    }

    /// Store metadata (without features) for each path.
    ///
    /// Per-file failures are logged and counted; those files stay eligible
    /// for the next run.
    pub fn run_metadata_phase(
        &self,
        paths: &[PathBuf],
        cancel: &CancellationToken,
    ) -> EtlResult<PhaseCounts> {
        let total = paths.len();
        let mut counts = PhaseCounts::default();
        let mut batch = Batch::new(self.store, self.settings.batch_size);

        for (done, path) in paths.iter().enumerate() {
            if cancel.is_cancelled() {
                batch.flush()?;
                log::warn!("Interrupted after {done} of {total} metadata updates");
                return Err(EtlError::Interrupted);
            }

            match self.store_metadata(path) {
                Ok(id) => {
                    log::debug!("Stored metadata for {} as {id}", path.display());
                    counts.ok += 1;
                    batch.record()?;
                }
                Err(e) => {
                    log::warn!("Skipping metadata for {}: {e:#}", path.display());
                    counts.failed += 1;
                }
            }

            (self.progress)(Progress {
                phase: Phase::Metadata,
                processed: done + 1,
                total,
            });
        }

        batch.flush()?;
        if total > 0 {
            log::info!(
                "Metadata phase complete: {} stored, {} failed",
                counts.ok,
                counts.failed
            );
        }
        Ok(counts)
    }

    fn store_metadata(&self, path: &Path) -> anyhow::Result<TrackId> {
        let mtime = scan::read_mtime(path)?;
        let tags = self.extractor.extract_metadata(path);
        let mut track = Track::new(path.to_path_buf(), mtime);
        track.title = tags.title;
        track.artist = tags.artist;
        track.album = tags.album;
        track.genre = tags.genre;
        track.duration_secs = self.extractor.get_duration(path);
        Ok(self.store.upsert_track(&track, None)?)
    }

    /// Extract and store features for every track that lacks them.
    ///
    /// Each track is submitted once. Timeouts and extraction errors are
    /// logged and counted; a vector whose dimension differs from the stored
    /// ones aborts the run.
    pub async fn run_feature_phase(&self, cancel: &CancellationToken) -> EtlResult<FeatureOutcome> {
        let pending = self.store.tracks_without_features()?;
        let total = pending.len();
        let mut outcome = FeatureOutcome::default();
        if total == 0 {
            return Ok(outcome);
        }

        let mut dimension = self.store.feature_dimension()?;
        let workers = self.settings.workers.max(1);
        let timeout = self.settings.task_timeout;
        log::info!("Extracting features for {total} tracks with {workers} workers");

        let mut results = stream::iter(pending)
            .map(|track| {
                let extractor = Arc::clone(&self.extractor);
                async move {
                    let path = track.file_path.clone();
                    let task = tokio::task::spawn_blocking(move || extractor.extract_features(&path));
                    let result = match tokio::time::timeout(timeout, task).await {
                        Ok(Ok(result)) => result,
                        Ok(Err(e)) => Err(anyhow!("extraction task failed: {e}")),
                        Err(_) => Err(anyhow!("timed out after {timeout:?}")),
                    };
                    (track, result)
                }
            })
            .buffer_unordered(workers);

        let mut batch = Batch::new(self.store, self.settings.batch_size);
        let mut processed = 0;

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    batch.flush()?;
                    log::warn!("Interrupted after {processed} of {total} feature extractions");
                    return Err(EtlError::Interrupted);
                }
                next = results.next() => next,
            };
            let Some((track, result)) = next else {
                break;
            };
            processed += 1;

            match result.and_then(check_finite) {
                Ok(features) => {
                    let found = features.dimension();
                    match dimension {
                        Some(expected) if expected != found => {
                            batch.flush()?;
                            log::error!(
                                "Feature dimension {found} from {} does not match stored dimension {expected}",
                                track.file_path.display()
                            );
                            return Err(EtlError::DimensionMismatch {
                                expected,
                                found,
                                path: track.file_path,
                            });
                        }
                        _ => dimension = Some(found),
                    }

                    match self.store.upsert_track(&track, Some(&features)) {
                        Ok(id) => {
                            log::debug!("Stored features for {}", track.file_path.display());
                            outcome.counts.ok += 1;
                            outcome.changed.push(id);
                            batch.record()?;
                        }
                        Err(e) => {
                            log::warn!(
                                "Failed to store features for {}: {e}",
                                track.file_path.display()
                            );
                            outcome.counts.failed += 1;
                        }
                    }
                }
                Err(e) => {
                    log::warn!("Skipping features for {}: {e:#}", track.file_path.display());
                    outcome.counts.failed += 1;
                }
            }

            (self.progress)(Progress {
                phase: Phase::Features,
                processed,
                total,
            });
        }

        batch.flush()?;
        log::info!(
            "Feature phase complete: {} extracted, {} failed",
            outcome.counts.ok,
            outcome.counts.failed
        );
        Ok(outcome)
    }

    /// Remove stored tracks whose files were not found by the scan.
    /// Returns the ids of the removed tracks.
    pub fn cleanup_deleted(
        &self,
        scanned: &BTreeSet<PathBuf>,
        stored: &HashMap<PathBuf, chrono::DateTime<chrono::Utc>>,
    ) -> EtlResult<Vec<TrackId>> {
        let gone = scan::select_deleted(scanned, stored);
        if gone.is_empty() {
            return Ok(Vec::new());
        }

        let mut deleted = Vec::with_capacity(gone.len());
        for path in gone {
            let id = self.store.get_track_by_path(path)?.and_then(|t| t.id);
            if self.store.delete_track(path)? {
                log::debug!("Removed deleted file {}", path.display());
                deleted.extend(id);
            }
        }
        self.store.commit()?;
        log::info!("Removed {} deleted tracks", deleted.len());
        Ok(deleted)
    }

    fn log_existing_progress(&self) -> EtlResult<()> {
        let stats = self.store.stats()?;
        if stats.total_tracks > 0 {
            log::info!(
                "Existing library: {} tracks, {} with features, {} pending",
                stats.total_tracks,
                stats.tracks_with_features,
                stats.tracks_without_features
            );
        }
        Ok(())
    }
}

fn check_finite(features: Features) -> anyhow::Result<Features> {
    if features.vector.is_empty() {
        return Err(anyhow!("empty feature vector"));
    }
    if !features.bpm.is_finite() || features.vector.iter().any(|v| !v.is_finite()) {
        return Err(anyhow!("non-finite feature values"));
    }
    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::TrackTags;
    use sonance_core::schema::Database;
    use tempfile::TempDir;

    /// Vector derived from the file's byte length; title from its name.
    struct LengthExtractor;

    impl FeatureExtractor for LengthExtractor {
        fn extract_features(&self, path: &Path) -> anyhow::Result<Features> {
            let len = std::fs::metadata(path)?.len() as f32;
            Ok(Features::new(vec![len, 1.0], 100.0 + len))
        }

        fn extract_metadata(&self, path: &Path) -> TrackTags {
            TrackTags::fallback(path)
        }

        fn get_duration(&self, _path: &Path) -> Option<u32> {
            Some(60)
        }
    }

    fn pipeline<'a>(db: &'a Database, index: &'a SharedIndex) -> IndexingPipeline<'a, Database> {
        IndexingPipeline::new(
            db,
            index,
            Arc::new(LengthExtractor),
            IndexerSettings {
                batch_size: 2,
                workers: 2,
                ..IndexerSettings::default()
            },
        )
    }

    #[test]
    fn test_check_finite() {
        assert!(check_finite(Features::new(vec![1.0], 90.0)).is_ok());
        assert!(check_finite(Features::new(vec![f32::NAN], 90.0)).is_err());
        assert!(check_finite(Features::new(vec![1.0], f32::INFINITY)).is_err());
        assert!(check_finite(Features::new(vec![], 90.0)).is_err());
    }

    #[test]
    fn test_metadata_phase_counts_missing_files() {
        let temp_dir = TempDir::new().unwrap();
        let good = temp_dir.path().join("a.mp3");
        std::fs::write(&good, "abc").unwrap();
        let missing = temp_dir.path().join("gone.mp3");

        let db = Database::open_in_memory().unwrap();
        let index = SharedIndex::new(temp_dir.path().join("index.bin"));
        let counts = pipeline(&db, &index)
            .run_metadata_phase(&[good.clone(), missing], &CancellationToken::new())
            .unwrap();

        assert_eq!(counts, PhaseCounts { ok: 1, failed: 1 });
        let track = db.get_track_by_path(&good).unwrap().unwrap();
        assert_eq!(track.title, "a.mp3");
        assert_eq!(track.duration_secs, Some(60));
    }

    #[test]
    fn test_metadata_phase_stops_when_cancelled() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.mp3");
        std::fs::write(&path, "abc").unwrap();

        let db = Database::open_in_memory().unwrap();
        let index = SharedIndex::new(temp_dir.path().join("index.bin"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = pipeline(&db, &index).run_metadata_phase(&[path], &cancel);
        assert!(matches!(result, Err(EtlError::Interrupted)));
        assert_eq!(db.stats().unwrap().total_tracks, 0);
    }

    #[tokio::test]
    async fn test_feature_phase_reports_changed_ids() {
        let temp_dir = TempDir::new().unwrap();
        let mut paths = Vec::new();
        for name in ["a", "b", "c"] {
            let path = temp_dir.path().join(format!("{name}.mp3"));
            std::fs::write(&path, name.repeat(3)).unwrap();
            paths.push(path);
        }

        let db = Database::open_in_memory().unwrap();
        let index = SharedIndex::new(temp_dir.path().join("index.bin"));
        let pipeline = pipeline(&db, &index);
        let cancel = CancellationToken::new();
        pipeline.run_metadata_phase(&paths, &cancel).unwrap();

        let outcome = pipeline.run_feature_phase(&cancel).await.unwrap();
        assert_eq!(outcome.counts, PhaseCounts { ok: 3, failed: 0 });
        let mut changed = outcome.changed.clone();
        changed.sort();
        assert_eq!(changed, db.featured_track_ids().unwrap());

        let again = pipeline.run_feature_phase(&cancel).await.unwrap();
        assert_eq!(again, FeatureOutcome::default());
    }

    #[test]
    fn test_report_display() {
        let report = IndexReport {
            scanned: 5,
            selected: 2,
            metadata_ok: 2,
            metadata_failed: 0,
            features_ok: 2,
            features_failed: 0,
            deleted: 1,
            maintenance: MaintenanceAction::Unchanged,
        };
        let text = report.to_string();
        assert!(text.contains("Files scanned:      5"));
        assert!(text.ends_with("index unchanged"));
    }
}
