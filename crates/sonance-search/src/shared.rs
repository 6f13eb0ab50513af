//! A lazily loaded, swap-on-completion handle to the persisted index.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::IndexResult;
use crate::index::VectorIndex;

/// Shared access to the on-disk [`VectorIndex`].
///
/// Readers get an `Arc` snapshot; maintenance builds a private copy and
/// publishes it with [`SharedIndex::replace`], so a reader never sees an
/// index that is partway through a rebuild.
#[derive(Debug)]
pub struct SharedIndex {
    path: PathBuf,
    current: RwLock<Option<Arc<VectorIndex>>>,
}

impl SharedIndex {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a persisted index file exists.
    #[must_use]
    pub fn exists_on_disk(&self) -> bool {
        self.path.exists()
    }

    /// The current index, loading it from disk on first use.
    pub fn get(&self) -> IndexResult<Arc<VectorIndex>> {
        if let Some(index) = self.loaded() {
            return Ok(index);
        }

        let index = Arc::new(VectorIndex::load(&self.path)?);
        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        // Another reader may have loaded it while we were reading the file.
        Ok(Arc::clone(slot.get_or_insert(index)))
    }

    /// The index already held in memory, without touching disk.
    #[must_use]
    pub fn loaded(&self) -> Option<Arc<VectorIndex>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Arc::clone)
    }

    /// Persist `index` and publish it to readers.
    pub fn publish(&self, index: VectorIndex) -> IndexResult<Arc<VectorIndex>> {
        index.save(&self.path)?;
        Ok(self.replace(index))
    }

    /// Publish `index` to readers without persisting it.
    pub fn replace(&self, index: VectorIndex) -> Arc<VectorIndex> {
        let index = Arc::new(index);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&index));
        index
    }

    /// Drop the in-memory index and delete the persisted file, if any.
    pub fn clear(&self) -> IndexResult<()> {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of indexed tracks, or 0 when no index can be loaded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.get().map(|index| index.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonance_core::model::TrackId;
    use tempfile::TempDir;

    fn built(n: i64) -> VectorIndex {
        let mut index = VectorIndex::new();
        let vectors: Vec<Vec<f32>> = (0..n).map(|i| vec![i as f32, 0.0]).collect();
        let ids: Vec<TrackId> = (0..n).map(TrackId::new).collect();
        index.build(&vectors, &ids).unwrap();
        index
    }

    #[test]
    fn test_get_loads_lazily() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.bin");
        built(3).save(&path).unwrap();

        let shared = SharedIndex::new(&path);
        assert!(shared.loaded().is_none());
        assert_eq!(shared.get().unwrap().len(), 3);
        assert!(shared.loaded().is_some());
    }

    #[test]
    fn test_get_without_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let shared = SharedIndex::new(temp_dir.path().join("index.bin"));
        assert!(shared.get().unwrap_err().is_missing());
        assert_eq!(shared.len(), 0);
    }

    #[test]
    fn test_snapshot_survives_publish() {
        let temp_dir = TempDir::new().unwrap();
        let shared = SharedIndex::new(temp_dir.path().join("index.bin"));
        shared.publish(built(2)).unwrap();

        let before = shared.get().unwrap();
        shared.publish(built(5)).unwrap();

        assert_eq!(before.len(), 2);
        assert_eq!(shared.get().unwrap().len(), 5);
        assert_eq!(VectorIndex::load(shared.path()).unwrap().len(), 5);
    }

    #[test]
    fn test_clear_removes_file() {
        let temp_dir = TempDir::new().unwrap();
        let shared = SharedIndex::new(temp_dir.path().join("index.bin"));
        shared.publish(built(1)).unwrap();

        shared.clear().unwrap();
        assert!(!shared.exists_on_disk());
        assert!(shared.loaded().is_none());
        shared.clear().unwrap();
    }
}
