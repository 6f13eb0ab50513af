//! Flat nearest-neighbour index over track feature vectors.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sonance_core::model::TrackId;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{IndexError, IndexResult};

const MAGIC: &[u8; 4] = b"SNIX";
const FORMAT_VERSION: u32 = 1;

/// Exact k-nearest-neighbour index using squared Euclidean distance.
///
/// Vectors live in one contiguous buffer with a parallel id list. Ids are
/// unique: adding an id that is already present replaces its vector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorIndex {
    dimension: Option<usize>,
    ids: Vec<TrackId>,
    data: Vec<f32>,
    positions: HashMap<TrackId, usize>,
}

impl VectorIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fresh index from `vectors`, replacing everything held before.
    ///
    /// The first vector fixes the dimension. On error `self` is untouched.
    pub fn build(&mut self, vectors: &[Vec<f32>], ids: &[TrackId]) -> IndexResult<()> {
        let first = vectors.first().ok_or(IndexError::EmptyBuild)?;
        check_lengths(vectors, ids)?;
        if first.is_empty() {
            return Err(IndexError::ZeroDimension);
        }

        let mut fresh = Self::with_dimension(first.len());
        fresh.add_vectors(vectors, ids)?;
        *self = fresh;

        log::info!(
            "Built similarity index with {} tracks, dimension {}",
            self.len(),
            first.len()
        );
        Ok(())
    }

    fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: TrackId) -> bool {
        self.positions.contains_key(&id)
    }

    #[must_use]
    pub fn ids(&self) -> &[TrackId] {
        &self.ids
    }

    /// The `k` nearest ids to `query`, closest first, with their squared
    /// distances. Ties are broken by id so results are reproducible.
    pub fn search(&self, query: &[f32], k: usize) -> IndexResult<(Vec<f32>, Vec<TrackId>)> {
        let dimension = self.dimension.ok_or(IndexError::NotBuilt)?;
        if query.len() != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                found: query.len(),
            });
        }
        let mut scored: Vec<(f32, TrackId)> = self
            .data
            .chunks_exact(dimension)
            .zip(&self.ids)
            .map(|(row, &id)| (squared_l2(query, row), id))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.truncate(k);

        Ok(scored.into_iter().unzip())
    }

    /// Add (or replace) vectors. Fails without mutating the index if any
    /// vector's dimension differs from the index dimension.
    pub fn add_vectors(&mut self, vectors: &[Vec<f32>], ids: &[TrackId]) -> IndexResult<()> {
        let dimension = self.dimension.ok_or(IndexError::NotBuilt)?;
        check_lengths(vectors, ids)?;
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                found: bad.len(),
            });
        }

        for (vector, &id) in vectors.iter().zip(ids) {
            let existing = self.positions.get(&id).copied();
            match existing {
                Some(pos) => {
                    self.data[pos * dimension..(pos + 1) * dimension].copy_from_slice(vector);
                }
                None => {
                    self.positions.insert(id, self.ids.len());
                    self.ids.push(id);
                    self.data.extend_from_slice(vector);
                }
            }
        }
        Ok(())
    }

    /// Remove the given ids. Returns how many were present.
    pub fn remove_vectors(&mut self, ids: &[TrackId]) -> usize {
        let Some(dimension) = self.dimension else {
            return 0;
        };
        let doomed: HashSet<TrackId> = ids
            .iter()
            .copied()
            .filter(|id| self.positions.contains_key(id))
            .collect();
        if doomed.is_empty() {
            return 0;
        }

        let mut kept_ids = Vec::with_capacity(self.ids.len() - doomed.len());
        let mut kept_data = Vec::with_capacity(kept_ids.capacity() * dimension);
        for (row, &id) in self.data.chunks_exact(dimension).zip(&self.ids) {
            if !doomed.contains(&id) {
                kept_ids.push(id);
                kept_data.extend_from_slice(row);
            }
        }
        self.ids = kept_ids;
        self.data = kept_data;
        self.reindex_positions();
        doomed.len()
    }

    fn reindex_positions(&mut self) {
        self.positions = self
            .ids
            .iter()
            .enumerate()
            .map(|(pos, &id)| (id, pos))
            .collect();
    }

    /// Persist the index atomically: write a sibling temp file, sync it,
    /// then rename it over `path`.
    pub fn save(&self, path: &Path) -> IndexResult<()> {
        let dimension = self.dimension.ok_or(IndexError::NotBuilt)?;

        let stored_dimension = u32::try_from(dimension)
            .map_err(|_| IndexError::Corrupt(format!("dimension {dimension} is too large")))?;

        let mut body = Vec::with_capacity(12 + self.ids.len() * (8 + dimension * 4));
        body.extend_from_slice(&stored_dimension.to_le_bytes());
        body.extend_from_slice(&(self.ids.len() as u64).to_le_bytes());
        for (row, id) in self.data.chunks_exact(dimension).zip(&self.ids) {
            body.extend_from_slice(&id.get().to_le_bytes());
            for value in row {
                body.extend_from_slice(&value.to_le_bytes());
            }
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&body)?;
        let compressed = encoder.finish()?;

        let tmp = temp_path(path);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(MAGIC)?;
            file.write_all(&FORMAT_VERSION.to_le_bytes())?;
            file.write_all(&compressed)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;

        log::info!("Saved similarity index to {}", path.display());
        Ok(())
    }

    /// Load an index written by [`VectorIndex::save`].
    ///
    /// Returns a new value; nothing existing is touched on failure.
    pub fn load(path: &Path) -> IndexResult<Self> {
        let bytes = fs::read(path)?;
        if bytes.len() < 8 || &bytes[..4] != MAGIC {
            return Err(IndexError::Corrupt("missing index header".to_string()));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != FORMAT_VERSION {
            return Err(IndexError::UnsupportedVersion(version));
        }

        let mut body = Vec::new();
        ZlibDecoder::new(&bytes[8..])
            .read_to_end(&mut body)
            .map_err(|e| IndexError::Corrupt(format!("cannot decompress body: {e}")))?;

        let mut reader = BodyReader { buf: &body, pos: 0 };
        let dimension = reader.u32()? as usize;
        if dimension == 0 {
            return Err(IndexError::Corrupt("zero dimension".to_string()));
        }
        let count = usize::try_from(reader.u64()?)
            .map_err(|_| IndexError::Corrupt("record count overflows".to_string()))?;
        let expected = count
            .checked_mul(8 + dimension * 4)
            .ok_or_else(|| IndexError::Corrupt("record count overflows".to_string()))?;
        if reader.remaining() != expected {
            return Err(IndexError::Corrupt(format!(
                "expected {expected} bytes of records, found {}",
                reader.remaining()
            )));
        }

        let mut index = Self::with_dimension(dimension);
        index.ids.reserve(count);
        index.data.reserve(count * dimension);
        for _ in 0..count {
            let id = TrackId::new(reader.i64()?);
            if index.positions.insert(id, index.ids.len()).is_some() {
                return Err(IndexError::Corrupt(format!("duplicate id {id}")));
            }
            index.ids.push(id);
            for _ in 0..dimension {
                index.data.push(reader.f32()?);
            }
        }

        log::info!(
            "Loaded similarity index from {} with {} tracks",
            path.display(),
            index.len()
        );
        Ok(index)
    }
}

fn check_lengths(vectors: &[Vec<f32>], ids: &[TrackId]) -> IndexResult<()> {
    if vectors.len() == ids.len() {
        Ok(())
    } else {
        Err(IndexError::LengthMismatch {
            vectors: vectors.len(),
            ids: ids.len(),
        })
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl BodyReader<'_> {
    fn take<const N: usize>(&mut self) -> IndexResult<[u8; N]> {
        let end = self.pos + N;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| IndexError::Corrupt("truncated index body".to_string()))?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn u32(&mut self) -> IndexResult<u32> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn u64(&mut self) -> IndexResult<u64> {
        Ok(u64::from_le_bytes(self.take()?))
    }

    fn i64(&mut self) -> IndexResult<i64> {
        Ok(i64::from_le_bytes(self.take()?))
    }

    fn f32(&mut self) -> IndexResult<f32> {
        Ok(f32::from_le_bytes(self.take()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ids(raw: &[i64]) -> Vec<TrackId> {
        raw.iter().copied().map(TrackId::new).collect()
    }

    fn sample_index() -> VectorIndex {
        let mut index = VectorIndex::new();
        index
            .build(
                &[vec![0.0, 0.0], vec![1.0, 0.0], vec![5.0, 5.0], vec![0.0, 2.0]],
                &ids(&[10, 11, 12, 13]),
            )
            .unwrap();
        index
    }

    #[test]
    fn test_build_rejects_empty_input() {
        let mut index = VectorIndex::new();
        assert!(matches!(index.build(&[], &[]), Err(IndexError::EmptyBuild)));
    }

    #[test]
    fn test_build_rejects_length_mismatch() {
        let mut index = VectorIndex::new();
        let result = index.build(&[vec![1.0]], &ids(&[1, 2]));
        assert!(matches!(
            result,
            Err(IndexError::LengthMismatch { vectors: 1, ids: 2 })
        ));
        assert!(index.dimension().is_none());
    }

    #[test]
    fn test_build_rejects_zero_dimension() {
        let mut index = VectorIndex::new();
        assert!(matches!(
            index.build(&[vec![]], &ids(&[1])),
            Err(IndexError::ZeroDimension)
        ));
    }

    #[test]
    fn test_build_replaces_previous_contents() {
        let mut index = sample_index();
        index.build(&[vec![1.0, 2.0, 3.0]], &ids(&[99])).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.dimension(), Some(3));
        assert!(!index.contains(TrackId::new(10)));
    }

    #[test]
    fn test_search_before_build_fails() {
        let index = VectorIndex::new();
        assert!(matches!(
            index.search(&[1.0], 3),
            Err(IndexError::NotBuilt)
        ));
    }

    #[test]
    fn test_search_orders_by_distance() {
        let index = sample_index();
        let (distances, found) = index.search(&[0.1, 0.0], 10).unwrap();

        assert_eq!(found, ids(&[10, 11, 13, 12]));
        assert_eq!(distances.len(), 4);
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
        assert!((distances[0] - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_search_truncates_to_k() {
        let index = sample_index();
        let (distances, found) = index.search(&[5.0, 5.0], 1).unwrap();
        assert_eq!(found, ids(&[12]));
        assert_eq!(distances, vec![0.0]);
    }

    #[test]
    fn test_search_dimension_mismatch() {
        let index = sample_index();
        assert!(matches!(
            index.search(&[1.0, 2.0, 3.0], 2),
            Err(IndexError::DimensionMismatch {
                expected: 2,
                found: 3
            })
        ));
    }

    #[test]
    fn test_add_wrong_dimension_never_mutates() {
        let mut index = sample_index();
        let before = index.clone();

        let result = index.add_vectors(&[vec![1.0, 1.0], vec![1.0]], &ids(&[20, 21]));

        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
        assert_eq!(index.len(), 4);
        assert_eq!(index, before);
    }

    #[test]
    fn test_add_replaces_existing_id() {
        let mut index = sample_index();
        index
            .add_vectors(&[vec![9.0, 9.0], vec![3.0, 3.0]], &ids(&[10, 20]))
            .unwrap();
        assert_eq!(index.len(), 5);

        let (_, found) = index.search(&[9.0, 9.0], 1).unwrap();
        assert_eq!(found, ids(&[10]));
    }

    #[test]
    fn test_remove_vectors() {
        let mut index = sample_index();
        assert_eq!(index.remove_vectors(&ids(&[11, 12, 404])), 2);
        assert_eq!(index.len(), 2);
        assert!(!index.contains(TrackId::new(11)));

        let (_, found) = index.search(&[0.0, 2.0], 2).unwrap();
        assert_eq!(found, ids(&[13, 10]));

        // Positions stay consistent after compaction.
        index.add_vectors(&[vec![0.0, 2.5]], &ids(&[13])).unwrap();
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.bin");
        let index = sample_index();

        index.save(&path).unwrap();
        let loaded = VectorIndex::load(&path).unwrap();

        assert_eq!(loaded, index);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_save_is_deterministic() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a.bin");
        let b = temp_dir.path().join("b.bin");
        sample_index().save(&a).unwrap();
        sample_index().save(&b).unwrap();
        assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap());
    }

    #[test]
    fn test_save_unbuilt_fails() {
        let temp_dir = TempDir::new().unwrap();
        let result = VectorIndex::new().save(&temp_dir.path().join("index.bin"));
        assert!(matches!(result, Err(IndexError::NotBuilt)));
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = VectorIndex::load(&temp_dir.path().join("absent.bin")).unwrap_err();
        assert!(err.is_missing());
    }

    #[test]
    fn test_load_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.bin");

        fs::write(&path, b"not an index").unwrap();
        assert!(matches!(
            VectorIndex::load(&path),
            Err(IndexError::Corrupt(_))
        ));

        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(b"garbage");
        fs::write(&path, bytes).unwrap();
        assert!(matches!(
            VectorIndex::load(&path),
            Err(IndexError::Corrupt(_))
        ));
    }

    #[test]
    fn test_load_truncated_records() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.bin");

        let mut body = Vec::new();
        body.extend_from_slice(&2u32.to_le_bytes());
        body.extend_from_slice(&3u64.to_le_bytes());
        body.extend_from_slice(&1i64.to_le_bytes());
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&body).unwrap();

        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&encoder.finish().unwrap());
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            VectorIndex::load(&path),
            Err(IndexError::Corrupt(_))
        ));
    }

    #[test]
    fn test_load_unsupported_version() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.bin");
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&7u32.to_le_bytes());
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            VectorIndex::load(&path),
            Err(IndexError::UnsupportedVersion(7))
        ));
    }
}
