use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::ids::TrackId;

/// Fixed-dimension numeric fingerprint of a track, plus its tempo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Features {
    pub track_id: Option<TrackId>,
    pub vector: Vec<f32>,
    pub bpm: f32,
}

impl Features {
    #[must_use]
    pub fn new(vector: Vec<f32>, bpm: f32) -> Self {
        Self {
            track_id: None,
            vector,
            bpm,
        }
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    /// Encode the vector as little-endian `f32` bytes for BLOB storage.
    #[must_use]
    pub fn vector_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.vector.len() * 4);
        for &val in &self.vector {
            bytes.extend_from_slice(&val.to_le_bytes());
        }
        bytes
    }

    /// Decode a vector previously written by [`Features::vector_bytes`].
    pub fn vector_from_bytes(bytes: &[u8]) -> Result<Vec<f32>> {
        if bytes.len() % 4 != 0 {
            return Err(Error::InvalidData(format!(
                "feature blob length {} is not a multiple of 4",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }
}
