//! Error types for the vector index and playlist generator.

use thiserror::Error;

/// Errors raised by [`crate::VectorIndex`] operations.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("cannot build an index from zero vectors")]
    EmptyBuild,

    #[error("cannot index zero-length vectors")]
    ZeroDimension,

    #[error("{vectors} vectors but {ids} ids")]
    LengthMismatch { vectors: usize, ids: usize },

    #[error("vector dimension {found} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("index not built; build or load it first")]
    NotBuilt,

    #[error("index I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt index file: {0}")]
    Corrupt(String),

    #[error("unsupported index file version {0}")]
    UnsupportedVersion(u32),
}

impl IndexError {
    /// Returns `true` when no persisted index exists at the requested path.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Convenience alias for index results.
pub type IndexResult<T> = std::result::Result<T, IndexError>;

/// Errors raised while generating a playlist.
#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("at least one seed is required")]
    NoSeeds,

    #[error("no seed songs found in the library")]
    NoSeedsFound,

    #[error("no features found for any seed song")]
    NoFeaturesForSeeds,

    #[error("store error: {0}")]
    Store(#[from] sonance_core::Error),

    #[error("index error: {0}")]
    Index(#[from] IndexError),
}
