//! Error types for the indexing pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort an indexing run.
///
/// Failures on individual files are not represented here; they are logged,
/// counted in the run report, and retried on the next run.
#[derive(Debug, Error)]
pub enum EtlError {
    /// An error propagated from the metadata store.
    #[error("store error: {0}")]
    Store(#[from] sonance_core::Error),

    /// An error propagated from the vector index.
    #[error("index error: {0}")]
    Index(#[from] sonance_search::IndexError),

    /// The extractor produced vectors of a different dimension than the
    /// ones already stored. Mixing them would corrupt the index.
    #[error(
        "feature dimension {found} from {} does not match stored dimension {expected}",
        path.display()
    )]
    DimensionMismatch {
        expected: usize,
        found: usize,
        path: PathBuf,
    },

    /// The run was cancelled. Work committed before cancellation is kept.
    #[error("indexing interrupted")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EtlError {
    /// Returns `true` when the run stopped because it was cancelled.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

/// Convenience alias for pipeline results.
pub type EtlResult<T> = std::result::Result<T, EtlError>;
