//! The rebuild-or-update decision for the persisted index.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fraction of newly featured tracks above which the index is rebuilt.
pub const DEFAULT_REBUILD_THRESHOLD: f64 = 0.10;

/// What maintenance should do after an indexing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaintenancePlan {
    /// No persisted index yet: build from every featured track.
    ColdBuild,
    /// Too much changed: rebuild wholesale.
    Rebuild,
    /// Patch the loaded index with only the changed tracks.
    Incremental,
}

/// Choose a maintenance plan.
///
/// `changed` is the number of tracks that gained features this run and
/// `current` the size of the persisted index.
#[must_use]
pub fn plan(index_exists: bool, current: usize, changed: usize, threshold: f64) -> MaintenancePlan {
    if !index_exists {
        return MaintenancePlan::ColdBuild;
    }
    let ratio = change_ratio(current, changed);
    if ratio > threshold {
        MaintenancePlan::Rebuild
    } else {
        MaintenancePlan::Incremental
    }
}

/// `changed / max(current, 1)`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn change_ratio(current: usize, changed: usize) -> f64 {
    changed as f64 / current.max(1) as f64
}

/// What maintenance actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaintenanceAction {
    /// Built from scratch because no index existed.
    ColdBuild { indexed: usize },
    /// Rebuilt wholesale, either by policy or as a fallback.
    Rebuild { indexed: usize, fallback: bool },
    /// Patched in place.
    Incremental { added: usize, removed: usize },
    /// The persisted index already matched the store.
    Unchanged,
    /// No track has features, so there is nothing to index.
    Skipped,
}

impl fmt::Display for MaintenanceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ColdBuild { indexed } => write!(f, "built new index with {indexed} tracks"),
            Self::Rebuild {
                indexed,
                fallback: false,
            } => write!(f, "rebuilt index with {indexed} tracks"),
            Self::Rebuild {
                indexed,
                fallback: true,
            } => write!(f, "rebuilt index with {indexed} tracks after incremental update failed"),
            Self::Incremental { added, removed } => {
                write!(f, "updated index (+{added} / -{removed})")
            }
            Self::Unchanged => write!(f, "index unchanged"),
            Self::Skipped => write!(f, "no tracks with features; index skipped"),
        }
    }
}
