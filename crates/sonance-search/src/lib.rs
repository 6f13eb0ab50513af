//! Vector search for sonance.
//!
//! Provides the flat nearest-neighbour [`VectorIndex`] over track feature
//! vectors, the rebuild-or-update maintenance policy, and the similarity
//! [`PlaylistGenerator`] built on top of them.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod error;
pub mod export;
pub mod index;
pub mod maintenance;
pub mod playlist;
pub mod shared;

pub use error::{IndexError, IndexResult, PlaylistError};
pub use export::{export, PlaylistFormat};
pub use index::VectorIndex;
pub use maintenance::{MaintenanceAction, MaintenancePlan};
pub use playlist::{PlaylistGenerator, PlaylistSettings, SeedSpec};
pub use shared::SharedIndex;
