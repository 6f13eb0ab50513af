//! Library indexing for sonance.
//!
//! Scans a music library, stores track metadata, extracts feature vectors
//! on a bounded worker pool and keeps the similarity index in step with
//! the store.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod audio;
pub mod config;
pub mod error;
pub mod extract;
pub mod maintain;
pub mod pipeline;
pub mod progress;
pub mod scan;

pub use config::Config;
pub use error::{EtlError, EtlResult};
pub use extract::{AnalyzerSettings, AudioAnalyzer, FeatureExtractor, TrackTags};
pub use maintain::maintain_index;
pub use pipeline::{FeatureOutcome, IndexReport, IndexerSettings, IndexingPipeline, PhaseCounts};
pub use progress::{Phase, Progress, ProgressCallback};
