//! Core domain model for sonance.
//!
//! This crate defines the track, feature and playlist models, the
//! [`MetadataStore`] contract the indexer and playlist generator work
//! against, and its SQLite implementation.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod error;
pub mod model;
pub mod schema;
pub mod store;

pub use error::{Error, Result};
pub use store::MetadataStore;
