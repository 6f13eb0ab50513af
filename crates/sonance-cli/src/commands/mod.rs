pub mod config;
pub mod generate;
pub mod index;
pub mod status;

pub use generate::{run_generate, GenerateArgs};
pub use index::run_index;
pub use status::show_status;

use anyhow::{Context, Result};
use sonance_core::schema::Database;
use std::path::Path;

/// Open the database, creating its directory on first use.
fn open_database(path: &Path) -> Result<Database> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Database::open(path).with_context(|| format!("Failed to open database {}", path.display()))
}
