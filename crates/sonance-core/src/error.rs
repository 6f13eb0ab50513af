use thiserror::Error;

/// Errors raised by the metadata store and the core models.
#[derive(Debug, Error)]
pub enum Error {
    #[error("store error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{entity} not found for track {id}")]
    NotFound { entity: &'static str, id: String },

    /// A stored or supplied value that cannot be represented.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The database was migrated by a newer build.
    #[error("database schema version {found} is newer than the supported version {supported}")]
    UnsupportedSchema { found: u32, supported: u32 },
}

pub type Result<T> = std::result::Result<T, Error>;
