/// A schema migration.
#[derive(Debug)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

const MIGRATION_001: &str = r#"
-- Tracks (one row per audio file, keyed by path)
CREATE TABLE IF NOT EXISTS tracks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    artist TEXT NOT NULL,
    album TEXT NOT NULL,
    genre TEXT NOT NULL,
    last_modified INTEGER NOT NULL,
    duration_secs INTEGER
);

CREATE INDEX IF NOT EXISTS idx_tracks_exact ON tracks(title, artist, album);

-- Feature vectors (at most one per track)
CREATE TABLE IF NOT EXISTS features (
    track_id INTEGER PRIMARY KEY REFERENCES tracks(id) ON DELETE CASCADE,
    vector BLOB NOT NULL,
    bpm REAL NOT NULL
);
"#;

// Paths become raw OS bytes; earlier rows were written as UTF-8 text.
const MIGRATION_002: &str = r#"
UPDATE tracks SET file_path = CAST(file_path AS BLOB) WHERE typeof(file_path) = 'text';
"#;

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: MIGRATION_001,
    },
    Migration {
        version: 2,
        name: "path_bytes",
        sql: MIGRATION_002,
    },
];
