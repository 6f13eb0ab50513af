use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::model::{Features, Track, TrackId};
use crate::store::{IndexingStats, MetadataStore};

use super::migrations::MIGRATIONS;

const TRACK_COLUMNS: &str =
    "t.id, t.file_path, t.title, t.artist, t.album, t.genre, t.last_modified, t.duration_secs";

/// A SQLite-backed [`MetadataStore`].
///
/// Writes open a transaction lazily; it stays open until
/// [`MetadataStore::commit`] so callers can checkpoint in batches. Dropping
/// the database with a transaction still open rolls it back.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) a database at the given path and apply migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.configure()?;
        db.apply_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.configure()?;
        db.apply_migrations()?;
        Ok(db)
    }

    /// Get a reference to the underlying connection (for advanced queries).
    #[must_use]
    pub const fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Whether writes are staged and waiting for a commit.
    #[must_use]
    pub fn has_pending_writes(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn configure(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(())
    }

    fn apply_migrations(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;

        let mut stmt = self
            .conn
            .prepare("SELECT version FROM schema_migrations ORDER BY version")?;
        let applied: Vec<u32> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let supported = MIGRATIONS.iter().map(|m| m.version).max().unwrap_or(0);
        if let Some(&found) = applied.iter().max() {
            if found > supported {
                return Err(Error::UnsupportedSchema { found, supported });
            }
        }

        for migration in MIGRATIONS {
            if !applied.contains(&migration.version) {
                log::info!(
                    "Applying migration {} ({})",
                    migration.version,
                    migration.name
                );
                self.conn.execute_batch(migration.sql)?;
                self.conn.execute(
                    "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
                    rusqlite::params![migration.version, migration.name],
                )?;
            }
        }

        Ok(())
    }

    fn begin(&self) -> Result<()> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    fn query_tracks(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Track>> {
        let mut stmt = self.conn.prepare(sql)?;
        let tracks = stmt
            .query_map(params, row_to_track)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tracks)
    }

    fn query_track(&self, sql: &str, params: impl rusqlite::Params) -> Result<Option<Track>> {
        Ok(self.conn.query_row(sql, params, row_to_track).optional()?)
    }
}

/// Paths are stored as their raw OS bytes so names that are not valid
/// UTF-8 keep their identity.
#[cfg(unix)]
fn path_to_sql(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn path_to_sql(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

#[cfg(unix)]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

fn path_from_sql(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<PathBuf> {
    match row.get_ref(idx)? {
        ValueRef::Blob(bytes) | ValueRef::Text(bytes) => Ok(path_from_bytes(bytes)),
        other => Err(rusqlite::Error::InvalidColumnType(
            idx,
            "file_path".to_string(),
            other.data_type(),
        )),
    }
}

fn mtime_to_sql(mtime: &DateTime<Utc>) -> Result<i64> {
    mtime
        .timestamp_nanos_opt()
        .ok_or_else(|| Error::InvalidData(format!("mtime {mtime} is out of range")))
}

fn row_to_track(row: &rusqlite::Row) -> rusqlite::Result<Track> {
    Ok(Track {
        id: Some(TrackId::new(row.get(0)?)),
        file_path: path_from_sql(row, 1)?,
        title: row.get(2)?,
        artist: row.get(3)?,
        album: row.get(4)?,
        genre: row.get(5)?,
        last_modified: DateTime::from_timestamp_nanos(row.get(6)?),
        duration_secs: row.get(7)?,
    })
}

/// Maps `(track_id, vector, bpm)` starting at column `offset`.
fn row_to_features(row: &rusqlite::Row, offset: usize) -> rusqlite::Result<Features> {
    let blob: Vec<u8> = row.get(offset + 1)?;
    let vector = Features::vector_from_bytes(&blob).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            offset + 1,
            rusqlite::types::Type::Blob,
            Box::new(e),
        )
    })?;
    Ok(Features {
        track_id: Some(TrackId::new(row.get(offset)?)),
        vector,
        bpm: row.get(offset + 2)?,
    })
}

impl MetadataStore for Database {
    fn upsert_track(&self, track: &Track, features: Option<&Features>) -> Result<TrackId> {
        self.begin()?;

        let path = path_to_sql(&track.file_path);
        let mtime = mtime_to_sql(&track.last_modified)?;

        let existing: Option<(i64, i64)> = self
            .conn
            .query_row(
                "SELECT id, last_modified FROM tracks WHERE file_path = ?1",
                [&path],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let id = match existing {
            Some((id, stored_mtime)) => {
                self.conn.execute(
                    "UPDATE tracks SET
                        title = ?2, artist = ?3, album = ?4, genre = ?5,
                        last_modified = ?6, duration_secs = ?7
                     WHERE id = ?1",
                    rusqlite::params![
                        id,
                        track.title,
                        track.artist,
                        track.album,
                        track.genre,
                        mtime,
                        track.duration_secs,
                    ],
                )?;
                if features.is_none() && stored_mtime != mtime {
                    let dropped = self
                        .conn
                        .execute("DELETE FROM features WHERE track_id = ?1", [id])?;
                    if dropped > 0 {
                        log::debug!("Dropped stale features for {}", track.file_path.display());
                    }
                }
                id
            }
            None => {
                self.conn.execute(
                    "INSERT INTO tracks (
                        file_path, title, artist, album, genre, last_modified, duration_secs
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        path,
                        track.title,
                        track.artist,
                        track.album,
                        track.genre,
                        mtime,
                        track.duration_secs,
                    ],
                )?;
                self.conn.last_insert_rowid()
            }
        };

        if let Some(features) = features {
            self.conn.execute(
                "INSERT INTO features (track_id, vector, bpm) VALUES (?1, ?2, ?3)
                 ON CONFLICT(track_id) DO UPDATE SET vector = excluded.vector, bpm = excluded.bpm",
                rusqlite::params![id, features.vector_bytes(), f64::from(features.bpm)],
            )?;
        }

        Ok(TrackId::new(id))
    }

    fn get_track(&self, id: TrackId) -> Result<Option<Track>> {
        self.query_track(
            &format!("SELECT {TRACK_COLUMNS} FROM tracks t WHERE t.id = ?1"),
            [id.get()],
        )
    }

    fn get_track_by_path(&self, path: &Path) -> Result<Option<Track>> {
        self.query_track(
            &format!("SELECT {TRACK_COLUMNS} FROM tracks t WHERE t.file_path = ?1"),
            [path_to_sql(path)],
        )
    }

    fn find_exact(&self, title: &str, artist: &str, album: &str) -> Result<Option<Track>> {
        self.query_track(
            &format!(
                "SELECT {TRACK_COLUMNS} FROM tracks t
                 WHERE t.title = ?1 AND t.artist = ?2 AND t.album = ?3
                 ORDER BY t.id LIMIT 1"
            ),
            [title, artist, album],
        )
    }

    fn get_features(&self, id: TrackId) -> Result<Option<Features>> {
        Ok(self
            .conn
            .query_row(
                "SELECT track_id, vector, bpm FROM features WHERE track_id = ?1",
                [id.get()],
                |row| row_to_features(row, 0),
            )
            .optional()?)
    }

    fn track_with_features(&self, id: TrackId) -> Result<Option<(Track, Features)>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {TRACK_COLUMNS}, f.track_id, f.vector, f.bpm
                     FROM tracks t JOIN features f ON f.track_id = t.id
                     WHERE t.id = ?1"
                ),
                [id.get()],
                |row| Ok((row_to_track(row)?, row_to_features(row, 8)?)),
            )
            .optional()?)
    }

    fn tracks_without_features(&self) -> Result<Vec<Track>> {
        self.query_tracks(
            &format!(
                "SELECT {TRACK_COLUMNS} FROM tracks t
                 LEFT JOIN features f ON f.track_id = t.id
                 WHERE f.track_id IS NULL
                 ORDER BY t.id"
            ),
            [],
        )
    }

    fn tracks_with_features(&self) -> Result<Vec<(Track, Features)>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TRACK_COLUMNS}, f.track_id, f.vector, f.bpm
             FROM tracks t JOIN features f ON f.track_id = t.id
             ORDER BY t.id"
        ))?;
        let rows = stmt
            .query_map([], |row| Ok((row_to_track(row)?, row_to_features(row, 8)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn featured_track_ids(&self) -> Result<Vec<TrackId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT track_id FROM features ORDER BY track_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0).map(TrackId::new))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn all_paths_with_mtime(&self) -> Result<HashMap<PathBuf, DateTime<Utc>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT file_path, last_modified FROM tracks")?;
        let paths = stmt
            .query_map([], |row| {
                let path = path_from_sql(row, 0)?;
                let mtime: i64 = row.get(1)?;
                Ok((path, DateTime::from_timestamp_nanos(mtime)))
            })?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(paths)
    }

    fn delete_track(&self, path: &Path) -> Result<bool> {
        self.begin()?;
        let path = path_to_sql(path);
        self.conn.execute(
            "DELETE FROM features WHERE track_id IN (SELECT id FROM tracks WHERE file_path = ?1)",
            [&path],
        )?;
        let deleted = self
            .conn
            .execute("DELETE FROM tracks WHERE file_path = ?1", [&path])?;
        Ok(deleted > 0)
    }

    fn commit(&self) -> Result<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    fn stats(&self) -> Result<IndexingStats> {
        let (total, with_features): (i64, i64) = self.conn.query_row(
            "SELECT (SELECT COUNT(*) FROM tracks), (SELECT COUNT(*) FROM features)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let total = usize::try_from(total).unwrap_or(0);
        let with_features = usize::try_from(with_features).unwrap_or(0);
        Ok(IndexingStats {
            total_tracks: total,
            tracks_with_features: with_features,
            tracks_without_features: total.saturating_sub(with_features),
        })
    }

    fn feature_dimension(&self) -> Result<Option<usize>> {
        let bytes: Option<i64> = self
            .conn
            .query_row("SELECT length(vector) FROM features LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(bytes.and_then(|b| usize::try_from(b / 4).ok()))
    }
}
