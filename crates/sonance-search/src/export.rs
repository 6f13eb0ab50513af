//! Writing playlists to M3U, M3U8 and JSON files.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sonance_core::model::{Playlist, Track, TrackId};
use sonance_core::{Error, Result};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Output formats for exported playlists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistFormat {
    M3u,
    /// M3U written as UTF-8.
    M3u8,
    Json,
}

impl PlaylistFormat {
    /// Detect the format from a file extension (case-insensitive).
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "m3u" => Some(Self::M3u),
            "m3u8" => Some(Self::M3u8),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| Self::from_extension(&ext.to_string_lossy()))
    }
}

impl fmt::Display for PlaylistFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::M3u => write!(f, "M3U"),
            Self::M3u8 => write!(f, "M3U8"),
            Self::Json => write!(f, "JSON"),
        }
    }
}

/// Export using the format implied by `path`'s extension.
pub fn export(playlist: &Playlist, path: &Path) -> Result<PlaylistFormat> {
    let format = PlaylistFormat::from_path(path).ok_or_else(|| {
        Error::InvalidData(format!(
            "unsupported playlist format for {}; use .m3u, .m3u8 or .json",
            path.display()
        ))
    })?;
    export_as(playlist, path, format)?;
    Ok(format)
}

/// Export in an explicit format, regardless of extension.
pub fn export_as(playlist: &Playlist, path: &Path, format: PlaylistFormat) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    match format {
        PlaylistFormat::M3u | PlaylistFormat::M3u8 => write_m3u(playlist, &mut out)?,
        PlaylistFormat::Json => write_json(playlist, &mut out)?,
    }
    out.flush()?;
    log::info!("Exported {format} playlist to {}", path.display());
    Ok(())
}

pub fn export_m3u(playlist: &Playlist, path: &Path) -> Result<()> {
    export_as(playlist, path, PlaylistFormat::M3u)
}

pub fn export_m3u8(playlist: &Playlist, path: &Path) -> Result<()> {
    export_as(playlist, path, PlaylistFormat::M3u8)
}

pub fn export_json(playlist: &Playlist, path: &Path) -> Result<()> {
    export_as(playlist, path, PlaylistFormat::Json)
}

/// Extended M3U: one `#EXTINF` line per track, `-1` for unknown duration.
pub fn write_m3u<W: Write>(playlist: &Playlist, out: &mut W) -> Result<()> {
    writeln!(out, "#EXTM3U")?;
    for song in &playlist.songs {
        let duration = song.duration_secs.map_or(-1, i64::from);
        writeln!(out, "#EXTINF:{duration},{} - {}", song.artist, song.title)?;
        writeln!(out, "{}", song.file_path.display())?;
    }
    Ok(())
}

#[derive(Serialize)]
struct JsonPlaylist<'a> {
    created_at: DateTime<Utc>,
    seed_songs: Vec<JsonSeed<'a>>,
    songs: Vec<JsonSong<'a>>,
}

#[derive(Serialize)]
struct JsonSeed<'a> {
    id: Option<TrackId>,
    title: &'a str,
    artist: &'a str,
    file_path: &'a PathBuf,
}

#[derive(Serialize)]
struct JsonSong<'a> {
    id: Option<TrackId>,
    title: &'a str,
    artist: &'a str,
    album: &'a str,
    genre: &'a str,
    file_path: &'a PathBuf,
    duration: Option<u32>,
}

impl<'a> From<&'a Track> for JsonSeed<'a> {
    fn from(t: &'a Track) -> Self {
        Self {
            id: t.id,
            title: &t.title,
            artist: &t.artist,
            file_path: &t.file_path,
        }
    }
}

impl<'a> From<&'a Track> for JsonSong<'a> {
    fn from(t: &'a Track) -> Self {
        Self {
            id: t.id,
            title: &t.title,
            artist: &t.artist,
            album: &t.album,
            genre: &t.genre,
            file_path: &t.file_path,
            duration: t.duration_secs,
        }
    }
}

pub fn write_json<W: Write>(playlist: &Playlist, out: &mut W) -> Result<()> {
    let doc = JsonPlaylist {
        created_at: playlist.created_at,
        seed_songs: playlist.seed_songs.iter().map(JsonSeed::from).collect(),
        songs: playlist.songs.iter().map(JsonSong::from).collect(),
    };
    serde_json::to_writer_pretty(&mut *out, &doc)?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn song(id: i64, title: &str, duration: Option<u32>) -> Track {
        let mut track = Track::new(PathBuf::from(format!("/music/{title}.flac")), Utc::now());
        track.id = Some(TrackId::new(id));
        track.title = title.to_string();
        track.artist = "Artist".to_string();
        track.album = "Album".to_string();
        track.duration_secs = duration;
        track
    }

    fn playlist() -> Playlist {
        Playlist::new(
            vec![song(2, "Two", Some(180)), song(3, "Three", None)],
            vec![song(1, "One", Some(200))],
        )
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            PlaylistFormat::from_path(Path::new("out.m3u")),
            Some(PlaylistFormat::M3u)
        );
        assert_eq!(
            PlaylistFormat::from_path(Path::new("out.M3U8")),
            Some(PlaylistFormat::M3u8)
        );
        assert_eq!(
            PlaylistFormat::from_path(Path::new("out.json")),
            Some(PlaylistFormat::Json)
        );
        assert_eq!(PlaylistFormat::from_path(Path::new("out.txt")), None);
        assert_eq!(PlaylistFormat::from_path(Path::new("out")), None);
    }

    #[test]
    fn test_m3u_layout() {
        let mut buf = Vec::new();
        write_m3u(&playlist(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert_eq!(
            text,
            "#EXTM3U\n\
             #EXTINF:180,Artist - Two\n\
             /music/Two.flac\n\
             #EXTINF:-1,Artist - Three\n\
             /music/Three.flac\n"
        );
    }

    #[test]
    fn test_json_fields() {
        let mut buf = Vec::new();
        write_json(&playlist(), &mut buf).unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&buf).unwrap();

        assert!(doc["created_at"].is_string());
        assert_eq!(doc["seed_songs"][0]["id"], 1);
        assert_eq!(doc["seed_songs"][0]["title"], "One");
        assert!(doc["seed_songs"][0].get("album").is_none());
        assert_eq!(doc["songs"].as_array().unwrap().len(), 2);
        assert_eq!(doc["songs"][0]["album"], "Album");
        assert_eq!(doc["songs"][0]["duration"], 180);
        assert!(doc["songs"][1]["duration"].is_null());
        assert_eq!(doc["songs"][1]["file_path"], "/music/Three.flac");
    }

    #[test]
    fn test_export_by_extension() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mix.m3u8");

        assert_eq!(export(&playlist(), &path).unwrap(), PlaylistFormat::M3u8);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("#EXTM3U\n"));
    }

    #[test]
    fn test_export_rejects_unknown_extension() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mix.pls");

        assert!(matches!(
            export(&playlist(), &path),
            Err(Error::InvalidData(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_export_json_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mix.json");

        export_json(&playlist(), &path).unwrap();
        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["songs"][1]["title"], "Three");
    }
}
