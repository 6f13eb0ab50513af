//! Library discovery and change detection.

use chrono::{DateTime, Utc};
use sonance_core::model::mtime_from_system_time;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Whether `path` has one of the allowed (lowercase) extensions.
pub fn is_audio_file(path: &Path, extensions: &[String]) -> bool {
    path.extension().is_some_and(|ext| {
        let ext = ext.to_string_lossy().to_lowercase();
        extensions.iter().any(|allowed| *allowed == ext)
    })
}

/// Walk `root` and collect the absolute paths of all audio files.
///
/// Unreadable directory entries are logged and skipped.
///
/// # Errors
/// Returns an error if `root` itself cannot be resolved.
pub fn scan_library(root: &Path, extensions: &[String]) -> std::io::Result<BTreeSet<PathBuf>> {
    let root = std::fs::canonicalize(root)?;
    let mut found = BTreeSet::new();

    for entry in WalkDir::new(&root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping unreadable entry under {}: {e}", root.display());
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_audio_file(entry.path(), extensions) {
            continue;
        }
        found.insert(entry.into_path());
    }

    Ok(found)
}

/// Read a file's modification time in the store's representation.
pub fn read_mtime(path: &Path) -> std::io::Result<DateTime<Utc>> {
    Ok(mtime_from_system_time(std::fs::metadata(path)?.modified()?))
}

/// Paths that need (re)processing: unknown to the store, or modified
/// since they were stored.
///
/// A stored mtime newer than the file's is treated as unchanged.
#[must_use]
pub fn select_changed(
    scanned: &[(PathBuf, DateTime<Utc>)],
    stored: &HashMap<PathBuf, DateTime<Utc>>,
) -> Vec<PathBuf> {
    scanned
        .iter()
        .filter(|(path, mtime)| stored.get(path).is_none_or(|known| mtime > known))
        .map(|(path, _)| path.clone())
        .collect()
}

/// Stored paths that were not seen in the latest scan.
#[must_use]
pub fn select_deleted<'a>(
    scanned: &BTreeSet<PathBuf>,
    stored: &'a HashMap<PathBuf, DateTime<Utc>>,
) -> Vec<&'a PathBuf> {
    let mut gone: Vec<&PathBuf> = stored
        .keys()
        .filter(|path| !scanned.contains(*path))
        .collect();
    gone.sort();
    gone
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    fn exts() -> Vec<String> {
        ["mp3", "flac", "wav", "ogg"]
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_is_audio_file() {
        assert!(is_audio_file(Path::new("/music/test.flac"), &exts()));
        assert!(is_audio_file(Path::new("/music/test.MP3"), &exts()));
        assert!(is_audio_file(Path::new("/music/test.ogg"), &exts()));
        assert!(!is_audio_file(Path::new("/music/test.m4a"), &exts()));
        assert!(!is_audio_file(Path::new("/music/test.txt"), &exts()));
        assert!(!is_audio_file(Path::new("/music/test"), &exts()));
    }

    #[test]
    fn test_scan_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        assert!(scan_library(temp_dir.path(), &exts()).unwrap().is_empty());
    }

    #[test]
    fn test_scan_filters_and_recurses() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("artist").join("album");
        fs::create_dir_all(&nested).unwrap();
        fs::write(temp_dir.path().join("b.mp3"), "x").unwrap();
        fs::write(nested.join("a.flac"), "x").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "x").unwrap();
        fs::create_dir(temp_dir.path().join("dir.mp3")).unwrap();

        let found = scan_library(temp_dir.path(), &exts()).unwrap();

        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| p.is_absolute()));
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&"a.flac".to_string()));
        assert!(names.contains(&"b.mp3".to_string()));
    }

    #[test]
    fn test_scan_missing_root_fails() {
        let temp_dir = TempDir::new().unwrap();
        assert!(scan_library(&temp_dir.path().join("missing"), &exts()).is_err());
    }

    #[test]
    fn test_select_changed() {
        let scanned = vec![
            (PathBuf::from("/m/new.mp3"), at(10)),
            (PathBuf::from("/m/same.mp3"), at(10)),
            (PathBuf::from("/m/newer.mp3"), at(20)),
            (PathBuf::from("/m/older.mp3"), at(5)),
        ];
        let stored = HashMap::from([
            (PathBuf::from("/m/same.mp3"), at(10)),
            (PathBuf::from("/m/newer.mp3"), at(10)),
            (PathBuf::from("/m/older.mp3"), at(10)),
        ]);

        let selected = select_changed(&scanned, &stored);
        assert_eq!(
            selected,
            vec![PathBuf::from("/m/new.mp3"), PathBuf::from("/m/newer.mp3")]
        );
    }

    #[test]
    fn test_select_changed_is_strict_on_subsecond_mtimes() {
        let base = at(10);
        let bumped = base + chrono::Duration::nanoseconds(1);
        let stored = HashMap::from([(PathBuf::from("/m/a.mp3"), base)]);

        assert!(select_changed(&[(PathBuf::from("/m/a.mp3"), base)], &stored).is_empty());
        assert_eq!(
            select_changed(&[(PathBuf::from("/m/a.mp3"), bumped)], &stored).len(),
            1
        );
    }

    #[test]
    fn test_select_deleted() {
        let scanned = BTreeSet::from([PathBuf::from("/m/a.mp3")]);
        let stored = HashMap::from([
            (PathBuf::from("/m/a.mp3"), at(1)),
            (PathBuf::from("/m/c.mp3"), at(1)),
            (PathBuf::from("/m/b.mp3"), at(1)),
        ]);

        assert_eq!(
            select_deleted(&scanned, &stored),
            vec![&PathBuf::from("/m/b.mp3"), &PathBuf::from("/m/c.mp3")]
        );
    }
}
