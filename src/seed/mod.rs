//! Directory seeding: walk a photo tree, hash each file, and upsert pending
//! image records for the pipeline to drain.
//!
//! Records are keyed by content hash, so seeding the same tree twice adds
//! nothing and never resets a record that was already embedded.

mod hashing;

use anyhow::{bail, Result};
use chrono::NaiveDateTime;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::ScannerConfig;
use crate::db::{Database, EmbeddingStatus, ImageRecord, MediaType};

pub use hashing::sha256_file;

#[derive(Debug, Clone, Default)]
pub struct SeedReport {
    /// Files visited in the walk.
    pub scanned: usize,
    /// Files matching the configured extensions.
    pub matched: usize,
    /// New pending records created.
    pub inserted: usize,
    /// Files already known by content hash.
    pub skipped: usize,
    /// Files that could not be hashed or stored.
    pub failed: usize,
}

/// Seed every matching file under `dir` into `album_id` (default: the
/// directory's leaf name).
pub fn seed_directory(
    db: &Database,
    scanner: &ScannerConfig,
    dir: &Path,
    album_id: Option<&str>,
    recursive: bool,
    include_videos: bool,
) -> Result<SeedReport> {
    if !dir.is_dir() {
        bail!("not a directory: {}", dir.display());
    }

    let album = match album_id {
        Some(id) => id.to_string(),
        None => dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unsorted".to_string()),
    };

    let mut report = SeedReport::default();
    let now = chrono::Utc::now().to_rfc3339();

    let walker = WalkDir::new(dir)
        .follow_links(false)
        .max_depth(if recursive { usize::MAX } else { 1 });

    for entry in walker.into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        report.scanned += 1;

        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let media_type = match media_type_for(&ext, scanner) {
            Some(MediaType::Video) if !include_videos => continue,
            Some(mt) => mt,
            None => continue,
        };
        report.matched += 1;

        let hash = match sha256_file(path) {
            Ok(hash) => hash,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "hash failed");
                report.failed += 1;
                continue;
            }
        };

        let record = ImageRecord {
            id: hash,
            album_id: album.clone(),
            absolute_path: path.to_string_lossy().to_string(),
            media_type,
            status: EmbeddingStatus::Pending,
            created_at: now.clone(),
            embedded_at: None,
            last_error: None,
            subject_id: None,
            taken_at: exif_taken_at(path),
            has_people: false,
        };

        match db.upsert_image(&record) {
            Ok(true) => report.inserted += 1,
            Ok(false) => report.skipped += 1,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "upsert failed");
                report.failed += 1;
            }
        }
    }

    info!(
        album = %album,
        scanned = report.scanned,
        matched = report.matched,
        inserted = report.inserted,
        skipped = report.skipped,
        failed = report.failed,
        "seed complete"
    );

    Ok(report)
}

fn media_type_for(ext: &str, scanner: &ScannerConfig) -> Option<MediaType> {
    if scanner.image_extensions.iter().any(|e| e == ext) {
        Some(MediaType::Image)
    } else if scanner.video_extensions.iter().any(|e| e == ext) {
        Some(MediaType::Video)
    } else {
        None
    }
}

/// Original capture time from EXIF, as RFC 3339, when the file carries it.
fn exif_taken_at(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;

    let field = exif.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)?;
    let raw = field.display_value().to_string();
    let raw = raw.trim_matches('"');

    for format in ["%Y-%m-%d %H:%M:%S", "%Y:%m:%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.and_utc().to_rfc3339());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(path: &Path, content: &[u8]) {
        fs::File::create(path).unwrap().write_all(content).unwrap();
    }

    #[test]
    fn media_types_follow_extension_sets() {
        let scanner = ScannerConfig::default();
        assert_eq!(media_type_for("jpg", &scanner), Some(MediaType::Image));
        assert_eq!(media_type_for("webp", &scanner), Some(MediaType::Image));
        assert_eq!(media_type_for("mp4", &scanner), Some(MediaType::Video));
        assert_eq!(media_type_for("txt", &scanner), None);
    }

    #[test]
    fn seeds_images_and_derives_album_from_leaf() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("vacation");
        fs::create_dir(&root).unwrap();
        write_file(&root.join("one.jpg"), b"photo one");
        write_file(&root.join("two.png"), b"photo two");
        write_file(&root.join("notes.txt"), b"not a photo");

        let db = Database::open_in_memory().unwrap();
        let report =
            seed_directory(&db, &ScannerConfig::default(), &root, None, true, false).unwrap();

        assert_eq!(report.matched, 2);
        assert_eq!(report.inserted, 2);

        let pending = db.pull_pending(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|r| r.album_id == "vacation"));
    }

    #[test]
    fn reseeding_is_a_noop() {
        let dir = tempdir().unwrap();
        write_file(&dir.path().join("a.jpg"), b"bytes");

        let db = Database::open_in_memory().unwrap();
        let scanner = ScannerConfig::default();
        let first =
            seed_directory(&db, &scanner, dir.path(), Some("album_a"), true, false).unwrap();
        let second =
            seed_directory(&db, &scanner, dir.path(), Some("album_a"), true, false).unwrap();

        assert_eq!(first.inserted, 1);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(db.pull_pending(10).unwrap().len(), 1);
    }

    #[test]
    fn videos_are_skipped_unless_requested() {
        let dir = tempdir().unwrap();
        write_file(&dir.path().join("clip.mp4"), b"video bytes");

        let db = Database::open_in_memory().unwrap();
        let scanner = ScannerConfig::default();

        let without =
            seed_directory(&db, &scanner, dir.path(), Some("a"), true, false).unwrap();
        assert_eq!(without.matched, 0);

        let with = seed_directory(&db, &scanner, dir.path(), Some("a"), true, true).unwrap();
        assert_eq!(with.matched, 1);
        assert_eq!(with.inserted, 1);
    }

    #[test]
    fn non_recursive_stays_in_the_top_directory() {
        let dir = tempdir().unwrap();
        write_file(&dir.path().join("top.jpg"), b"top");
        fs::create_dir(dir.path().join("nested")).unwrap();
        write_file(&dir.path().join("nested/deep.jpg"), b"deep");

        let db = Database::open_in_memory().unwrap();
        let report = seed_directory(
            &db,
            &ScannerConfig::default(),
            dir.path(),
            Some("a"),
            false,
            false,
        )
        .unwrap();

        assert_eq!(report.inserted, 1);
    }

    #[test]
    fn duplicate_content_in_two_files_is_one_record() {
        let dir = tempdir().unwrap();
        write_file(&dir.path().join("a.jpg"), b"identical");
        write_file(&dir.path().join("b.jpg"), b"identical");

        let db = Database::open_in_memory().unwrap();
        let report = seed_directory(
            &db,
            &ScannerConfig::default(),
            dir.path(),
            Some("a"),
            true,
            false,
        )
        .unwrap();

        assert_eq!(report.matched, 2);
        assert_eq!(report.inserted + report.skipped, 2);
        assert_eq!(db.pull_pending(10).unwrap().len(), 1);
    }
}
