//! Image record repository: the pipeline's work queue.

use anyhow::Result;
use rusqlite::{params, Row};

use super::{now_rfc3339, Database};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Image,
    Video,
    Other,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "image" => MediaType::Image,
            "video" => MediaType::Video,
            _ => MediaType::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingStatus {
    Pending,
    Done,
    Error,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::Pending => "pending",
            EmbeddingStatus::Done => "done",
            EmbeddingStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "done" => EmbeddingStatus::Done,
            "error" => EmbeddingStatus::Error,
            _ => EmbeddingStatus::Pending,
        }
    }
}

/// One content-addressed source file. The id is the sha256 of the bytes,
/// which doubles as the dedup key across re-seeds.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub id: String,
    pub album_id: String,
    pub absolute_path: String,
    pub media_type: MediaType,
    pub status: EmbeddingStatus,
    pub created_at: String,
    pub embedded_at: Option<String>,
    pub last_error: Option<String>,
    pub subject_id: Option<String>,
    pub taken_at: Option<String>,
    pub has_people: bool,
}

fn row_to_record(row: &Row) -> rusqlite::Result<ImageRecord> {
    Ok(ImageRecord {
        id: row.get(0)?,
        album_id: row.get(1)?,
        absolute_path: row.get(2)?,
        media_type: MediaType::parse(&row.get::<_, String>(3)?),
        status: EmbeddingStatus::parse(&row.get::<_, String>(4)?),
        created_at: row.get(5)?,
        embedded_at: row.get(6)?,
        last_error: row.get(7)?,
        subject_id: row.get(8)?,
        taken_at: row.get(9)?,
        has_people: row.get::<_, i64>(10)? != 0,
    })
}

const RECORD_COLUMNS: &str = "id, album_id, absolute_path, media_type, embedding_status, \
     created_at, embedded_at, last_error, subject_id, taken_at, has_people";

impl Database {
    /// Upsert a seeded image by content hash. An existing row keeps its
    /// embedding status, so re-seeding the same file is a no-op; path,
    /// album, and taken-at are refreshed. Returns true for a new row.
    pub fn upsert_image(&self, rec: &ImageRecord) -> Result<bool> {
        let existed: bool = self
            .conn
            .query_row(
                "SELECT 1 FROM images WHERE id = ?",
                [&rec.id],
                |_| Ok(true),
            )
            .unwrap_or(false);

        self.conn.execute(
            r#"
            INSERT INTO images (id, album_id, absolute_path, media_type, embedding_status,
                                created_at, subject_id, taken_at)
            VALUES (?, ?, ?, ?, 'pending', ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                album_id = excluded.album_id,
                absolute_path = excluded.absolute_path,
                taken_at = COALESCE(excluded.taken_at, images.taken_at)
            "#,
            params![
                rec.id,
                rec.album_id,
                rec.absolute_path,
                rec.media_type.as_str(),
                rec.created_at,
                rec.subject_id,
                rec.taken_at,
            ],
        )?;

        Ok(!existed)
    }

    /// Pull up to `batch_size` pending records, oldest first.
    pub fn pull_pending(&self, batch_size: usize) -> Result<Vec<ImageRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM images \
             WHERE embedding_status = 'pending' \
             ORDER BY created_at ASC, id ASC LIMIT ?"
        ))?;

        let records = stmt
            .query_map([batch_size as i64], row_to_record)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(records)
    }

    /// Transition a record pending → done. Rows in any other state are
    /// left untouched.
    pub fn mark_done(&self, id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE images SET embedding_status = 'done', embedded_at = ?, last_error = NULL \
             WHERE id = ? AND embedding_status = 'pending'",
            params![now_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Transition a record pending → error with a reason.
    pub fn mark_error(&self, id: &str, message: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE images SET embedding_status = 'error', last_error = ? \
             WHERE id = ? AND embedding_status = 'pending'",
            params![message, id],
        )?;
        Ok(())
    }

    pub fn set_has_people(&self, id: &str, has_people: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE images SET has_people = ? WHERE id = ?",
            params![has_people as i64, id],
        )?;
        Ok(())
    }

    pub fn get_image(&self, id: &str) -> Result<Option<ImageRecord>> {
        let result = self.conn.query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM images WHERE id = ?"),
            [id],
            row_to_record,
        );

        match result {
            Ok(rec) => Ok(Some(rec)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn count_images_in_album(&self, album_id: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM images WHERE album_id = ?",
            [album_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count_face_images_in_album(&self, album_id: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM images WHERE album_id = ? AND has_people = 1",
            [album_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count_pending_in_album(&self, album_id: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM images WHERE album_id = ? AND embedding_status = 'pending'",
            [album_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Per-status record counts, for diagnostics.
    pub fn count_by_status(&self) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT embedding_status, COUNT(*) FROM images \
             GROUP BY embedding_status ORDER BY embedding_status",
        )?;

        let counts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(counts)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn record(id: &str, album: &str, created_at: &str) -> ImageRecord {
        ImageRecord {
            id: id.to_string(),
            album_id: album.to_string(),
            absolute_path: format!("/photos/{id}.jpg"),
            media_type: MediaType::Image,
            status: EmbeddingStatus::Pending,
            created_at: created_at.to_string(),
            embedded_at: None,
            last_error: None,
            subject_id: None,
            taken_at: None,
            has_people: false,
        }
    }

    #[test]
    fn upsert_then_reseed_is_noop() {
        let db = Database::open_in_memory().unwrap();
        let rec = record("hash1", "album_a", "2024-01-01T00:00:00+00:00");

        assert!(db.upsert_image(&rec).unwrap());
        db.mark_done("hash1").unwrap();

        // re-seed: no new row, status untouched
        assert!(!db.upsert_image(&rec).unwrap());
        let stored = db.get_image("hash1").unwrap().unwrap();
        assert_eq!(stored.status, EmbeddingStatus::Done);
    }

    #[test]
    fn pull_pending_is_oldest_first_and_bounded() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_image(&record("h3", "a", "2024-01-03T00:00:00+00:00"))
            .unwrap();
        db.upsert_image(&record("h1", "a", "2024-01-01T00:00:00+00:00"))
            .unwrap();
        db.upsert_image(&record("h2", "a", "2024-01-02T00:00:00+00:00"))
            .unwrap();

        let batch = db.pull_pending(2).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, "h1");
        assert_eq!(batch[1].id, "h2");
    }

    #[test]
    fn status_only_moves_out_of_pending() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_image(&record("h1", "a", "2024-01-01T00:00:00+00:00"))
            .unwrap();

        db.mark_error("h1", "no vectors produced").unwrap();
        let rec = db.get_image("h1").unwrap().unwrap();
        assert_eq!(rec.status, EmbeddingStatus::Error);
        assert_eq!(rec.last_error.as_deref(), Some("no vectors produced"));

        // error → done is not a legal transition
        db.mark_done("h1").unwrap();
        let rec = db.get_image("h1").unwrap().unwrap();
        assert_eq!(rec.status, EmbeddingStatus::Error);
    }

    #[test]
    fn done_records_leave_the_queue() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_image(&record("h1", "a", "2024-01-01T00:00:00+00:00"))
            .unwrap();
        db.mark_done("h1").unwrap();

        assert!(db.pull_pending(10).unwrap().is_empty());
        let rec = db.get_image("h1").unwrap().unwrap();
        assert!(rec.embedded_at.is_some());
        assert!(rec.last_error.is_none());
    }

    #[test]
    fn album_counts() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_image(&record("h1", "a", "2024-01-01T00:00:00+00:00"))
            .unwrap();
        db.upsert_image(&record("h2", "a", "2024-01-02T00:00:00+00:00"))
            .unwrap();
        db.upsert_image(&record("h3", "b", "2024-01-03T00:00:00+00:00"))
            .unwrap();

        db.set_has_people("h1", true).unwrap();
        db.mark_done("h1").unwrap();

        assert_eq!(db.count_images_in_album("a").unwrap(), 2);
        assert_eq!(db.count_face_images_in_album("a").unwrap(), 1);
        assert_eq!(db.count_pending_in_album("a").unwrap(), 1);
        assert_eq!(db.count_pending_in_album("b").unwrap(), 1);
    }
}
