//! Human review queue.
//!
//! Emission is idempotent: the partial unique index over
//! (type, album, cluster) for pending rows means `INSERT OR IGNORE` either
//! creates the one pending item for that key or does nothing. Resolution
//! frees the key, so a later finalizer run can raise the flag again.

use anyhow::Result;
use rand::Rng;
use rusqlite::{params, Row};

use super::{now_rfc3339, Database};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewType {
    /// Album looks like a multi-subject aggregator (low dominance ratio).
    AggregatorAlbum,
    /// No clear dominant subject (top two clusters too close).
    AmbiguousAlbum,
    /// Two albums appear to share a subject.
    AlbumMerge,
}

impl ReviewType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewType::AggregatorAlbum => "aggregator_album",
            ReviewType::AmbiguousAlbum => "ambiguous_album",
            ReviewType::AlbumMerge => "album_merge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "aggregator_album" => Some(ReviewType::AggregatorAlbum),
            "ambiguous_album" => Some(ReviewType::AmbiguousAlbum),
            "album_merge" => Some(ReviewType::AlbumMerge),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewStatus {
    Pending,
    Resolved,
    Dismissed,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Resolved => "resolved",
            ReviewStatus::Dismissed => "dismissed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReviewItem {
    pub id: String,
    pub review_type: ReviewType,
    pub status: ReviewStatus,
    pub album_id: String,
    pub cluster_id: Option<String>,
    pub ratio: Option<f64>,
    pub notes: Option<String>,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

fn row_to_review(row: &Row) -> rusqlite::Result<ReviewItem> {
    let type_str: String = row.get(1)?;
    let status_str: String = row.get(2)?;
    Ok(ReviewItem {
        id: row.get(0)?,
        review_type: ReviewType::parse(&type_str).unwrap_or(ReviewType::AggregatorAlbum),
        status: match status_str.as_str() {
            "resolved" => ReviewStatus::Resolved,
            "dismissed" => ReviewStatus::Dismissed,
            _ => ReviewStatus::Pending,
        },
        album_id: row.get(3)?,
        cluster_id: row.get(4)?,
        ratio: row.get(5)?,
        notes: row.get(6)?,
        created_at: row.get(7)?,
        resolved_at: row.get(8)?,
    })
}

fn new_review_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes[..]);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

const REVIEW_COLUMNS: &str =
    "id, review_type, status, album_id, cluster_id, ratio, notes, created_at, resolved_at";

impl Database {
    /// Create a pending review unless one already exists for the stable key
    /// (type, album, cluster-or-null). Returns true when a row was created.
    pub fn upsert_pending_review(
        &self,
        review_type: ReviewType,
        album_id: &str,
        cluster_id: Option<&str>,
        ratio: Option<f64>,
        notes: Option<&str>,
    ) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO reviews \
             (id, review_type, status, album_id, cluster_id, ratio, notes, created_at) \
             VALUES (?, ?, 'pending', ?, ?, ?, ?, ?)",
            params![
                new_review_id(),
                review_type.as_str(),
                album_id,
                cluster_id,
                ratio,
                notes,
                now_rfc3339(),
            ],
        )?;
        Ok(inserted == 1)
    }

    pub fn list_reviews(&self, pending_only: bool) -> Result<Vec<ReviewItem>> {
        let sql = if pending_only {
            format!(
                "SELECT {REVIEW_COLUMNS} FROM reviews WHERE status = 'pending' \
                 ORDER BY created_at ASC"
            )
        } else {
            format!("SELECT {REVIEW_COLUMNS} FROM reviews ORDER BY created_at ASC")
        };

        let mut stmt = self.conn.prepare(&sql)?;
        let reviews = stmt
            .query_map([], row_to_review)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(reviews)
    }

    /// Close a review as resolved or dismissed. Returns false when the id
    /// does not name a pending item.
    pub fn close_review(&self, review_id: &str, status: ReviewStatus) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE reviews SET status = ?, resolved_at = ? \
             WHERE id = ? AND status = 'pending'",
            params![status.as_str(), now_rfc3339(), review_id],
        )?;
        Ok(changed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_review_is_created_once_per_key() {
        let db = Database::open_in_memory().unwrap();

        let first = db
            .upsert_pending_review(
                ReviewType::AggregatorAlbum,
                "album_a",
                Some("cluster::album_a::1"),
                Some(0.4),
                None,
            )
            .unwrap();
        let second = db
            .upsert_pending_review(
                ReviewType::AggregatorAlbum,
                "album_a",
                Some("cluster::album_a::1"),
                Some(0.4),
                None,
            )
            .unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(db.list_reviews(true).unwrap().len(), 1);
    }

    #[test]
    fn cluster_id_participates_in_the_key() {
        let db = Database::open_in_memory().unwrap();

        assert!(db
            .upsert_pending_review(ReviewType::AggregatorAlbum, "a", Some("c1"), None, None)
            .unwrap());
        assert!(db
            .upsert_pending_review(ReviewType::AggregatorAlbum, "a", Some("c2"), None, None)
            .unwrap());
        assert_eq!(db.list_reviews(true).unwrap().len(), 2);
    }

    #[test]
    fn types_are_distinct_keys() {
        let db = Database::open_in_memory().unwrap();

        assert!(db
            .upsert_pending_review(ReviewType::AggregatorAlbum, "a", None, None, None)
            .unwrap());
        assert!(db
            .upsert_pending_review(ReviewType::AmbiguousAlbum, "a", None, None, None)
            .unwrap());
        assert!(!db
            .upsert_pending_review(ReviewType::AmbiguousAlbum, "a", None, None, None)
            .unwrap());
    }

    #[test]
    fn resolution_frees_the_key() {
        let db = Database::open_in_memory().unwrap();

        db.upsert_pending_review(ReviewType::AmbiguousAlbum, "a", None, Some(0.42), None)
            .unwrap();
        let id = db.list_reviews(true).unwrap()[0].id.clone();

        assert!(db.close_review(&id, ReviewStatus::Resolved).unwrap());
        assert!(db.list_reviews(true).unwrap().is_empty());

        // the album can be flagged again later
        assert!(db
            .upsert_pending_review(ReviewType::AmbiguousAlbum, "a", None, Some(0.45), None)
            .unwrap());
        assert_eq!(db.list_reviews(false).unwrap().len(), 2);
    }

    #[test]
    fn closing_twice_reports_false() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_pending_review(ReviewType::AggregatorAlbum, "a", None, None, None)
            .unwrap();
        let id = db.list_reviews(true).unwrap()[0].id.clone();

        assert!(db.close_review(&id, ReviewStatus::Dismissed).unwrap());
        assert!(!db.close_review(&id, ReviewStatus::Resolved).unwrap());
    }
}
