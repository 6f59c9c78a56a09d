//! Album summary repository.

use anyhow::Result;
use rusqlite::{params, Row};

use super::Database;

/// Descriptor of an album's largest cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct DominantSubject {
    pub cluster_id: String,
    pub ratio: f64,
    pub sample_face_id: Option<String>,
    pub image_count: i64,
}

/// Recomputed-from-scratch album statistics. `dominant` is `None` exactly
/// when the album has no face images or no clusters.
#[derive(Debug, Clone)]
pub struct AlbumSummary {
    pub id: String,
    pub image_count: i64,
    pub face_image_count: i64,
    pub dominant: Option<DominantSubject>,
    pub suspicious_aggregator: bool,
    pub updated_at: String,
}

fn row_to_summary(row: &Row) -> rusqlite::Result<AlbumSummary> {
    let cluster_id: Option<String> = row.get(3)?;
    let dominant = cluster_id.map(|cluster_id| DominantSubject {
        cluster_id,
        ratio: row.get::<_, Option<f64>>(4).unwrap_or(None).unwrap_or(0.0),
        sample_face_id: row.get(5).unwrap_or(None),
        image_count: row.get::<_, Option<i64>>(6).unwrap_or(None).unwrap_or(0),
    });

    Ok(AlbumSummary {
        id: row.get(0)?,
        image_count: row.get(1)?,
        face_image_count: row.get(2)?,
        dominant,
        suspicious_aggregator: row.get::<_, i64>(7)? != 0,
        updated_at: row.get(8)?,
    })
}

impl Database {
    /// Replace the album's summary row.
    pub fn upsert_album_summary(&self, summary: &AlbumSummary) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO albums
                (id, image_count, face_image_count, dominant_cluster_id, dominant_ratio,
                 dominant_sample_face_id, dominant_image_count, suspicious_aggregator, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                summary.id,
                summary.image_count,
                summary.face_image_count,
                summary.dominant.as_ref().map(|d| d.cluster_id.clone()),
                summary.dominant.as_ref().map(|d| d.ratio),
                summary
                    .dominant
                    .as_ref()
                    .and_then(|d| d.sample_face_id.clone()),
                summary.dominant.as_ref().map(|d| d.image_count),
                summary.suspicious_aggregator as i64,
                summary.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_album_summary(&self, album_id: &str) -> Result<Option<AlbumSummary>> {
        let result = self.conn.query_row(
            "SELECT id, image_count, face_image_count, dominant_cluster_id, dominant_ratio, \
             dominant_sample_face_id, dominant_image_count, suspicious_aggregator, updated_at \
             FROM albums WHERE id = ?",
            [album_id],
            row_to_summary,
        );

        match result {
            Ok(summary) => Ok(Some(summary)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
