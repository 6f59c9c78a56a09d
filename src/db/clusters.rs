//! Album cluster repository. Clusters are recomputed documents: every
//! finalizer run deletes an album's old set and inserts the new one in a
//! single transaction.

use anyhow::Result;
use rusqlite::{params, Row};

use super::{bytes_to_embedding, embedding_to_bytes, Database};

#[derive(Debug, Clone)]
pub struct AlbumCluster {
    pub album_id: String,
    pub cluster_id: String,
    pub face_count: i64,
    /// Distinct images contributing faces, not raw face count.
    pub image_count: i64,
    pub centroid: Vec<f32>,
    pub sample_face_ids: Vec<String>,
    pub image_ids: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

fn row_to_cluster(row: &Row) -> rusqlite::Result<AlbumCluster> {
    let centroid: Option<Vec<u8>> = row.get(4)?;
    let sample_json: String = row.get(5)?;
    let images_json: String = row.get(6)?;

    Ok(AlbumCluster {
        album_id: row.get(0)?,
        cluster_id: row.get(1)?,
        face_count: row.get(2)?,
        image_count: row.get(3)?,
        centroid: centroid.map(|b| bytes_to_embedding(&b)).unwrap_or_default(),
        sample_face_ids: serde_json::from_str(&sample_json).unwrap_or_default(),
        image_ids: serde_json::from_str(&images_json).unwrap_or_default(),
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl Database {
    /// Atomically replace the album's cluster set.
    pub fn replace_album_clusters(&self, album_id: &str, clusters: &[AlbumCluster]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "DELETE FROM album_clusters WHERE album_id = ?",
            [album_id],
        )?;

        for cluster in clusters {
            tx.execute(
                r#"
                INSERT INTO album_clusters
                    (id, album_id, cluster_id, face_count, image_count, centroid,
                     sample_face_ids, image_ids, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    format!("{}::{}", cluster.album_id, cluster.cluster_id),
                    cluster.album_id,
                    cluster.cluster_id,
                    cluster.face_count,
                    cluster.image_count,
                    embedding_to_bytes(&cluster.centroid),
                    serde_json::to_string(&cluster.sample_face_ids)?,
                    serde_json::to_string(&cluster.image_ids)?,
                    cluster.created_at,
                    cluster.updated_at,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Clusters for an album, largest image count first.
    pub fn get_album_clusters(&self, album_id: &str) -> Result<Vec<AlbumCluster>> {
        let mut stmt = self.conn.prepare(
            "SELECT album_id, cluster_id, face_count, image_count, centroid, \
             sample_face_ids, image_ids, created_at, updated_at \
             FROM album_clusters WHERE album_id = ? \
             ORDER BY image_count DESC, face_count DESC, cluster_id ASC",
        )?;

        let clusters = stmt
            .query_map([album_id], row_to_cluster)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(clusters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(album: &str, cluster_id: &str, image_count: i64) -> AlbumCluster {
        AlbumCluster {
            album_id: album.to_string(),
            cluster_id: cluster_id.to_string(),
            face_count: image_count + 1,
            image_count,
            centroid: vec![0.5, 0.5],
            sample_face_ids: vec!["p1".into()],
            image_ids: vec!["h1".into(), "h2".into()],
            created_at: "2024-01-01T00:00:00+00:00".to_string(),
            updated_at: "2024-01-01T00:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn replace_swaps_the_whole_set() {
        let db = Database::open_in_memory().unwrap();

        db.replace_album_clusters("a", &[cluster("a", "c1", 5), cluster("a", "c2", 3)])
            .unwrap();
        assert_eq!(db.get_album_clusters("a").unwrap().len(), 2);

        db.replace_album_clusters("a", &[cluster("a", "c3", 7)])
            .unwrap();
        let clusters = db.get_album_clusters("a").unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].cluster_id, "c3");
    }

    #[test]
    fn replace_with_empty_clears() {
        let db = Database::open_in_memory().unwrap();
        db.replace_album_clusters("a", &[cluster("a", "c1", 5)])
            .unwrap();
        db.replace_album_clusters("a", &[]).unwrap();
        assert!(db.get_album_clusters("a").unwrap().is_empty());
    }

    #[test]
    fn other_albums_are_untouched() {
        let db = Database::open_in_memory().unwrap();
        db.replace_album_clusters("a", &[cluster("a", "c1", 5)])
            .unwrap();
        db.replace_album_clusters("b", &[cluster("b", "c1", 2)])
            .unwrap();

        db.replace_album_clusters("a", &[]).unwrap();
        assert_eq!(db.get_album_clusters("b").unwrap().len(), 1);
    }

    #[test]
    fn ordering_is_by_image_count_desc() {
        let db = Database::open_in_memory().unwrap();
        db.replace_album_clusters("a", &[cluster("a", "small", 2), cluster("a", "big", 9)])
            .unwrap();
        let clusters = db.get_album_clusters("a").unwrap();
        assert_eq!(clusters[0].cluster_id, "big");
        assert_eq!(clusters[0].centroid, vec![0.5, 0.5]);
        assert_eq!(clusters[0].image_ids.len(), 2);
    }
}
