//! SQLite-backed document store.
//!
//! Holds the per-image work queue, album summaries, per-album cluster
//! documents, and the human review queue. All pipeline mutations are
//! single-row updates; cross-row consistency comes from idempotent keys,
//! not locks, so multiple worker processes can share one database.

mod schema;

pub mod albums;
pub mod clusters;
pub mod images;
pub mod reviews;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;

pub use albums::{AlbumSummary, DominantSubject};
pub use clusters::AlbumCluster;
pub use images::{EmbeddingStatus, ImageRecord, MediaType};
pub use reviews::{ReviewItem, ReviewStatus, ReviewType};

use schema::{MIGRATIONS, SCHEMA};

pub struct Database {
    pub(crate) conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.initialize()?;
        Ok(db)
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        for migration in MIGRATIONS {
            let _ = self.conn.execute(migration, []);
        }
        Ok(())
    }
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Convert f32 slice to little-endian bytes for BLOB storage
pub(crate) fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Convert BLOB bytes back to an f32 vector
pub(crate) fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let mut arr = [0u8; 4];
            arr.copy_from_slice(chunk);
            f32::from_le_bytes(arr)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_codec_round_trips() {
        let original = vec![0.25f32, -1.5, 3.75, 0.0];
        let bytes = embedding_to_bytes(&original);
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes_to_embedding(&bytes), original);
    }

    #[test]
    fn initialize_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db.initialize().unwrap();
    }
}
