pub const SCHEMA: &str = r#"
-- Images: one row per content-addressed source file
CREATE TABLE IF NOT EXISTS images (
    id TEXT PRIMARY KEY,                 -- sha256 of the file bytes
    album_id TEXT NOT NULL,
    absolute_path TEXT NOT NULL,
    media_type TEXT NOT NULL,            -- 'image', 'video', 'other'
    embedding_status TEXT NOT NULL DEFAULT 'pending',  -- 'pending', 'done', 'error'
    created_at TEXT NOT NULL,
    embedded_at TEXT,
    last_error TEXT,
    subject_id TEXT,
    taken_at TEXT,
    has_people INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_images_status_created ON images(embedding_status, created_at);
CREATE INDEX IF NOT EXISTS idx_images_album ON images(album_id);
CREATE INDEX IF NOT EXISTS idx_images_album_people ON images(album_id, has_people);

-- Album summaries: fully recomputed and replaced by the finalizer
CREATE TABLE IF NOT EXISTS albums (
    id TEXT PRIMARY KEY,
    image_count INTEGER NOT NULL DEFAULT 0,
    face_image_count INTEGER NOT NULL DEFAULT 0,
    dominant_cluster_id TEXT,
    dominant_ratio REAL,
    dominant_sample_face_id TEXT,
    dominant_image_count INTEGER,
    suspicious_aggregator INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);

-- Per-album face clusters: replaced wholesale on every finalizer run
CREATE TABLE IF NOT EXISTS album_clusters (
    id TEXT PRIMARY KEY,                 -- '<album_id>::<cluster_id>'
    album_id TEXT NOT NULL,
    cluster_id TEXT NOT NULL,
    face_count INTEGER NOT NULL,
    image_count INTEGER NOT NULL,        -- distinct images, not raw faces
    centroid BLOB,
    sample_face_ids TEXT NOT NULL,       -- JSON array of point ids
    image_ids TEXT NOT NULL,             -- JSON array of image ids
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (album_id, cluster_id)
);

CREATE INDEX IF NOT EXISTS idx_album_clusters_album ON album_clusters(album_id);

-- Human review queue
CREATE TABLE IF NOT EXISTS reviews (
    id TEXT PRIMARY KEY,
    review_type TEXT NOT NULL,           -- 'aggregator_album', 'ambiguous_album', 'album_merge'
    status TEXT NOT NULL DEFAULT 'pending',  -- 'pending', 'resolved', 'dismissed'
    album_id TEXT NOT NULL,
    cluster_id TEXT,
    ratio REAL,
    notes TEXT,
    created_at TEXT NOT NULL,
    resolved_at TEXT
);

-- At most one pending review per (type, album, cluster) key
CREATE UNIQUE INDEX IF NOT EXISTS idx_reviews_pending_key
    ON reviews(review_type, album_id, IFNULL(cluster_id, ''))
    WHERE status = 'pending';

CREATE INDEX IF NOT EXISTS idx_reviews_status ON reviews(status);
"#;

/// Column additions for databases created before the column existed.
/// Failures (column already present) are ignored.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE images ADD COLUMN has_people INTEGER NOT NULL DEFAULT 0",
    "ALTER TABLE images ADD COLUMN taken_at TEXT",
    "ALTER TABLE reviews ADD COLUMN ratio REAL",
];
