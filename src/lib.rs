//! facegraph: face-clustering photo indexer.
//!
//! Images are seeded into a content-addressed queue, embedded (visual and
//! facial) by an external embedding service, and upserted into a vector
//! similarity index under deterministic point ids. Per album, a finalizer
//! links high-similarity face vectors into same-person clusters, computes
//! dominance statistics, and emits review items for albums that look like
//! multi-subject aggregators or have no clear dominant subject.

pub mod config;
pub mod db;
pub mod embedder;
pub mod finalizer;
pub mod index;
pub mod logging;
pub mod pipeline;
pub mod retry;
pub mod seed;
