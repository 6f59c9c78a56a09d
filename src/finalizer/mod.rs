//! Album finalizer: recomputes same-person clusters and dominance for one
//! album from the face vectors in the similarity index.
//!
//! Linkage rule: two faces in the same album belong to the same person when
//! their similarity is at or above the link threshold. Each point's
//! neighbors are fetched with bounded parallelism and merged into a
//! union-find; the resulting components become cluster documents, the
//! largest one drives the dominance classification, and suspicious or
//! ambiguous albums get exactly one pending review item per condition.

pub mod union_find;

use anyhow::{anyhow, bail, Result};
use md5::{Digest, Md5};
use rayon::prelude::*;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::{AlbumCluster, AlbumSummary, Database, DominantSubject, ReviewType};
use crate::index::points::dominant_point_id;
use crate::index::{IndexClient, Point, ScrolledPoint, SearchFilter};
use union_find::UnionFind;

/// Outcome of one finalizer run.
#[derive(Debug, Clone)]
pub struct FinalizeResult {
    pub summary: AlbumSummary,
    pub cluster_count: usize,
    pub face_count: usize,
    pub aggregator_review_created: bool,
    pub ambiguous_review_created: bool,
}

pub struct AlbumFinalizer<'a> {
    db: &'a Database,
    index: &'a IndexClient,
    cfg: &'a Config,
}

impl<'a> AlbumFinalizer<'a> {
    pub fn new(db: &'a Database, index: &'a IndexClient, cfg: &'a Config) -> Self {
        Self { db, index, cfg }
    }

    pub fn finalize(&self, album_id: &str, cancel: &AtomicBool) -> Result<FinalizeResult> {
        let opts = &self.cfg.finalizer;
        let face_collection = &self.cfg.index.face_collection;

        let image_count = self.db.count_images_in_album(album_id)?;
        let face_image_count = self.db.count_face_images_in_album(album_id)?;

        let points: Vec<ScrolledPoint> = self
            .index
            .scroll_all(face_collection, &SearchFilter::album(album_id), true)?
            .into_iter()
            .filter(|p| !p.vector.is_empty())
            .collect();

        if points.is_empty() {
            let summary = AlbumSummary {
                id: album_id.to_string(),
                image_count,
                face_image_count,
                dominant: None,
                suspicious_aggregator: false,
                updated_at: crate::db::now_rfc3339(),
            };
            self.db.upsert_album_summary(&summary)?;
            info!(album = album_id, "no face vectors, wrote empty summary");
            return Ok(FinalizeResult {
                summary,
                cluster_count: 0,
                face_count: 0,
                aggregator_review_created: false,
                ambiguous_review_created: false,
            });
        }

        if cancel.load(Ordering::SeqCst) {
            bail!("finalize cancelled for album {album_id}");
        }

        // --- linkage: k-NN queries feed a shared union-find ---
        let index_of: HashMap<&str, usize> = points
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.as_str(), i))
            .collect();
        let uf = Mutex::new(UnionFind::new(points.len()));

        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| anyhow!("failed to build finalizer pool: {e}"))?;

        let index_client = self.index;
        let filter = SearchFilter::album(album_id);
        let top_k = opts.top_k;
        let link_threshold = opts.link_threshold;

        pool.install(|| {
            points.par_iter().enumerate().for_each(|(i, point)| {
                if cancel.load(Ordering::SeqCst) {
                    return;
                }
                match index_client.search(face_collection, &point.vector, top_k, &filter) {
                    Ok(hits) => {
                        for hit in hits {
                            if hit.id == point.id {
                                continue;
                            }
                            if hit.score >= link_threshold {
                                if let Some(&j) = index_of.get(hit.id.as_str()) {
                                    if let Ok(mut guard) = uf.lock() {
                                        guard.union(i, j);
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        // partial linkage is acceptable; the other queries proceed
                        warn!(point = %point.id, error = %e, "neighbor query failed");
                    }
                }
            });
        });

        if cancel.load(Ordering::SeqCst) {
            bail!("finalize cancelled for album {album_id}");
        }

        let mut uf = uf
            .into_inner()
            .map_err(|_| anyhow!("union-find lock poisoned"))?;
        let components = uf.components();

        let now = crate::db::now_rfc3339();
        let mut clusters = build_clusters(album_id, &points, &components, &now);
        clusters.sort_by(|a, b| {
            b.image_count
                .cmp(&a.image_count)
                .then(b.face_count.cmp(&a.face_count))
                .then(a.cluster_id.cmp(&b.cluster_id))
        });

        self.db.replace_album_clusters(album_id, &clusters)?;

        // --- dominance classification ---
        let image_counts: Vec<i64> = clusters.iter().map(|c| c.image_count).collect();
        let dominance = classify(&image_counts, face_image_count, opts);

        let top = clusters.first();
        let summary = AlbumSummary {
            id: album_id.to_string(),
            image_count,
            face_image_count,
            dominant: top.map(|top| DominantSubject {
                cluster_id: top.cluster_id.clone(),
                ratio: dominance.ratio,
                sample_face_id: top.sample_face_ids.first().cloned(),
                image_count: top.image_count,
            }),
            suspicious_aggregator: dominance.suspicious,
            updated_at: now.clone(),
        };
        self.db.upsert_album_summary(&summary)?;

        info!(
            album = album_id,
            clusters = clusters.len(),
            faces = points.len(),
            ratio = dominance.ratio,
            suspicious = dominance.suspicious,
            ambiguous = dominance.ambiguous,
            "album finalized"
        );

        // --- review emission: aggregator takes precedence over ambiguous ---
        let mut aggregator_review_created = false;
        let mut ambiguous_review_created = false;
        if let Some(top) = top {
            if dominance.suspicious {
                aggregator_review_created = self.db.upsert_pending_review(
                    ReviewType::AggregatorAlbum,
                    album_id,
                    Some(&top.cluster_id),
                    Some(dominance.ratio),
                    Some("dominant subject covers under half of the face images"),
                )?;
            } else if dominance.ambiguous {
                ambiguous_review_created = self.db.upsert_pending_review(
                    ReviewType::AmbiguousAlbum,
                    album_id,
                    None,
                    Some(dominance.ratio),
                    Some("no clear dominant subject: top two clusters within delta, both under 0.5"),
                )?;
            }

            self.upsert_dominant_centroid(album_id, top, dominance.ratio, &now);
        }

        Ok(FinalizeResult {
            summary,
            cluster_count: clusters.len(),
            face_count: points.len(),
            aggregator_review_created,
            ambiguous_review_created,
        })
    }

    /// Publish the dominant cluster's centroid so albums can later be
    /// compared to each other (merge candidates). Best effort: a failure
    /// here does not undo the finalized album.
    fn upsert_dominant_centroid(&self, album_id: &str, top: &AlbumCluster, ratio: f64, now: &str) {
        if top.centroid.is_empty() {
            return;
        }
        let point = Point {
            id: dominant_point_id(album_id),
            vector: top.centroid.clone(),
            payload: json!({
                "albumId": album_id,
                "dominantClusterId": top.cluster_id,
                "faceCount": top.face_count,
                "dominantRatio": ratio,
                "updatedAt": now,
            }),
        };
        if let Err(e) = self
            .index
            .upsert(&self.cfg.index.dominants_collection, &[point])
        {
            warn!(album = album_id, error = %e, "dominant centroid upsert failed");
        }
    }
}

/// Turn union-find components into cluster documents. Cluster ids are
/// derived from the sorted member point ids, so identical partitions yield
/// identical ids across runs.
fn build_clusters(
    album_id: &str,
    points: &[ScrolledPoint],
    components: &[Vec<usize>],
    now: &str,
) -> Vec<AlbumCluster> {
    let dim = points.first().map(|p| p.vector.len()).unwrap_or(0);
    let mut clusters = Vec::with_capacity(components.len());

    for component in components {
        if component.is_empty() {
            continue;
        }

        let mut member_ids: Vec<&str> = component.iter().map(|&i| points[i].id.as_str()).collect();
        member_ids.sort_unstable();

        let mut images: BTreeSet<String> = BTreeSet::new();
        let mut centroid = vec![0f64; dim];
        for &i in component {
            if let Some(payload) = &points[i].payload {
                if !payload.image_id.is_empty() {
                    images.insert(payload.image_id.clone());
                }
            }
            for (k, v) in points[i].vector.iter().enumerate() {
                centroid[k] += *v as f64;
            }
        }
        let centroid: Vec<f32> = centroid
            .iter()
            .map(|s| (s / component.len() as f64) as f32)
            .collect();

        clusters.push(AlbumCluster {
            album_id: album_id.to_string(),
            cluster_id: cluster_id_for(album_id, &member_ids),
            face_count: component.len() as i64,
            image_count: images.len() as i64,
            centroid,
            sample_face_ids: member_ids.iter().take(10).map(|s| s.to_string()).collect(),
            image_ids: images.into_iter().collect(),
            created_at: now.to_string(),
            updated_at: now.to_string(),
        });
    }

    clusters
}

fn cluster_id_for(album_id: &str, sorted_member_ids: &[&str]) -> String {
    let digest = format!("{:x}", Md5::digest(sorted_member_ids.join("\n").as_bytes()));
    format!("cluster::{}::{}", album_id, &digest[..12])
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Dominance {
    pub ratio: f64,
    pub suspicious: bool,
    pub ambiguous: bool,
}

/// Classify dominance from cluster image counts (sorted descending).
///
/// ratio = top cluster's image count / face-bearing image count, clamped to
/// [0, 1]. Suspicious: ratio below the aggregator threshold. Ambiguous: at
/// least two clusters, top two ratios within the delta, top ratio under 0.5.
pub(crate) fn classify(
    image_counts_desc: &[i64],
    face_image_count: i64,
    opts: &crate::config::FinalizerConfig,
) -> Dominance {
    let top = image_counts_desc.first().copied().unwrap_or(0);
    let ratio = if face_image_count > 0 {
        (top as f64 / face_image_count as f64).clamp(0.0, 1.0)
    } else {
        0.0
    };

    if image_counts_desc.is_empty() {
        return Dominance {
            ratio: 0.0,
            suspicious: false,
            ambiguous: false,
        };
    }

    let suspicious = ratio < opts.aggregator_threshold;

    let ambiguous = if image_counts_desc.len() >= 2 && face_image_count > 0 {
        let second = image_counts_desc[1] as f64 / face_image_count as f64;
        ratio < 0.50 && (ratio - second) <= opts.ambiguity_delta
    } else {
        false
    };

    Dominance {
        ratio,
        suspicious,
        ambiguous,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FinalizerConfig;
    use crate::index::PointPayload;

    fn opts() -> FinalizerConfig {
        FinalizerConfig::default()
    }

    fn scrolled(id: &str, image_id: &str, vector: Vec<f32>) -> ScrolledPoint {
        ScrolledPoint {
            id: id.to_string(),
            vector,
            payload: Some(PointPayload {
                payload_version: 1,
                image_id: image_id.to_string(),
                album_id: "a".to_string(),
                subject_id: None,
                absolute_path: format!("/photos/{image_id}.jpg"),
                taken_at: None,
                media_type: "image".to_string(),
            }),
        }
    }

    #[test]
    fn tight_cluster_with_one_outlier_is_not_suspicious() {
        // 10 face images, 9 in the top cluster
        let d = classify(&[9, 1], 10, &opts());
        assert!((d.ratio - 0.9).abs() < 1e-9);
        assert!(!d.suspicious);
        assert!(!d.ambiguous);
    }

    #[test]
    fn three_way_split_is_a_suspected_aggregator() {
        // 4/3/3 over 10 face images
        let d = classify(&[4, 3, 3], 10, &opts());
        assert!((d.ratio - 0.4).abs() < 1e-9);
        assert!(d.suspicious);
        // 0.4 - 0.3 = 0.10 <= delta, so ambiguity holds too; the caller's
        // precedence rule decides which review is emitted
        assert!(d.ambiguous);
    }

    #[test]
    fn close_top_two_under_half_is_ambiguous() {
        // ratios 0.42 and 0.38
        let d = classify(&[42, 38, 20], 100, &opts());
        assert!(d.ambiguous);
        assert!(d.suspicious); // 0.42 < 0.50: both conditions coexist
    }

    #[test]
    fn clear_winner_is_neither() {
        let d = classify(&[70, 20, 10], 100, &opts());
        assert!((d.ratio - 0.7).abs() < 1e-9);
        assert!(!d.suspicious);
        assert!(!d.ambiguous);
    }

    #[test]
    fn single_face_album_has_ratio_one() {
        let d = classify(&[1], 1, &opts());
        assert!((d.ratio - 1.0).abs() < 1e-9);
        assert!(!d.suspicious);
        assert!(!d.ambiguous);
    }

    #[test]
    fn no_clusters_is_an_empty_classification() {
        let d = classify(&[], 0, &opts());
        assert_eq!(d.ratio, 0.0);
        assert!(!d.suspicious);
        assert!(!d.ambiguous);
    }

    #[test]
    fn ratio_is_clamped_to_one() {
        // count drift between store and index must not push ratio past 1
        let d = classify(&[12], 10, &opts());
        assert!(d.ratio <= 1.0);
    }

    #[test]
    fn cluster_ids_are_deterministic_for_a_partition() {
        let a = cluster_id_for("album", &["p1", "p2", "p3"]);
        let b = cluster_id_for("album", &["p1", "p2", "p3"]);
        let c = cluster_id_for("album", &["p1", "p2"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("cluster::album::"));
    }

    #[test]
    fn build_clusters_counts_distinct_images() {
        // two points from the same image in one component
        let points = vec![
            scrolled("p1", "img1", vec![1.0, 0.0]),
            scrolled("p2", "img1", vec![1.0, 0.0]),
            scrolled("p3", "img2", vec![0.0, 1.0]),
        ];
        let components = vec![vec![0, 1], vec![2]];
        let clusters = build_clusters("a", &points, &components, "2024-01-01T00:00:00+00:00");

        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].face_count, 2);
        assert_eq!(clusters[0].image_count, 1);
        assert_eq!(clusters[0].image_ids, vec!["img1"]);
        assert_eq!(clusters[1].face_count, 1);
    }

    #[test]
    fn build_clusters_averages_vectors() {
        let points = vec![
            scrolled("p1", "img1", vec![1.0, 0.0]),
            scrolled("p2", "img2", vec![0.0, 1.0]),
        ];
        let clusters = build_clusters("a", &points, &[vec![0, 1]], "t");
        assert_eq!(clusters[0].centroid, vec![0.5, 0.5]);
        assert_eq!(clusters[0].image_count, 2);
    }

    #[test]
    fn sample_face_ids_are_capped_at_ten() {
        let points: Vec<ScrolledPoint> = (0..15)
            .map(|i| scrolled(&format!("p{i:02}"), &format!("img{i}"), vec![1.0]))
            .collect();
        let component: Vec<usize> = (0..15).collect();
        let clusters = build_clusters("a", &points, &[component], "t");
        assert_eq!(clusters[0].sample_face_ids.len(), 10);
        assert_eq!(clusters[0].face_count, 15);
    }
}
