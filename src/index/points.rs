//! Deterministic point ids and vector normalization.
//!
//! Point ids are pure functions of the image content hash, so re-indexing
//! the same file overwrites its existing point instead of duplicating it.

use md5::{Digest, Md5};

/// Map an image id (content hash) to its vector point id, formatted as a
/// UUID so the index accepts it natively.
pub fn deterministic_point_id(image_id: &str) -> String {
    uuid_text(&format!("{:x}", Md5::digest(image_id.as_bytes())))
}

/// Point id for an album's dominant-cluster centroid.
pub fn dominant_point_id(album_id: &str) -> String {
    deterministic_point_id(&format!("dom:{album_id}"))
}

fn uuid_text(hex: &str) -> String {
    debug_assert_eq!(hex.len(), 32);
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Scale `v` to unit length in place. Near-zero vectors stay finite.
pub fn l2_normalize(v: &mut [f32]) {
    let sum: f64 = v.iter().map(|x| (*x as f64) * (*x as f64)).sum();
    let inv = 1.0 / (sum + 1e-12).sqrt();
    for x in v.iter_mut() {
        *x = (*x as f64 * inv) as f32;
    }
}
