//! HTTP client for the vector similarity index.
//!
//! Speaks the index's JSON REST surface: idempotent collection creation,
//! batched point upsert, filtered k-nearest-neighbor search, and full
//! scrolls with offset pagination. Transient failures go through the
//! shared retry policy; a search against a collection that does not exist
//! yet returns empty so first-run bootstrap cannot wedge callers.

pub mod payload;
pub mod points;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};

pub use payload::{PointPayload, PAYLOAD_VERSION};

use crate::config::IndexConfig;
use crate::retry::{RetryPolicy, TransportError};

const SCROLL_PAGE: usize = 256;

/// A vector point ready for upsert. The payload is raw JSON so modality
/// points (typed [`PointPayload`]) and album-dominant points share one path.
#[derive(Debug, Clone)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

/// A scored nearest-neighbor hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub payload: Option<PointPayload>,
}

/// A point returned by a scroll, with its vector when requested.
#[derive(Debug, Clone)]
pub struct ScrolledPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Option<PointPayload>,
}

/// Metadata filter for search and scroll requests.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub album_id: Option<String>,
    pub account: Option<String>,
    pub tags_any: Option<Vec<String>>,
}

impl SearchFilter {
    pub fn album(album_id: &str) -> Self {
        Self {
            album_id: Some(album_id.to_string()),
            ..Default::default()
        }
    }

    fn to_json(&self) -> Option<serde_json::Value> {
        let mut must = Vec::new();
        if let Some(album_id) = &self.album_id {
            must.push(json!({"key": "albumId", "match": {"value": album_id}}));
        }
        if let Some(account) = &self.account {
            must.push(json!({"key": "account", "match": {"value": account}}));
        }
        if let Some(tags) = &self.tags_any {
            if !tags.is_empty() {
                must.push(json!({"key": "tags", "match": {"any": tags}}));
            }
        }
        if must.is_empty() {
            None
        } else {
            Some(json!({ "must": must }))
        }
    }
}

pub struct IndexClient {
    agent: ureq::Agent,
    base_url: String,
    retry: RetryPolicy,
}

impl IndexClient {
    pub fn new(cfg: &IndexConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build();
        Self {
            agent,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            retry: cfg.retry_policy(),
        }
    }

    /// Create `collection` with cosine distance if it does not exist yet.
    pub fn ensure_collection(&self, collection: &str, vector_size: usize) -> Result<()> {
        let url = format!("{}/collections/{}", self.base_url, collection);

        match self.agent.get(&url).call() {
            Ok(_) => return Ok(()),
            Err(ureq::Error::Status(404, _)) => {}
            Err(e) => {
                return Err(anyhow!(
                    "index collection check failed for {collection}: {}",
                    map_ureq(e)
                ))
            }
        }

        let body = json!({"vectors": {"size": vector_size, "distance": "Cosine"}});
        self.retry
            .run(|| {
                self.agent
                    .put(&url)
                    .send_json(&body)
                    .map(|_| ())
                    .map_err(map_ureq)
            })
            .map_err(|e| anyhow!("failed to create collection {collection}: {e}"))?;

        tracing::info!(collection, vector_size, "created index collection");
        Ok(())
    }

    /// Upsert a batch of points, waiting for the write to apply. Returns the
    /// set of point ids the call confirmed; a failed call confirms none, so
    /// callers can leave the corresponding records for a later retry.
    pub fn upsert(&self, collection: &str, points: &[Point]) -> Result<HashSet<String>> {
        if points.is_empty() {
            return Ok(HashSet::new());
        }

        let url = format!(
            "{}/collections/{}/points?wait=true",
            self.base_url, collection
        );
        let body = json!({
            "points": points
                .iter()
                .map(|p| json!({"id": p.id, "vector": p.vector, "payload": p.payload}))
                .collect::<Vec<_>>()
        });

        self.retry
            .run(|| {
                self.agent
                    .put(&url)
                    .send_json(&body)
                    .map(|_| ())
                    .map_err(map_ureq)
            })
            .map_err(|e| anyhow!("index upsert to {collection} failed: {e}"))?;

        Ok(points.iter().map(|p| p.id.clone()).collect())
    }

    /// k-nearest-neighbor search. A 404 (collection not created yet) is an
    /// empty result, not an error.
    pub fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        let url = format!("{}/collections/{}/points/search", self.base_url, collection);
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
            "with_vectors": false,
        });
        if let Some(f) = filter.to_json() {
            body["filter"] = f;
        }

        let response: SearchResponse = self
            .retry
            .run(|| match self.agent.post(&url).send_json(&body) {
                Ok(resp) => resp
                    .into_json()
                    .map_err(|e| TransportError::Malformed(e.to_string())),
                Err(ureq::Error::Status(404, _)) => Ok(SearchResponse::default()),
                Err(e) => Err(map_ureq(e)),
            })
            .map_err(|e| anyhow!("index search on {collection} failed: {e}"))?;

        Ok(response
            .result
            .into_iter()
            .map(|hit| SearchHit {
                id: hit.id,
                score: hit.score,
                payload: hit.payload.and_then(PointPayload::from_value),
            })
            .collect())
    }

    /// Fetch every point matching `filter`, following scroll pagination.
    pub fn scroll_all(
        &self,
        collection: &str,
        filter: &SearchFilter,
        with_vectors: bool,
    ) -> Result<Vec<ScrolledPoint>> {
        let url = format!("{}/collections/{}/points/scroll", self.base_url, collection);
        let mut out = Vec::new();
        let mut offset: Option<serde_json::Value> = None;

        loop {
            let mut body = json!({
                "limit": SCROLL_PAGE,
                "with_payload": true,
                "with_vectors": with_vectors,
            });
            if let Some(f) = filter.to_json() {
                body["filter"] = f;
            }
            if let Some(off) = &offset {
                body["offset"] = off.clone();
            }

            let response: ScrollResponse = self
                .retry
                .run(|| match self.agent.post(&url).send_json(&body) {
                    Ok(resp) => resp
                        .into_json()
                        .map_err(|e| TransportError::Malformed(e.to_string())),
                    Err(ureq::Error::Status(404, _)) => Ok(ScrollResponse::default()),
                    Err(e) => Err(map_ureq(e)),
                })
                .map_err(|e| anyhow!("index scroll on {collection} failed: {e}"))?;

            let page = match response.result {
                Some(page) => page,
                None => break,
            };

            for raw in page.points {
                out.push(ScrolledPoint {
                    id: raw.id,
                    vector: raw.vector.map(VectorShape::into_vec).unwrap_or_default(),
                    payload: raw.payload.and_then(PointPayload::from_value),
                });
            }

            match page.next_page_offset {
                Some(next) if !next.is_null() => offset = Some(next),
                _ => break,
            }
        }

        Ok(out)
    }
}

fn map_ureq(e: ureq::Error) -> TransportError {
    match e {
        ureq::Error::Status(code, resp) => {
            TransportError::Status(code, resp.status_text().to_string())
        }
        ureq::Error::Transport(t) => match t.kind() {
            ureq::ErrorKind::ConnectionFailed | ureq::ErrorKind::Dns => {
                TransportError::ConnectionFailed
            }
            ureq::ErrorKind::Io => TransportError::Timeout,
            _ => TransportError::Other(t.to_string()),
        },
    }
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    id: String,
    score: f32,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ScrollResponse {
    #[serde(default)]
    result: Option<ScrollPage>,
}

#[derive(Debug, Deserialize)]
struct ScrollPage {
    #[serde(default)]
    points: Vec<RawScrolledPoint>,
    #[serde(default)]
    next_page_offset: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawScrolledPoint {
    id: String,
    #[serde(default)]
    vector: Option<VectorShape>,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

/// The index returns either a bare vector or a map of named vectors.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VectorShape {
    Plain(Vec<f32>),
    Named(BTreeMap<String, Vec<f32>>),
}

impl VectorShape {
    fn into_vec(self) -> Vec<f32> {
        match self {
            VectorShape::Plain(v) => v,
            VectorShape::Named(m) => m.into_values().next().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_builds_must_conditions() {
        let filter = SearchFilter {
            album_id: Some("album_a".into()),
            account: Some("acct".into()),
            tags_any: Some(vec!["beach".into()]),
        };
        let value = filter.to_json().unwrap();
        let must = value["must"].as_array().unwrap();
        assert_eq!(must.len(), 3);
        assert_eq!(must[0]["key"], "albumId");
        assert_eq!(must[0]["match"]["value"], "album_a");
    }

    #[test]
    fn empty_filter_is_absent() {
        assert!(SearchFilter::default().to_json().is_none());
    }

    #[test]
    fn parses_plain_vector_shape() {
        let raw: RawScrolledPoint = serde_json::from_value(serde_json::json!({
            "id": "p1",
            "vector": [0.1, 0.2],
        }))
        .unwrap();
        assert_eq!(raw.vector.unwrap().into_vec(), vec![0.1, 0.2]);
    }

    #[test]
    fn parses_named_vector_shape() {
        let raw: RawScrolledPoint = serde_json::from_value(serde_json::json!({
            "id": "p2",
            "vector": {"arcface": [0.5, 0.5]},
        }))
        .unwrap();
        assert_eq!(raw.vector.unwrap().into_vec(), vec![0.5, 0.5]);
    }

    #[test]
    fn parses_search_response_with_payload() {
        let response: SearchResponse = serde_json::from_value(serde_json::json!({
            "result": [
                {"id": "p1", "score": 0.91, "payload": {"imageId": "h1", "albumId": "a"}},
                {"id": "p2", "score": 0.40}
            ]
        }))
        .unwrap();
        assert_eq!(response.result.len(), 2);
        let payload = response.result[0].payload.clone().unwrap();
        assert_eq!(
            PointPayload::from_value(payload).unwrap().image_id,
            "h1"
        );
        assert!(response.result[1].payload.is_none());
    }
}
