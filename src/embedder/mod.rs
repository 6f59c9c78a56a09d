//! Resilient HTTP client for the embedding service.
//!
//! The service exposes text, whole-image, and face embedding endpoints plus
//! status and self-test probes. More than one configured instance enables
//! load balancing (round-robin by default) with failover: when an instance
//! is unreachable the next one is tried, every instance at most once per
//! attempt, and attempts go through the shared backoff policy. Uploads are
//! rebuilt from an owned byte buffer on every try, so a half-sent body is
//! never reused.

use anyhow::{anyhow, bail, Result};
use rand::Rng;
use reqwest::blocking::multipart::{Form, Part};
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::config::{BalanceStrategy, EmbedderConfig};
use crate::retry::{RetryPolicy, TransportError};

/// A parsed embedding response.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    /// Number of faces the service detected, when it reports one.
    pub faces_found: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedderStatus {
    #[serde(default)]
    pub clip_device: Option<String>,
    #[serde(default)]
    pub face_device: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfTestReport {
    #[serde(default)]
    pub passed: bool,
    #[serde(default)]
    pub details: Option<String>,
}

pub struct EmbedderClient {
    http: reqwest::blocking::Client,
    endpoints: Vec<String>,
    strategy: BalanceStrategy,
    rotation: AtomicUsize,
    retry: RetryPolicy,
}

impl EmbedderClient {
    pub fn new(cfg: &EmbedderConfig) -> Result<Self> {
        let endpoints: Vec<String> = cfg
            .endpoints
            .iter()
            .map(|e| e.trim().trim_end_matches('/').to_string())
            .filter(|e| !e.is_empty())
            .collect();
        if endpoints.is_empty() {
            bail!("at least one embedder endpoint must be configured");
        }

        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            endpoints,
            strategy: cfg.strategy,
            rotation: AtomicUsize::new(0),
            retry: cfg.retry_policy(),
        })
    }

    pub fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = self
            .with_failover(|base| {
                let resp = self
                    .http
                    .post(format!("{base}/embed/text"))
                    .json(&serde_json::json!({ "text": text }))
                    .send()
                    .map_err(map_reqwest)?;
                parse_embedding(check_status(resp)?)
            })
            .map_err(|e| anyhow!("text embedding failed: {e}"))?;
        Ok(embedding.vector)
    }

    /// Visual embedding of a whole image.
    pub fn embed_image(&self, bytes: &[u8], file_name: &str) -> Result<Vec<f32>> {
        Ok(self.post_file("/embed/image", bytes, file_name)?.vector)
    }

    /// Facial embedding. An empty vector or `faces_found == 0` means the
    /// image has no usable face.
    pub fn embed_face(&self, bytes: &[u8], file_name: &str) -> Result<Embedding> {
        self.post_file("/embed/face", bytes, file_name)
    }

    pub fn status(&self) -> Result<EmbedderStatus> {
        let base = &self.endpoints[0];
        let resp = self
            .http
            .get(format!("{base}/_status"))
            .send()
            .map_err(map_reqwest)
            .and_then(check_status)
            .map_err(|e| anyhow!("embedder status failed: {e}"))?;
        Ok(resp.json()?)
    }

    pub fn self_test(&self) -> Result<SelfTestReport> {
        let base = &self.endpoints[0];
        let resp = self
            .http
            .get(format!("{base}/_selftest"))
            .send()
            .map_err(map_reqwest)
            .and_then(check_status)
            .map_err(|e| anyhow!("embedder self-test failed: {e}"))?;
        Ok(resp.json()?)
    }

    fn post_file(&self, path: &str, bytes: &[u8], file_name: &str) -> Result<Embedding> {
        self.with_failover(|base| {
            // fresh form per try; the buffer is owned, never a drained stream
            let part = Part::bytes(bytes.to_vec()).file_name(file_name.to_string());
            let form = Form::new().part("file", part);
            let resp = self
                .http
                .post(format!("{base}{path}"))
                .multipart(form)
                .send()
                .map_err(map_reqwest)?;
            parse_embedding(check_status(resp)?)
        })
        .map_err(|e| anyhow!("embedding upload to {path} failed: {e}"))
    }

    /// Index of the instance to try first for this request.
    fn next_start(&self) -> usize {
        if self.endpoints.len() == 1 {
            return 0;
        }
        match self.strategy {
            BalanceStrategy::RoundRobin => {
                self.rotation.fetch_add(1, Ordering::Relaxed) % self.endpoints.len()
            }
            BalanceStrategy::Random => rand::rng().random_range(0..self.endpoints.len()),
        }
    }

    /// Run `op` against the instance list. Unreachable instances fail over
    /// to the next in order; HTTP-level transient errors bubble up to the
    /// retry policy, which backs off and sweeps again.
    fn with_failover<T>(
        &self,
        op: impl Fn(&str) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        self.retry.run(|| {
            let start = self.next_start();
            for i in 0..self.endpoints.len() {
                let base = &self.endpoints[(start + i) % self.endpoints.len()];
                match op(base) {
                    Ok(value) => return Ok(value),
                    Err(e) if e.is_unreachable() && i + 1 < self.endpoints.len() => {
                        debug!(endpoint = %base, error = %e, "embedder instance unreachable, failing over");
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(TransportError::ConnectionFailed)
        })
    }
}

/// The service answers either a bare vector or an annotated object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EmbedBody {
    Annotated {
        vector: Vec<f32>,
        #[serde(default)]
        #[allow(dead_code)]
        dim: Option<usize>,
        #[serde(default, alias = "facesFound")]
        faces_found: Option<u32>,
    },
    Flat(Vec<f32>),
}

fn parse_embedding(resp: reqwest::blocking::Response) -> Result<Embedding, TransportError> {
    let body: EmbedBody = resp
        .json()
        .map_err(|e| TransportError::Malformed(e.to_string()))?;
    Ok(match body {
        EmbedBody::Annotated {
            vector,
            faces_found,
            ..
        } => Embedding {
            vector,
            faces_found,
        },
        EmbedBody::Flat(vector) => Embedding {
            vector,
            faces_found: None,
        },
    })
}

fn check_status(
    resp: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        let body: String = resp.text().unwrap_or_default().chars().take(200).collect();
        Err(TransportError::Status(status.as_u16(), body))
    }
}

fn map_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::ConnectionFailed
    } else if e.is_decode() {
        TransportError::Malformed(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}
