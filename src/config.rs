use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub embedder: EmbedderConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub indexer: IndexerConfig,

    #[serde(default)]
    pub finalizer: FinalizerConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,
}

impl Config {
    /// Load configuration from `path`, the `FACEGRAPH_CONFIG` environment
    /// variable, or the default location. A missing file yields defaults.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path.unwrap_or_else(default_config_path);

        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("failed to parse config file {:?}", path))?;
            Ok(config)
        } else {
            warn!("config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}

/// Default config location, honoring `FACEGRAPH_CONFIG`.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("FACEGRAPH_CONFIG") {
        return PathBuf::from(path);
    }

    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("facegraph")
        .join("config.toml")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("facegraph")
        .join("facegraph.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Selection strategy across embedder instances.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BalanceStrategy {
    #[default]
    RoundRobin,
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderConfig {
    /// Embedder instance base URLs. More than one enables load balancing
    /// with failover.
    #[serde(default = "default_embedder_endpoints")]
    pub endpoints: Vec<String>,

    #[serde(default)]
    pub strategy: BalanceStrategy,

    #[serde(default = "default_embedder_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_embedder_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_embedder_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:8090".to_string()]
}

fn default_embedder_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_embedder_base_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    4000
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            endpoints: default_embedder_endpoints(),
            strategy: BalanceStrategy::default(),
            timeout_secs: default_embedder_timeout_secs(),
            max_retries: default_max_retries(),
            base_delay_ms: default_embedder_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl EmbedderConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            cap: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Vector index base URL, no trailing slash.
    #[serde(default = "default_index_base_url")]
    pub base_url: String,

    #[serde(default = "default_visual_collection")]
    pub visual_collection: String,

    #[serde(default = "default_face_collection")]
    pub face_collection: String,

    /// Per-album dominant-centroid points, one per finalized album.
    #[serde(default = "default_dominants_collection")]
    pub dominants_collection: String,

    #[serde(default = "default_vector_dim")]
    pub visual_dim: usize,

    #[serde(default = "default_vector_dim")]
    pub face_dim: usize,

    #[serde(default = "default_index_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_index_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_index_base_url() -> String {
    "http://127.0.0.1:6333".to_string()
}

fn default_visual_collection() -> String {
    "images_clip".to_string()
}

fn default_face_collection() -> String {
    "faces_arcface".to_string()
}

fn default_dominants_collection() -> String {
    "album_dominants".to_string()
}

fn default_vector_dim() -> usize {
    512
}

fn default_index_timeout_secs() -> u64 {
    20
}

fn default_index_base_delay_ms() -> u64 {
    200
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            base_url: default_index_base_url(),
            visual_collection: default_visual_collection(),
            face_collection: default_face_collection(),
            dominants_collection: default_dominants_collection(),
            visual_dim: default_vector_dim(),
            face_dim: default_vector_dim(),
            timeout_secs: default_index_timeout_secs(),
            max_retries: default_max_retries(),
            base_delay_ms: default_index_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl IndexConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            cap: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Maximum pending records pulled per loop iteration.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Sleep between empty polls, in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_true")]
    pub enable_visual: bool,

    #[serde(default = "default_true")]
    pub enable_face: bool,

    /// Concurrent embedding calls within one batch.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
}

fn default_batch_size() -> usize {
    256
}

fn default_interval_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_parallelism() -> usize {
    4
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            interval_secs: default_interval_secs(),
            enable_visual: true,
            enable_face: true,
            parallelism: default_parallelism(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizerConfig {
    /// Minimum neighbor similarity to union two faces into one cluster.
    #[serde(default = "default_link_threshold")]
    pub link_threshold: f32,

    /// Neighbors requested per face point.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Dominance ratio below which an album is a suspected aggregator.
    #[serde(default = "default_aggregator_threshold")]
    pub aggregator_threshold: f64,

    /// Maximum ratio gap between the top two clusters for an ambiguous call.
    #[serde(default = "default_ambiguity_delta")]
    pub ambiguity_delta: f64,
}

fn default_link_threshold() -> f32 {
    0.60
}

fn default_top_k() -> usize {
    50
}

fn default_aggregator_threshold() -> f64 {
    0.50
}

fn default_ambiguity_delta() -> f64 {
    0.10
}

impl Default for FinalizerConfig {
    fn default() -> Self {
        Self {
            link_threshold: default_link_threshold(),
            top_k: default_top_k(),
            aggregator_threshold: default_aggregator_threshold(),
            ambiguity_delta: default_ambiguity_delta(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,
}

fn default_image_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "webp", "bmp", "gif", "tif", "tiff"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_video_extensions() -> Vec<String> {
    ["mp4", "mov", "mkv", "avi", "wmv"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            image_extensions: default_image_extensions(),
            video_extensions: default_video_extensions(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.indexer.batch_size, 256);
        assert!(config.indexer.enable_visual);
        assert!(config.indexer.enable_face);
        assert_eq!(config.finalizer.top_k, 50);
        assert!((config.finalizer.link_threshold - 0.60).abs() < f32::EPSILON);
        assert_eq!(config.embedder.endpoints.len(), 1);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [indexer]
            batch_size = 16
            enable_visual = false

            [embedder]
            endpoints = ["http://e1:8090", "http://e2:8090"]
            strategy = "random"
            "#,
        )
        .unwrap();

        assert_eq!(config.indexer.batch_size, 16);
        assert!(!config.indexer.enable_visual);
        assert!(config.indexer.enable_face);
        assert_eq!(config.embedder.endpoints.len(), 2);
        assert_eq!(config.embedder.strategy, BalanceStrategy::Random);
        assert_eq!(config.index.base_url, "http://127.0.0.1:6333");
        assert!((config.finalizer.aggregator_threshold - 0.50).abs() < f64::EPSILON);
    }
}
