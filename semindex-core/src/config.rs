//! Configuration for semindex

use crate::SemIndexError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration as TOML
pub const DEFAULT_CONFIG: &str = r#"# semindex configuration

[core]
# Default maximum results returned by a query
default_result_limit = 5
# Checkpoint expiry for resumable runs
checkpoint_ttl = "24h"

[indexing]
# Default glob pattern for indexing
default_glob = "**/*.{rs,py,js,ts,tsx,jsx,go,md}"
# Lines per chunk for the line-window fallback chunker
chunk_lines = 50
# Overlap between adjacent line-window chunks
chunk_overlap = 10
# Number of shards for the on-disk snapshot and the change detector
shard_count = 16
# Virtual nodes per shard in the consistent-hash ring
virtual_nodes = 150

[batch]
# Upsert accumulator batch size (EMBEDDING_BATCH_SIZE)
embedding_batch_size = 1024
# Upsert accumulator flush timeout, ms (BATCH_FORMATION_TIMEOUT_MS)
batch_formation_timeout_ms = 2000
# Delete accumulator concurrency (QDRANT_DELETE_CONCURRENCY)
delete_concurrency = 8
# Delete accumulator batch size (QDRANT_DELETE_BATCH_SIZE)
delete_batch_size = 500
# Delete accumulator flush timeout, ms (DELETE_FLUSH_TIMEOUT_MS)
delete_flush_timeout_ms = 1000
# Upsert/embedding worker pool concurrency (EMBEDDING_CONCURRENCY)
embedding_concurrency = 4
# Upsert ordering guarantee requested from the vector store (QDRANT_BATCH_ORDERING)
batch_ordering = "weak"
# Worker pool max queue depth before backpressure engages
max_queue_size = 2000

[query]
# Overfetch multiplier applied when glob filtering or reranking is requested
overfetch_multiplier = 3

[ignore]
patterns = [
    ".git",
    ".semindex",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
    "venv",
    "*.min.js",
    "*.min.css",
    ".DS_Store",
    "*.lock",
]
"#;

/// semindex configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub ignore: IgnoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default = "default_result_limit")]
    pub default_result_limit: usize,
    #[serde(default = "default_checkpoint_ttl")]
    pub checkpoint_ttl: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    #[serde(default = "default_glob")]
    pub default_glob: String,
    #[serde(default = "default_chunk_lines")]
    pub chunk_lines: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
    #[serde(default = "default_virtual_nodes")]
    pub virtual_nodes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,
    #[serde(default = "default_batch_formation_timeout_ms")]
    pub batch_formation_timeout_ms: u64,
    #[serde(default = "default_delete_concurrency")]
    pub delete_concurrency: usize,
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: usize,
    #[serde(default = "default_delete_flush_timeout_ms")]
    pub delete_flush_timeout_ms: u64,
    #[serde(default = "default_embedding_concurrency")]
    pub embedding_concurrency: usize,
    #[serde(default = "default_batch_ordering")]
    pub batch_ordering: String,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_overfetch_multiplier")]
    pub overfetch_multiplier: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoreConfig {
    #[serde(default = "default_ignore_patterns")]
    pub patterns: Vec<String>,
}

fn default_result_limit() -> usize {
    5
}
fn default_checkpoint_ttl() -> String {
    "24h".to_string()
}
fn default_glob() -> String {
    "**/*.{rs,py,js,ts,tsx,jsx,go,md}".to_string()
}
fn default_chunk_lines() -> usize {
    50
}
fn default_chunk_overlap() -> usize {
    10
}
fn default_shard_count() -> usize {
    16
}
fn default_virtual_nodes() -> usize {
    150
}
fn default_embedding_batch_size() -> usize {
    1024
}
fn default_batch_formation_timeout_ms() -> u64 {
    2000
}
fn default_delete_concurrency() -> usize {
    8
}
fn default_delete_batch_size() -> usize {
    500
}
fn default_delete_flush_timeout_ms() -> u64 {
    1000
}
fn default_embedding_concurrency() -> usize {
    4
}
fn default_batch_ordering() -> String {
    "weak".to_string()
}
fn default_max_queue_size() -> usize {
    2000
}
fn default_overfetch_multiplier() -> usize {
    3
}
fn default_ignore_patterns() -> Vec<String> {
    vec![
        ".git".to_string(),
        ".semindex".to_string(),
        "node_modules".to_string(),
        "target".to_string(),
        "__pycache__".to_string(),
    ]
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            default_result_limit: default_result_limit(),
            checkpoint_ttl: default_checkpoint_ttl(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            default_glob: default_glob(),
            chunk_lines: default_chunk_lines(),
            chunk_overlap: default_chunk_overlap(),
            shard_count: default_shard_count(),
            virtual_nodes: default_virtual_nodes(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            embedding_batch_size: default_embedding_batch_size(),
            batch_formation_timeout_ms: default_batch_formation_timeout_ms(),
            delete_concurrency: default_delete_concurrency(),
            delete_batch_size: default_delete_batch_size(),
            delete_flush_timeout_ms: default_delete_flush_timeout_ms(),
            embedding_concurrency: default_embedding_concurrency(),
            batch_ordering: default_batch_ordering(),
            max_queue_size: default_max_queue_size(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            overfetch_multiplier: default_overfetch_multiplier(),
        }
    }
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            patterns: default_ignore_patterns(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| SemIndexError::ConfigParse(e.to_string()))
    }

    /// Overlay environment variables recognized by the core (§6). Called once
    /// at construction time; never re-read on the hot path.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_usize("EMBEDDING_CONCURRENCY") {
            self.batch.embedding_concurrency = v;
        }
        if let Some(v) = env_usize("EMBEDDING_BATCH_SIZE") {
            self.batch.embedding_batch_size = v;
        }
        if let Some(v) = env_u64("BATCH_FORMATION_TIMEOUT_MS") {
            self.batch.batch_formation_timeout_ms = v;
        }
        if let Some(v) = env_usize("QDRANT_DELETE_CONCURRENCY") {
            self.batch.delete_concurrency = v;
        }
        if let Some(v) = env_usize("QDRANT_DELETE_BATCH_SIZE") {
            self.batch.delete_batch_size = v;
        }
        if let Some(v) = env_u64("DELETE_FLUSH_TIMEOUT_MS") {
            self.batch.delete_flush_timeout_ms = v;
        }
        if let Ok(v) = std::env::var("QDRANT_BATCH_ORDERING") {
            self.batch.batch_ordering = v;
        }
        self
    }

    /// Get checkpoint TTL as Duration
    pub fn checkpoint_ttl_duration(&self) -> Duration {
        parse_duration(&self.core.checkpoint_ttl).unwrap_or(Duration::from_secs(24 * 3600))
    }

    /// Get the default glob pattern
    pub fn default_glob(&self) -> &str {
        &self.indexing.default_glob
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Parse duration string (e.g., "1h", "30m", "1d", "24h")
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let (num_str, unit) = s.split_at(s.len() - 1);
    let num: u64 = num_str.parse().ok()?;

    match unit {
        "s" => Some(Duration::from_secs(num)),
        "m" => Some(Duration::from_secs(num * 60)),
        "h" => Some(Duration::from_secs(num * 3600)),
        "d" => Some(Duration::from_secs(num * 86400)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config = Config::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.core.default_result_limit, 5);
        assert_eq!(config.indexing.shard_count, 16);
        assert_eq!(config.batch.embedding_batch_size, 1024);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("24h"), Some(Duration::from_secs(86400)));
        assert_eq!(parse_duration("invalid"), None);
    }

    #[test]
    fn test_checkpoint_ttl_duration_default() {
        let config = Config::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.checkpoint_ttl_duration(), Duration::from_secs(86400));
    }

    #[test]
    fn test_env_overrides_take_effect() {
        std::env::set_var("EMBEDDING_CONCURRENCY", "9");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.batch.embedding_concurrency, 9);
        std::env::remove_var("EMBEDDING_CONCURRENCY");
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.indexing.virtual_nodes, 150);
        assert_eq!(config.query.overfetch_multiplier, 3);
    }
}
