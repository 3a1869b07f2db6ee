//! Error types for semindex operations

use serde::Serialize;
use std::path::PathBuf;

/// Structured error payload shared between service and client.
///
/// Used as the HTTP error body in semindex-service and parsed from service
/// responses in semindex-client.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub hint: String,
}

impl ErrorEnvelope {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            hint: hint.into(),
        }
    }

    pub fn not_indexed(collection: &str) -> Self {
        Self::new(
            "not_indexed",
            format!("Collection '{collection}' is not indexed"),
            "Call POST /collections/:name/index first",
        )
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new("internal_error", msg, "Check service logs for details")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SemIndexError {
    #[error("Not indexed: collection has no snapshot yet")]
    NotIndexed,

    #[error("Checksum mismatch in shard {0}")]
    ChecksumMismatch(usize),

    #[error("Shard file missing: shard-{0:02}.json")]
    ShardMissing(usize),

    #[error("Snapshot meta.json is corrupt: {0}")]
    MetaCorrupt(String),

    #[error("Snapshot migration failed: {0}")]
    MigrationFailed(String),

    #[error("Chunker failed for {}: {kind}", .path.display())]
    ChunkerFailed { path: PathBuf, kind: String },

    #[error("Embedding request failed: {0}")]
    EmbeddingFailed(String),

    #[error("Vector store request failed: {0}")]
    VectorStoreFailed(String),

    #[error("Rate limited after {attempts} attempts: {message}")]
    RateLimited { attempts: u32, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Config already exists at {}", .0.display())]
    ConfigExists(PathBuf),

    #[error("Glob pattern error: {0}")]
    GlobPattern(String),

    #[error("Collection '{0}' already registered")]
    CollectionExists(String),

    #[error("Collection '{0}' not registered")]
    CollectionNotFound(String),

    #[error("Invalid query option: {0}")]
    InvalidQuery(String),

    #[error("Service error [{code}]: {message} — {hint}")]
    ServiceError {
        code: String,
        message: String,
        hint: String,
    },
}

impl From<&SemIndexError> for ErrorEnvelope {
    fn from(err: &SemIndexError) -> Self {
        match err {
            SemIndexError::NotIndexed => ErrorEnvelope::new(
                "not_indexed",
                err.to_string(),
                "Call index on this collection first",
            ),
            SemIndexError::ChecksumMismatch(shard) => ErrorEnvelope::new(
                "checksum_mismatch",
                err.to_string(),
                format!("Delete the snapshot and reindex; shard {shard} is corrupt"),
            ),
            SemIndexError::ShardMissing(_) | SemIndexError::MetaCorrupt(_) => {
                ErrorEnvelope::new("snapshot_corrupt", err.to_string(), "Delete and reindex")
            }
            SemIndexError::MigrationFailed(_) => ErrorEnvelope::new(
                "migration_failed",
                err.to_string(),
                "Delete the legacy snapshot and run a full reindex",
            ),
            SemIndexError::CollectionNotFound(_) => ErrorEnvelope::new(
                "collection_not_found",
                err.to_string(),
                "Register the collection with POST /collections first",
            ),
            SemIndexError::CollectionExists(_) => {
                ErrorEnvelope::new("collection_exists", err.to_string(), "Use a different name")
            }
            SemIndexError::ServiceError { code, message, hint } => {
                ErrorEnvelope::new(code.clone(), message.clone(), hint.clone())
            }
            _ => ErrorEnvelope::internal(err.to_string()),
        }
    }
}
