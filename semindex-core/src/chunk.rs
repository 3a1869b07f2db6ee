//! In-memory chunk/upsert/batch data model that flows through the pipeline.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Git signals aggregated for a chunk, attached by an external
/// [`crate::external::GitMetadataProvider`]. Timestamps are seconds since epoch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GitMetadata {
    pub last_modified_at: i64,
    pub first_created_at: i64,
    pub dominant_author: String,
    pub dominant_author_email: String,
    pub authors: Vec<String>,
    pub commit_count: u32,
    pub last_commit_hash: String,
    pub age_days: u32,
    #[serde(default)]
    pub task_ids: Vec<String>,
}

/// Type-specific symbol metadata attached to a chunk, produced by a
/// [`crate::external::Chunker`].
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ChunkMetadata {
    pub file_path: String,
    pub language: String,
    pub chunk_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_documentation: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<GitMetadata>,
}

/// A single AST-aware (or line-window) slice of a source file, queued for
/// embedding. `chunk_id` is a pure function of
/// `(file_path, start_line, end_line, chunk_index)` so re-indexing the same
/// content produces the same id and the upsert is idempotent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkItem {
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub metadata: ChunkMetadata,
    pub chunk_id: String,
    pub codebase_path: String,
}

impl ChunkItem {
    pub fn new(
        content: String,
        start_line: usize,
        end_line: usize,
        metadata: ChunkMetadata,
        codebase_path: impl Into<String>,
    ) -> Self {
        let chunk_id = compute_chunk_id(
            &metadata.file_path,
            start_line,
            end_line,
            metadata.chunk_index,
        );
        Self {
            content,
            start_line,
            end_line,
            metadata,
            chunk_id,
            codebase_path: codebase_path.into(),
        }
    }
}

/// Deterministic chunk id from `(relative_path, start_line, end_line, chunk_index)`.
pub fn compute_chunk_id(
    relative_path: &str,
    start_line: usize,
    end_line: usize,
    chunk_index: usize,
) -> String {
    let input = format!("{relative_path}:{start_line}-{end_line}:{chunk_index}");
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// A point ready to be upserted into the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertItem {
    pub id: String,
    pub dense_vector: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sparse_vector: Option<HashMap<u32, f32>>,
    pub payload: UpsertPayload,
}

/// Payload fields stored alongside a vector, used for server-side filters and
/// query-result projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertPayload {
    pub relative_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub language: String,
    pub file_extension: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_documentation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<GitMetadata>,
    pub content: String,
}

/// Items carried by a single batch, tagged by which pipeline stage built it.
#[derive(Debug, Clone)]
pub enum WorkItem {
    Upsert(UpsertItem),
    Delete(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchType {
    Upsert,
    Delete,
}

/// A unit of work handed to the worker pool.
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: String,
    pub batch_type: BatchType,
    pub items: Vec<WorkItem>,
    pub created_at: std::time::SystemTime,
}

impl Batch {
    pub fn new(id: String, batch_type: BatchType, items: Vec<WorkItem>) -> Self {
        Self {
            id,
            batch_type,
            items,
            created_at: std::time::SystemTime::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
