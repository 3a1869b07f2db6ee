//! Traits for the collaborators the core consumes but does not implement:
//! embedding providers, vector stores, chunkers, and git metadata. Each
//! trait ships a lightweight in-process implementation usable in tests and
//! local CLI runs with no network dependency.

use crate::chunk::{ChunkItem, ChunkMetadata, GitMetadata};
use crate::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

/// A single embedding result.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub dims: usize,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;
    /// Order-preserving, length-matched batch embed. The only method called
    /// from the pipeline's hot path.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>>;
    fn dims(&self) -> usize;
    fn model(&self) -> &str;
}

/// Deterministic, dependency-free embedding provider: hashes the text into
/// `dims` buckets and L2-normalizes. Used by tests and local runs with no
/// configured embedding service.
pub struct HashingEmbeddingProvider {
    dims: usize,
}

impl HashingEmbeddingProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn hash_vector(&self, text: &str) -> Vec<f32> {
        let mut buckets = vec![0f32; self.dims];
        for (i, word) in text.split_whitespace().enumerate() {
            let mut hasher = Sha256::new();
            hasher.update(word.as_bytes());
            hasher.update(i.to_le_bytes());
            let digest = hasher.finalize();
            let bucket = u64::from_be_bytes(digest[0..8].try_into().expect("32-byte digest"))
                as usize
                % self.dims;
            buckets[bucket] += 1.0;
        }
        let norm: f32 = buckets.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut buckets {
                *v /= norm;
            }
        }
        buckets
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(Embedding {
            vector: self.hash_vector(text),
            dims: self.dims,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts
            .iter()
            .map(|t| Embedding {
                vector: self.hash_vector(t),
                dims: self.dims,
            })
            .collect())
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn model(&self) -> &str {
        "hashing-test-double"
    }
}

/// Server-side filter grammar shared with the vector store.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub must: Vec<Condition>,
    pub should: Vec<Condition>,
    pub must_not: Vec<Condition>,
}

#[derive(Debug, Clone)]
pub enum Condition {
    Match { key: String, value: serde_json::Value },
    MatchAny { key: String, any: Vec<serde_json::Value> },
    Range { key: String, gte: Option<f64>, lte: Option<f64> },
}

#[derive(Debug, Clone)]
pub struct DensePoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct HybridPoint {
    pub id: String,
    pub dense: Vec<f32>,
    pub sparse: HashMap<u32, f32>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
    Weak,
    Strong,
}

#[derive(Debug, Clone)]
pub struct UpsertOptions {
    pub wait: bool,
    pub ordering: Ordering,
}

#[derive(Debug, Clone)]
pub struct CollectionInfo {
    pub vector_size: usize,
    pub distance: String,
    pub hybrid_enabled: bool,
    pub points_count: u64,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn collection_exists(&self, name: &str) -> Result<bool>;
    async fn create_collection(
        &self,
        name: &str,
        dims: usize,
        distance: &str,
        hybrid: bool,
    ) -> Result<()>;
    async fn delete_collection(&self, name: &str) -> Result<()>;
    async fn get_collection_info(&self, name: &str) -> Result<CollectionInfo>;

    async fn add_points_optimized(
        &self,
        name: &str,
        points: Vec<DensePoint>,
        options: UpsertOptions,
    ) -> Result<()>;
    async fn add_points_with_sparse(&self, name: &str, points: Vec<HybridPoint>) -> Result<()>;
    async fn delete_points_by_paths(&self, name: &str, relative_paths: &[String]) -> Result<()>;

    async fn search(
        &self,
        name: &str,
        dense: &[f32],
        limit: usize,
        filter: &Filter,
    ) -> Result<Vec<SearchHit>>;
    async fn hybrid_search(
        &self,
        name: &str,
        dense: &[f32],
        sparse: &HashMap<u32, f32>,
        limit: usize,
        filter: &Filter,
    ) -> Result<Vec<SearchHit>>;

    async fn create_payload_index(&self, name: &str, key: &str, kind: &str) -> Result<()>;
    async fn has_payload_index(&self, name: &str, key: &str) -> Result<bool>;
    async fn get_point(&self, name: &str, id: &str) -> Result<Option<SearchHit>>;
}

struct InMemoryCollection {
    dims: usize,
    distance: String,
    hybrid_enabled: bool,
    points: std::collections::BTreeMap<String, DensePoint>,
    payload_indexes: std::collections::HashSet<String>,
}

/// Reference `VectorStore` backed by an in-process map. Enough to drive the
/// query engine's filter/overfetch/rerank path in tests with no network.
pub struct InMemoryVectorStore {
    collections: std::sync::Mutex<HashMap<String, InMemoryCollection>>,
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            collections: std::sync::Mutex::new(HashMap::new()),
        }
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn matches_condition(payload: &serde_json::Value, cond: &Condition) -> bool {
    match cond {
        Condition::Match { key, value } => payload.get(key) == Some(value),
        Condition::MatchAny { key, any } => payload
            .get(key)
            .map(|v| any.contains(v))
            .unwrap_or(false),
        Condition::Range { key, gte, lte } => {
            let Some(v) = payload.get(key).and_then(|v| v.as_f64()) else {
                return false;
            };
            gte.map(|g| v >= g).unwrap_or(true) && lte.map(|l| v <= l).unwrap_or(true)
        }
    }
}

fn matches_filter(payload: &serde_json::Value, filter: &Filter) -> bool {
    if !filter.must.iter().all(|c| matches_condition(payload, c)) {
        return false;
    }
    if filter.must_not.iter().any(|c| matches_condition(payload, c)) {
        return false;
    }
    if !filter.should.is_empty() && !filter.should.iter().any(|c| matches_condition(payload, c)) {
        return false;
    }
    true
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.collections.lock().expect("poisoned").contains_key(name))
    }

    async fn create_collection(
        &self,
        name: &str,
        dims: usize,
        distance: &str,
        hybrid: bool,
    ) -> Result<()> {
        self.collections.lock().expect("poisoned").insert(
            name.to_string(),
            InMemoryCollection {
                dims,
                distance: distance.to_string(),
                hybrid_enabled: hybrid,
                points: std::collections::BTreeMap::new(),
                payload_indexes: std::collections::HashSet::new(),
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.collections.lock().expect("poisoned").remove(name);
        Ok(())
    }

    async fn get_collection_info(&self, name: &str) -> Result<CollectionInfo> {
        let guard = self.collections.lock().expect("poisoned");
        let collection = guard
            .get(name)
            .ok_or_else(|| crate::SemIndexError::CollectionNotFound(name.to_string()))?;
        Ok(CollectionInfo {
            vector_size: collection.dims,
            distance: collection.distance.clone(),
            hybrid_enabled: collection.hybrid_enabled,
            points_count: collection.points.len() as u64,
        })
    }

    async fn add_points_optimized(
        &self,
        name: &str,
        points: Vec<DensePoint>,
        _options: UpsertOptions,
    ) -> Result<()> {
        let mut guard = self.collections.lock().expect("poisoned");
        let collection = guard
            .get_mut(name)
            .ok_or_else(|| crate::SemIndexError::CollectionNotFound(name.to_string()))?;
        for point in points {
            collection.points.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn add_points_with_sparse(&self, name: &str, points: Vec<HybridPoint>) -> Result<()> {
        let mut guard = self.collections.lock().expect("poisoned");
        let collection = guard
            .get_mut(name)
            .ok_or_else(|| crate::SemIndexError::CollectionNotFound(name.to_string()))?;
        for point in points {
            collection.points.insert(
                point.id.clone(),
                DensePoint {
                    id: point.id,
                    vector: point.dense,
                    payload: point.payload,
                },
            );
        }
        Ok(())
    }

    async fn delete_points_by_paths(&self, name: &str, relative_paths: &[String]) -> Result<()> {
        let mut guard = self.collections.lock().expect("poisoned");
        let collection = guard
            .get_mut(name)
            .ok_or_else(|| crate::SemIndexError::CollectionNotFound(name.to_string()))?;
        collection.points.retain(|_, point| {
            let path = point.payload.get("relative_path").and_then(|v| v.as_str());
            !path.is_some_and(|p| relative_paths.iter().any(|rp| rp == p))
        });
        Ok(())
    }

    async fn search(
        &self,
        name: &str,
        dense: &[f32],
        limit: usize,
        filter: &Filter,
    ) -> Result<Vec<SearchHit>> {
        let guard = self.collections.lock().expect("poisoned");
        let collection = guard
            .get(name)
            .ok_or_else(|| crate::SemIndexError::CollectionNotFound(name.to_string()))?;
        let mut hits: Vec<SearchHit> = collection
            .points
            .values()
            .filter(|p| matches_filter(&p.payload, filter))
            .map(|p| SearchHit {
                id: p.id.clone(),
                score: cosine_similarity(dense, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn hybrid_search(
        &self,
        name: &str,
        dense: &[f32],
        _sparse: &HashMap<u32, f32>,
        limit: usize,
        filter: &Filter,
    ) -> Result<Vec<SearchHit>> {
        self.search(name, dense, limit, filter).await
    }

    async fn create_payload_index(&self, name: &str, key: &str, _kind: &str) -> Result<()> {
        let mut guard = self.collections.lock().expect("poisoned");
        let collection = guard
            .get_mut(name)
            .ok_or_else(|| crate::SemIndexError::CollectionNotFound(name.to_string()))?;
        collection.payload_indexes.insert(key.to_string());
        Ok(())
    }

    async fn has_payload_index(&self, name: &str, key: &str) -> Result<bool> {
        let guard = self.collections.lock().expect("poisoned");
        let collection = guard
            .get(name)
            .ok_or_else(|| crate::SemIndexError::CollectionNotFound(name.to_string()))?;
        Ok(collection.payload_indexes.contains(key))
    }

    async fn get_point(&self, name: &str, id: &str) -> Result<Option<SearchHit>> {
        let guard = self.collections.lock().expect("poisoned");
        let collection = guard
            .get(name)
            .ok_or_else(|| crate::SemIndexError::CollectionNotFound(name.to_string()))?;
        Ok(collection.points.get(id).map(|p| SearchHit {
            id: p.id.clone(),
            score: 1.0,
            payload: p.payload.clone(),
        }))
    }
}

/// A single chunk before `chunk_id` is computed (that's assigned by the caller).
pub struct RawChunk {
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub metadata: ChunkMetadata,
}

pub trait Chunker: Send + Sync {
    fn chunk(&self, code: &str, file_path: &str, language: &str) -> Vec<RawChunk>;
}

/// Splits source into overlapping fixed-size line windows. Used for any
/// language when no AST-aware chunker is configured.
pub struct LineWindowChunker {
    pub chunk_lines: usize,
    pub chunk_overlap: usize,
}

impl LineWindowChunker {
    pub fn new(chunk_lines: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_lines,
            chunk_overlap,
        }
    }
}

impl Chunker for LineWindowChunker {
    fn chunk(&self, code: &str, file_path: &str, language: &str) -> Vec<RawChunk> {
        let lines: Vec<&str> = code.lines().collect();
        if lines.is_empty() {
            return Vec::new();
        }
        let step = self.chunk_lines.saturating_sub(self.chunk_overlap).max(1);
        let mut chunks = Vec::new();
        let mut chunk_index = 0;
        let mut i = 0;
        while i < lines.len() {
            let end = (i + self.chunk_lines).min(lines.len());
            let content = lines[i..end].join("\n");
            chunks.push(RawChunk {
                content,
                start_line: i + 1,
                end_line: end,
                metadata: ChunkMetadata {
                    file_path: file_path.to_string(),
                    language: language.to_string(),
                    chunk_index,
                    is_documentation: Some(language == "markdown" || language == "md"),
                    ..Default::default()
                },
            });
            chunk_index += 1;
            i += step;
        }
        chunks
    }
}

/// Converts chunker output into [`ChunkItem`]s, deriving `chunk_id`.
pub fn finalize_chunks(raw: Vec<RawChunk>, codebase_path: &str) -> Vec<ChunkItem> {
    raw.into_iter()
        .map(|c| ChunkItem::new(c.content, c.start_line, c.end_line, c.metadata, codebase_path))
        .collect()
}

#[async_trait]
pub trait GitMetadataProvider: Send + Sync {
    async fn metadata_for(&self, repo_root: &Path, relative_path: &str) -> Option<GitMetadata>;
}

/// Shell-out implementation that runs `git log` against the working tree.
/// Best-effort: returns `None` when the path isn't inside a git repo or
/// `git` is unavailable, never an error.
pub struct CliGitMetadataProvider;

#[async_trait]
impl GitMetadataProvider for CliGitMetadataProvider {
    async fn metadata_for(&self, repo_root: &Path, relative_path: &str) -> Option<GitMetadata> {
        let repo_root = repo_root.to_path_buf();
        let relative_path = relative_path.to_string();
        tokio::task::spawn_blocking(move || collect_git_metadata(&repo_root, &relative_path))
            .await
            .ok()
            .flatten()
    }
}

fn collect_git_metadata(repo_root: &Path, relative_path: &str) -> Option<GitMetadata> {
    let output = Command::new("git")
        .args(["log", "--follow", "--format=%H%x1f%an%x1f%ae%x1f%at%x1f%s", "--", relative_path])
        .current_dir(repo_root)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let mut authors = Vec::new();
    let mut last_commit_hash = String::new();
    let mut last_modified_at = 0i64;
    let mut first_created_at = 0i64;
    let mut commit_count = 0u32;
    let mut dominant_author = String::new();
    let mut dominant_author_email = String::new();
    let mut task_ids = Vec::new();
    let mut author_counts: HashMap<String, u32> = HashMap::new();

    for (i, line) in text.lines().enumerate() {
        let fields: Vec<&str> = line.split('\u{1f}').collect();
        if fields.len() < 5 {
            continue;
        }
        let (hash, author, email, timestamp, subject) =
            (fields[0], fields[1], fields[2], fields[3], fields[4]);
        let timestamp: i64 = timestamp.parse().unwrap_or(0);
        commit_count += 1;
        if i == 0 {
            last_commit_hash = hash.to_string();
            last_modified_at = timestamp;
        }
        first_created_at = timestamp;
        if !authors.contains(&author.to_string()) {
            authors.push(author.to_string());
        }
        *author_counts.entry(author.to_string()).or_insert(0) += 1;
        task_ids.extend(extract_task_ids(subject));
    }

    if commit_count == 0 {
        return None;
    }

    if let Some((author, _)) = author_counts.iter().max_by_key(|(_, count)| **count) {
        dominant_author = author.clone();
        dominant_author_email = email_for_author(repo_root, relative_path, author)
            .unwrap_or_default();
    }

    let now = first_created_at.max(last_modified_at);
    let age_days = ((now - first_created_at).max(0) / 86_400) as u32;

    Some(GitMetadata {
        last_modified_at,
        first_created_at,
        dominant_author,
        dominant_author_email,
        authors,
        commit_count,
        last_commit_hash,
        age_days,
        task_ids,
    })
}

fn email_for_author(repo_root: &Path, relative_path: &str, author: &str) -> Option<String> {
    let output = Command::new("git")
        .args([
            "log",
            "--follow",
            &format!("--author={author}"),
            "--format=%ae",
            "-1",
            "--",
            relative_path,
        ])
        .current_dir(repo_root)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// JIRA-style (`ABC-123`), `#NNN`, and Azure-style (`AB#NNN`) task references.
fn extract_task_ids(subject: &str) -> Vec<String> {
    let mut ids = Vec::new();
    for word in subject.split(|c: char| c.is_whitespace() || c == ',' || c == ':') {
        let word = word.trim_matches(|c: char| !c.is_alphanumeric() && c != '#');
        if word.is_empty() {
            continue;
        }
        let looks_like_task = word.starts_with('#')
            || (word.contains('-')
                && word.split('-').next().is_some_and(|p| p.len() >= 2 && p.chars().all(|c| c.is_ascii_uppercase()))
                && word.rsplit('-').next().is_some_and(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit())));
        if looks_like_task {
            ids.push(word.to_string());
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashing_embedding_provider_is_deterministic() {
        let provider = HashingEmbeddingProvider::new(32);
        let a = provider.embed("fn main").await.unwrap();
        let b = provider.embed("fn main").await.unwrap();
        assert_eq!(a.vector, b.vector);
    }

    #[tokio::test]
    async fn hashing_embedding_provider_differs_for_different_text() {
        let provider = HashingEmbeddingProvider::new(32);
        let a = provider.embed("fn main").await.unwrap();
        let b = provider.embed("fn other").await.unwrap();
        assert_ne!(a.vector, b.vector);
    }

    #[tokio::test]
    async fn in_memory_vector_store_round_trips_points() {
        let store = InMemoryVectorStore::new();
        store.create_collection("demo", 4, "cosine", false).await.unwrap();
        store
            .add_points_optimized(
                "demo",
                vec![DensePoint {
                    id: "1".to_string(),
                    vector: vec![1.0, 0.0, 0.0, 0.0],
                    payload: serde_json::json!({"relative_path": "a.rs"}),
                }],
                UpsertOptions { wait: true, ordering: Ordering::Strong },
            )
            .await
            .unwrap();
        let hits = store
            .search("demo", &[1.0, 0.0, 0.0, 0.0], 10, &Filter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "1");
    }

    #[tokio::test]
    async fn delete_points_by_paths_removes_matching_points() {
        let store = InMemoryVectorStore::new();
        store.create_collection("demo", 4, "cosine", false).await.unwrap();
        store
            .add_points_optimized(
                "demo",
                vec![DensePoint {
                    id: "1".to_string(),
                    vector: vec![1.0, 0.0, 0.0, 0.0],
                    payload: serde_json::json!({"relative_path": "a.rs"}),
                }],
                UpsertOptions { wait: true, ordering: Ordering::Strong },
            )
            .await
            .unwrap();
        store
            .delete_points_by_paths("demo", &["a.rs".to_string()])
            .await
            .unwrap();
        let info = store.get_collection_info("demo").await.unwrap();
        assert_eq!(info.points_count, 0);
    }

    #[test]
    fn line_window_chunker_overlaps_windows() {
        let chunker = LineWindowChunker::new(4, 1);
        let code = (1..=10).map(|n| format!("line{n}")).collect::<Vec<_>>().join("\n");
        let chunks = chunker.chunk(&code, "a.rs", "rust");
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[1].start_line, 4);
    }

    #[test]
    fn line_window_chunker_on_empty_source_yields_no_chunks() {
        let chunker = LineWindowChunker::new(10, 2);
        assert!(chunker.chunk("", "a.rs", "rust").is_empty());
    }

    #[test]
    fn extract_task_ids_recognizes_common_styles() {
        let ids = extract_task_ids("Fix bug ABC-123 and closes #456, see AB#789");
        assert!(ids.contains(&"ABC-123".to_string()));
        assert!(ids.contains(&"#456".to_string()));
    }
}
