//! Ties the change detector, chunker, embedding provider, and pipeline
//! together into one full/incremental index run over a codebase path.

use crate::change_detector::ChangeDetector;
use crate::checkpoint::{CheckpointStore, Phase};
use crate::chunk::{UpsertItem, UpsertPayload};
use crate::config::Config;
use crate::external::{Chunker, EmbeddingProvider, GitMetadataProvider, RawChunk, VectorStore};
use crate::pipeline::Pipeline;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndexError {
    pub path: String,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunSummary {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub chunks_created: usize,
    pub errors: Vec<IndexError>,
    pub status: String,
    pub duration_ms: u64,
}

pub struct Indexer {
    pub collection: String,
    pub codebase_path: PathBuf,
    pub config: Config,
    pub snapshot_base: PathBuf,
    pub store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub chunker: Arc<dyn Chunker>,
    pub git_provider: Option<Arc<dyn GitMetadataProvider>>,
    pub pipeline: Arc<Pipeline>,
}

impl Indexer {
    /// Discovers files under `codebase_path` honoring the configured ignore
    /// patterns and glob, detects changes against the previous snapshot,
    /// chunks+embeds added/modified files, deletes removed ones, and
    /// publishes a new snapshot on success.
    pub async fn run(&self, full: bool) -> Result<RunSummary> {
        let started = Instant::now();
        let timestamp = now_unix();
        let checkpoint = CheckpointStore::new(&self.snapshot_base, &self.collection);

        if !self.store.collection_exists(&self.collection).await? {
            self.store
                .create_collection(&self.collection, self.embedder.dims(), "cosine", false)
                .await?;
            crate::schema::initialize_schema(&self.store, &self.collection).await?;
        } else {
            crate::schema::ensure_current_schema(&self.store, &self.collection).await?;
        }

        let files = discover_files(
            &self.codebase_path,
            &self.config.ignore.patterns,
            &self.config.indexing.default_glob,
        );
        info!(collection = %self.collection, count = files.len(), "discovered files");

        let mut detector = ChangeDetector::new(
            self.codebase_path.clone(),
            self.snapshot_base.clone(),
            self.collection.clone(),
            self.config.indexing.shard_count,
            self.config.indexing.virtual_nodes,
        );
        let has_previous = detector.initialize()?;

        let change_set = if full || !has_previous {
            crate::change_detector::ChangeSet {
                added: files.iter().map(|p| relative_path_string(&self.codebase_path, p)).collect(),
                modified: Vec::new(),
                deleted: Vec::new(),
                unchanged: Vec::new(),
            }
        } else {
            detector.detect_changes(&files)
        };

        let mut to_process: Vec<String> = change_set.added;
        to_process.extend(change_set.modified);
        let already_processed = checkpoint
            .load(timestamp)?
            .map(|c| c.processed_files)
            .unwrap_or_default();
        let to_process: Vec<String> = to_process
            .into_iter()
            .filter(|p| !already_processed.contains(p))
            .collect();

        let total_files = to_process.len() + change_set.deleted.len();
        checkpoint.save(&already_processed, total_files, Phase::Indexing, timestamp)?;

        let mut summary = RunSummary {
            files_scanned: files.len(),
            status: "completed".to_string(),
            ..Default::default()
        };
        let mut processed_paths = already_processed;

        if !change_set.deleted.is_empty() {
            self.pipeline.add_delete_many(change_set.deleted);
        }

        for relative in &to_process {
            let path = self.codebase_path.join(relative);
            match self.index_one_file(&path, relative).await {
                Ok(chunk_count) => {
                    summary.files_indexed += 1;
                    summary.chunks_created += chunk_count;
                    processed_paths.push(relative.clone());
                }
                Err(err) => {
                    warn!(path = %relative, error = %err, "failed to index file");
                    summary.files_skipped += 1;
                    summary.errors.push(IndexError {
                        path: relative.clone(),
                        kind: "chunker_failed".to_string(),
                        message: err.to_string(),
                    });
                }
            }
            checkpoint.save(&processed_paths, total_files, Phase::Indexing, timestamp)?;
        }

        self.pipeline.flush().await;

        let all_files: std::collections::BTreeMap<String, crate::snapshot::FileMetadata> = files
            .iter()
            .filter_map(|p| {
                let relative = relative_path_string(&self.codebase_path, p);
                std::fs::metadata(p).ok().map(|meta| {
                    let content = std::fs::read(p).unwrap_or_default();
                    use sha2::{Digest, Sha256};
                    let mut hasher = Sha256::new();
                    hasher.update(&content);
                    let hash = hex::encode(hasher.finalize());
                    let mtime = meta
                        .modified()
                        .ok()
                        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                        .map(|d| d.as_millis() as f64)
                        .unwrap_or(0.0);
                    (
                        relative,
                        crate::snapshot::FileMetadata { mtime, size: meta.len(), content_hash: hash },
                    )
                })
            })
            .collect();

        let manager = crate::snapshot::ShardedSnapshotManager::new(self.snapshot_base.clone());
        manager.save(
            &self.collection,
            &self.codebase_path.to_string_lossy(),
            self.config.indexing.shard_count,
            self.config.indexing.virtual_nodes,
            all_files,
            timestamp,
        )?;

        checkpoint.delete()?;

        if !summary.errors.is_empty() {
            summary.status = if summary.files_indexed == 0 { "failed" } else { "partial" }.to_string();
        }
        summary.duration_ms = started.elapsed().as_millis() as u64;
        Ok(summary)
    }

    async fn index_one_file(&self, path: &Path, relative: &str) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let language = language_for_extension(path);
        let raw_chunks: Vec<RawChunk> = self.chunker.chunk(&content, relative, &language);
        if raw_chunks.is_empty() {
            return Ok(0);
        }

        let git = if let Some(provider) = &self.git_provider {
            provider.metadata_for(&self.codebase_path, relative).await
        } else {
            None
        };

        let texts: Vec<String> = raw_chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_string();

        for (chunk, embedding) in raw_chunks.iter().zip(embeddings.into_iter()) {
            let chunk_id = crate::chunk::compute_chunk_id(
                relative,
                chunk.start_line,
                chunk.end_line,
                chunk.metadata.chunk_index,
            );
            let item = UpsertItem {
                id: chunk_id,
                dense_vector: embedding.vector,
                sparse_vector: None,
                payload: UpsertPayload {
                    relative_path: relative.to_string(),
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    language: language.clone(),
                    file_extension: extension.clone(),
                    chunk_type: chunk.metadata.chunk_type.clone(),
                    imports: chunk.metadata.imports.clone(),
                    is_documentation: chunk.metadata.is_documentation,
                    git: git.clone(),
                    content: chunk.content.clone(),
                },
            };
            self.pipeline.add_upsert(item);
        }

        Ok(raw_chunks.len())
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn relative_path_string(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn language_for_extension(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some("rs") => "rust",
        Some("py") => "python",
        Some("js" | "jsx") => "javascript",
        Some("ts" | "tsx") => "typescript",
        Some("go") => "go",
        Some("md") => "markdown",
        Some(other) => other,
        None => "text",
    }
    .to_string()
}

fn discover_files(root: &Path, ignore_patterns: &[String], include_glob: &str) -> Vec<PathBuf> {
    let globs: Vec<globset::GlobMatcher> = ignore_patterns
        .iter()
        .filter_map(|p| globset::Glob::new(p).ok())
        .map(|g| g.compile_matcher())
        .collect();
    let include = globset::Glob::new(include_glob).ok().map(|g| g.compile_matcher());

    ignore::WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .git_global(true)
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .map(|entry| entry.into_path())
        .filter(|path| {
            !path.components().any(|c| {
                let name = c.as_os_str().to_string_lossy();
                globs.iter().any(|g| g.is_match(name.as_ref()))
            })
        })
        .filter(|path| match &include {
            Some(matcher) => path
                .strip_prefix(root)
                .map(|rel| matcher.is_match(rel))
                .unwrap_or(true),
            None => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::AccumulatorConfig;
    use crate::external::{HashingEmbeddingProvider, InMemoryVectorStore, LineWindowChunker};
    use crate::worker_pool::WorkerPoolConfig;
    use std::time::Duration;

    fn test_pipeline(store: Arc<dyn VectorStore>, collection: &str) -> Arc<Pipeline> {
        Pipeline::new(
            collection,
            store,
            AccumulatorConfig {
                batch_size: 8,
                flush_timeout: Duration::from_secs(5),
                max_queue_size: 100,
                min_batch_size: None,
            },
            AccumulatorConfig {
                batch_size: 8,
                flush_timeout: Duration::from_secs(5),
                max_queue_size: 100,
                min_batch_size: None,
            },
            WorkerPoolConfig {
                concurrency: 2,
                max_retries: 1,
                retry_base_delay: Duration::from_millis(1),
                retry_max_delay: Duration::from_millis(5),
            },
        )
    }

    #[tokio::test]
    async fn full_index_run_chunks_and_upserts_files() {
        let codebase = tempfile::tempdir().unwrap();
        let snapshot_base = tempfile::tempdir().unwrap();
        std::fs::write(codebase.path().join("a.rs"), "fn a() {}\nfn b() {}\n").unwrap();

        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        store.create_collection("demo", 8, "cosine", false).await.unwrap();

        let pipeline = test_pipeline(Arc::clone(&store), "demo");
        let indexer = Indexer {
            collection: "demo".to_string(),
            codebase_path: codebase.path().to_path_buf(),
            config: Config::default(),
            snapshot_base: snapshot_base.path().to_path_buf(),
            store: Arc::clone(&store),
            embedder: Arc::new(HashingEmbeddingProvider::new(8)),
            chunker: Arc::new(LineWindowChunker { chunk_lines: 50, chunk_overlap: 10 }),
            git_provider: None,
            pipeline,
        };

        let summary = indexer.run(true).await.unwrap();
        assert_eq!(summary.files_indexed, 1);
        assert!(summary.chunks_created >= 1);
        assert_eq!(summary.status, "completed");

        let info = store.get_collection_info("demo").await.unwrap();
        assert!(info.points_count >= 1);
    }

    #[tokio::test]
    async fn incremental_run_skips_unchanged_files() {
        let codebase = tempfile::tempdir().unwrap();
        let snapshot_base = tempfile::tempdir().unwrap();
        std::fs::write(codebase.path().join("a.rs"), "fn a() {}\n").unwrap();

        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        store.create_collection("demo", 8, "cosine", false).await.unwrap();

        let make_indexer = || Indexer {
            collection: "demo".to_string(),
            codebase_path: codebase.path().to_path_buf(),
            config: Config::default(),
            snapshot_base: snapshot_base.path().to_path_buf(),
            store: Arc::clone(&store),
            embedder: Arc::new(HashingEmbeddingProvider::new(8)),
            chunker: Arc::new(LineWindowChunker { chunk_lines: 50, chunk_overlap: 10 }),
            git_provider: None,
            pipeline: test_pipeline(Arc::clone(&store), "demo"),
        };

        let first = make_indexer().run(true).await.unwrap();
        assert_eq!(first.files_indexed, 1);

        let second = make_indexer().run(false).await.unwrap();
        assert_eq!(second.files_indexed, 0);
        assert_eq!(second.files_scanned, 1);
    }
}
