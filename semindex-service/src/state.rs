//! Shared process state: one registration + running pipeline per collection.

use semindex_core::{
    CliGitMetadataProvider, Config, GitMetadataProvider, HashingEmbeddingProvider, Indexer,
    InMemoryVectorStore, LineWindowChunker, Pipeline, VectorStore,
};
use semindex_core::external::{Chunker, EmbeddingProvider};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

pub type SharedState = Arc<AppState>;

#[derive(Debug, Clone)]
pub struct CollectionRegistration {
    pub codebase_path: String,
    pub last_indexed_at: Option<i64>,
}

#[derive(Default)]
pub struct Metrics {
    pub index_runs: AtomicU64,
    pub index_failures: AtomicU64,
    pub queries: AtomicU64,
    pub total_query_ms: AtomicU64,
}

pub struct AppState {
    pub collections: RwLock<HashMap<String, CollectionRegistration>>,
    pub pipelines: RwLock<HashMap<String, Arc<Pipeline>>>,
    pub store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub chunker: Arc<dyn Chunker>,
    pub git_provider: Option<Arc<dyn GitMetadataProvider>>,
    pub config: Config,
    pub snapshot_base: PathBuf,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config, snapshot_base: PathBuf) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            pipelines: RwLock::new(HashMap::new()),
            store: Arc::new(InMemoryVectorStore::new()),
            embedder: Arc::new(HashingEmbeddingProvider::new(256)),
            chunker: Arc::new(LineWindowChunker {
                chunk_lines: config.indexing.chunk_lines,
                chunk_overlap: config.indexing.chunk_overlap,
            }),
            git_provider: Some(Arc::new(CliGitMetadataProvider)),
            config,
            snapshot_base,
            metrics: Metrics::default(),
        }
    }

    /// Gets or lazily builds the pipeline backing a registered collection.
    pub async fn pipeline_for(&self, collection: &str) -> Arc<Pipeline> {
        if let Some(pipeline) = self.pipelines.read().await.get(collection) {
            return Arc::clone(pipeline);
        }
        let mut pipelines = self.pipelines.write().await;
        if let Some(pipeline) = pipelines.get(collection) {
            return Arc::clone(pipeline);
        }
        let pipeline = Pipeline::new(
            collection.to_string(),
            Arc::clone(&self.store),
            semindex_core::AccumulatorConfig {
                batch_size: self.config.batch.embedding_batch_size,
                flush_timeout: std::time::Duration::from_millis(self.config.batch.batch_formation_timeout_ms),
                max_queue_size: self.config.batch.max_queue_size,
                min_batch_size: None,
            },
            semindex_core::AccumulatorConfig {
                batch_size: self.config.batch.delete_batch_size,
                flush_timeout: std::time::Duration::from_millis(self.config.batch.delete_flush_timeout_ms),
                max_queue_size: self.config.batch.max_queue_size,
                min_batch_size: None,
            },
            semindex_core::WorkerPoolConfig {
                concurrency: self.config.batch.embedding_concurrency,
                max_retries: 3,
                retry_base_delay: std::time::Duration::from_millis(200),
                retry_max_delay: std::time::Duration::from_secs(10),
            },
        );
        pipelines.insert(collection.to_string(), Arc::clone(&pipeline));
        pipeline
    }

    pub fn indexer_for(&self, collection: &str, codebase_path: &str, pipeline: Arc<Pipeline>) -> Indexer {
        Indexer {
            collection: collection.to_string(),
            codebase_path: PathBuf::from(codebase_path),
            config: self.config.clone(),
            snapshot_base: self.snapshot_base.clone(),
            store: Arc::clone(&self.store),
            embedder: Arc::clone(&self.embedder),
            chunker: Arc::clone(&self.chunker),
            git_provider: self.git_provider.clone(),
            pipeline,
        }
    }

    pub fn record_query(&self, duration_ms: u64) {
        self.metrics.queries.fetch_add(1, Ordering::Relaxed);
        self.metrics.total_query_ms.fetch_add(duration_ms, Ordering::Relaxed);
    }
}
