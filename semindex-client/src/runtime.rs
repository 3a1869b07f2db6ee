//! Mode orchestration for the CLI: local (in-process) vs remote (HTTP service).
//!
//! `ClientRuntime` fully owns both modes so command handlers never branch on
//! whether a `--service-url` was passed.

use crate::service_client::{CollectionStatus, ServiceClient, ServiceStatus};
use semindex_core::query::{run_query, QueryOptions, QueryResult};
use semindex_core::{
    ensure_current_schema, AccumulatorConfig, CliGitMetadataProvider, Config,
    GitMetadataProvider, HashingEmbeddingProvider, Indexer, InMemoryVectorStore, LineWindowChunker,
    Pipeline, RunSummary, SemIndexError, VectorStore, WorkerPoolConfig,
};
use semindex_core::external::{Chunker, EmbeddingProvider};
use std::path::Path;
use std::sync::Arc;

/// Report returned by [`ClientRuntime::status`] — shape depends on whether a
/// collection name was given.
pub enum StatusReport {
    Collection(CollectionStatus),
    Service(ServiceStatus),
}

struct LocalRuntime {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: Arc<dyn Chunker>,
    git_provider: Option<Arc<dyn GitMetadataProvider>>,
    config: Config,
    snapshot_base: std::path::PathBuf,
}

impl LocalRuntime {
    fn new(config: Config, snapshot_base: std::path::PathBuf) -> Self {
        Self {
            store: Arc::new(InMemoryVectorStore::new()),
            embedder: Arc::new(HashingEmbeddingProvider::new(256)),
            chunker: Arc::new(LineWindowChunker {
                chunk_lines: config.indexing.chunk_lines,
                chunk_overlap: config.indexing.chunk_overlap,
            }),
            git_provider: Some(Arc::new(CliGitMetadataProvider)),
            config,
            snapshot_base,
        }
    }

    fn build_pipeline(&self, collection: &str) -> Arc<Pipeline> {
        Pipeline::new(
            collection.to_string(),
            Arc::clone(&self.store),
            AccumulatorConfig {
                batch_size: self.config.batch.embedding_batch_size,
                flush_timeout: std::time::Duration::from_millis(
                    self.config.batch.batch_formation_timeout_ms,
                ),
                max_queue_size: self.config.batch.max_queue_size,
                min_batch_size: None,
            },
            AccumulatorConfig {
                batch_size: self.config.batch.delete_batch_size,
                flush_timeout: std::time::Duration::from_millis(
                    self.config.batch.delete_flush_timeout_ms,
                ),
                max_queue_size: self.config.batch.max_queue_size,
                min_batch_size: None,
            },
            WorkerPoolConfig {
                concurrency: self.config.batch.embedding_concurrency,
                max_retries: 3,
                retry_base_delay: std::time::Duration::from_millis(200),
                retry_max_delay: std::time::Duration::from_secs(10),
            },
        )
    }

    async fn index(
        &self,
        collection: &str,
        codebase_path: &Path,
        full: bool,
    ) -> Result<RunSummary, SemIndexError> {
        let pipeline = self.build_pipeline(collection);
        let indexer = Indexer {
            collection: collection.to_string(),
            codebase_path: codebase_path.to_path_buf(),
            config: self.config.clone(),
            snapshot_base: self.snapshot_base.clone(),
            store: Arc::clone(&self.store),
            embedder: Arc::clone(&self.embedder),
            chunker: Arc::clone(&self.chunker),
            git_provider: self.git_provider.clone(),
            pipeline,
        };
        indexer.run(full).await
    }

    async fn query(
        &self,
        collection: &str,
        query_text: &str,
        options: &QueryOptions,
    ) -> Result<Vec<QueryResult>, SemIndexError> {
        run_query(
            &self.store,
            &self.embedder,
            collection,
            query_text,
            options,
            self.config.query.overfetch_multiplier,
        )
        .await
    }

    async fn status(&self, collection: &str) -> Result<CollectionStatus, SemIndexError> {
        let schema_version = ensure_current_schema(&self.store, collection).await?;
        let info = self.store.get_collection_info(collection).await?;
        Ok(CollectionStatus {
            name: collection.to_string(),
            schema_version,
            points_count: info.points_count,
            last_indexed_at: None,
        })
    }
}

enum Mode {
    Local {
        runtime: LocalRuntime,
        tokio: tokio::runtime::Runtime,
    },
    Remote(ServiceClient),
}

pub struct ClientRuntime {
    mode: Mode,
}

impl ClientRuntime {
    /// Local mode: drives the core directly with in-process stub
    /// collaborators (`InMemoryVectorStore`, `HashingEmbeddingProvider`).
    pub fn new_local(config: Config, snapshot_base: std::path::PathBuf) -> std::io::Result<Self> {
        let tokio = tokio::runtime::Runtime::new()?;
        let runtime = LocalRuntime::new(config, snapshot_base);
        Ok(Self { mode: Mode::Local { runtime, tokio } })
    }

    /// Remote mode: drives a running `semindex-service` over HTTP.
    pub fn new_remote(service_url: &str, api_key: Option<String>) -> Self {
        Self { mode: Mode::Remote(ServiceClient::new(service_url, api_key)) }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.mode, Mode::Remote(_))
    }

    pub fn index(
        &self,
        collection: &str,
        codebase_path: &Path,
        full: bool,
    ) -> Result<RunSummary, SemIndexError> {
        match &self.mode {
            Mode::Local { runtime, tokio } => {
                tokio.block_on(runtime.index(collection, codebase_path, full))
            }
            Mode::Remote(client) => {
                client.register_collection(collection, &codebase_path.to_string_lossy())?;
                client.index(collection, full)
            }
        }
    }

    pub fn query(
        &self,
        collection: &str,
        query_text: &str,
        options: QueryOptions,
    ) -> Result<Vec<QueryResult>, SemIndexError> {
        match &self.mode {
            Mode::Local { runtime, tokio } => {
                tokio.block_on(runtime.query(collection, query_text, &options))
            }
            Mode::Remote(client) => client.query(collection, query_text, options),
        }
    }

    /// Status for a single collection if `collection` is given; otherwise
    /// process-wide service status (remote mode only — local mode has no
    /// running process to report on).
    pub fn status(&self, collection: Option<&str>) -> Result<StatusReport, SemIndexError> {
        match &self.mode {
            Mode::Local { runtime, tokio } => {
                let name = collection.ok_or_else(|| SemIndexError::InvalidQuery(
                    "local mode requires a collection name for status".to_string(),
                ))?;
                tokio.block_on(runtime.status(name)).map(StatusReport::Collection)
            }
            Mode::Remote(client) => match collection {
                Some(name) => client.collection_status(name).map(StatusReport::Collection),
                None => client.service_status().map(StatusReport::Service),
            },
        }
    }
}
