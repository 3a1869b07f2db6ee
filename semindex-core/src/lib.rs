//! SemIndex Core - incremental semantic code search indexing
//!
//! This library provides the core functionality for sharded snapshot
//! persistence, parallel change detection, batched ingestion, and the
//! query engine that backs the service and CLI surfaces.

pub mod accumulator;
pub mod change_detector;
pub mod checkpoint;
pub mod chunk;
pub mod config;
pub mod error;
pub mod external;
pub mod hash_ring;
pub mod indexer;
pub mod merkle;
pub mod migrator;
pub mod pipeline;
pub mod points_accumulator;
pub mod query;
pub mod schema;
pub mod snapshot;
pub mod worker_pool;

pub use accumulator::{Accumulator, AccumulatorConfig};
pub use change_detector::{ChangeDetector, ChangeSet};
pub use checkpoint::{Checkpoint, CheckpointStore, Phase};
pub use chunk::{
    Batch, BatchType, ChunkItem, ChunkMetadata, GitMetadata, UpsertItem, UpsertPayload, WorkItem,
};
pub use config::Config;
pub use error::{ErrorEnvelope, SemIndexError};
pub use external::{
    finalize_chunks, CliGitMetadataProvider, Chunker, Condition, DensePoint, EmbeddingProvider,
    Embedding, Filter, GitMetadataProvider, HashingEmbeddingProvider, HybridPoint,
    InMemoryVectorStore, LineWindowChunker, Ordering as StoreOrdering, RawChunk, SearchHit,
    UpsertOptions, VectorStore,
};
pub use hash_ring::HashRing;
pub use indexer::{IndexError, Indexer, RunSummary};
pub use merkle::{merkle_root, MerkleTree};
pub use migrator::{MigrationResult, SnapshotMigrator};
pub use pipeline::{Pipeline, PipelineStats};
pub use points_accumulator::{PointsAccumulator, PointsAccumulatorConfig};
pub use query::{run_query, QueryOptions, QueryResult, RerankOption, RerankPreset, RerankWeights};
pub use schema::{ensure_current_schema, initialize_schema, CURRENT_SCHEMA_VERSION};
pub use snapshot::{FileMetadata, LoadedSnapshot, ShardedSnapshotManager, SnapshotMeta};
pub use worker_pool::{BatchResult, WorkerPool, WorkerPoolConfig};

/// Result type alias for semindex operations
pub type Result<T> = std::result::Result<T, SemIndexError>;
