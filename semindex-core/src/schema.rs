//! Collection schema version manager: versioned migrations of vector-store
//! collection schema (currently just payload indexes), tracked via a
//! reserved marker record inside the collection itself.

use crate::external::{DensePoint, Ordering, UpsertOptions, VectorStore};
use crate::Result;
use std::sync::Arc;
use tracing::info;

pub const CURRENT_SCHEMA_VERSION: u32 = 4;
const SCHEMA_MARKER_ID: &str = "__schema_version__";
const RELATIVE_PATH_INDEX_KEY: &str = "relative_path";

/// Applies any missing migrations in order and writes back the new version.
/// A collection with no marker but an existing relative-path index is
/// treated as already current (covers collections created before the
/// marker record existed).
pub async fn ensure_current_schema(store: &Arc<dyn VectorStore>, collection: &str) -> Result<u32> {
    let version = read_version(store, collection).await?;

    match version {
        Some(v) if v >= CURRENT_SCHEMA_VERSION => Ok(v),
        Some(v) => {
            info!(collection, from = v, to = CURRENT_SCHEMA_VERSION, "migrating collection schema");
            apply_migrations(store, collection, v).await?;
            write_version(store, collection, CURRENT_SCHEMA_VERSION).await?;
            Ok(CURRENT_SCHEMA_VERSION)
        }
        None => {
            if store.has_payload_index(collection, RELATIVE_PATH_INDEX_KEY).await? {
                write_version(store, collection, CURRENT_SCHEMA_VERSION).await?;
                Ok(CURRENT_SCHEMA_VERSION)
            } else {
                info!(collection, "no schema marker found, initializing from scratch");
                initialize_schema(store, collection).await?;
                Ok(CURRENT_SCHEMA_VERSION)
            }
        }
    }
}

/// Creates all indexes for a brand new collection and writes the version
/// marker in one go.
pub async fn initialize_schema(store: &Arc<dyn VectorStore>, collection: &str) -> Result<()> {
    if !store.has_payload_index(collection, RELATIVE_PATH_INDEX_KEY).await? {
        store
            .create_payload_index(collection, RELATIVE_PATH_INDEX_KEY, "keyword")
            .await?;
    }
    write_version(store, collection, CURRENT_SCHEMA_VERSION).await
}

async fn apply_migrations(store: &Arc<dyn VectorStore>, collection: &str, from_version: u32) -> Result<()> {
    if from_version < 4 && !store.has_payload_index(collection, RELATIVE_PATH_INDEX_KEY).await? {
        store
            .create_payload_index(collection, RELATIVE_PATH_INDEX_KEY, "keyword")
            .await?;
    }
    Ok(())
}

async fn read_version(store: &Arc<dyn VectorStore>, collection: &str) -> Result<Option<u32>> {
    let point = store.get_point(collection, SCHEMA_MARKER_ID).await?;
    Ok(point.and_then(|p| p.payload.get("version").and_then(|v| v.as_u64()).map(|v| v as u32)))
}

async fn write_version(store: &Arc<dyn VectorStore>, collection: &str, version: u32) -> Result<()> {
    let marker = DensePoint {
        id: SCHEMA_MARKER_ID.to_string(),
        vector: vec![0.0],
        payload: serde_json::json!({ "version": version, "marker": true }),
    };
    store
        .add_points_optimized(
            collection,
            vec![marker],
            UpsertOptions { wait: true, ordering: Ordering::Strong },
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::InMemoryVectorStore;

    async fn store_with_collection(name: &str, dims: usize) -> Arc<dyn VectorStore> {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        store.create_collection(name, dims, "cosine", false).await.unwrap();
        store
    }

    #[tokio::test]
    async fn initialize_schema_creates_index_and_marker() {
        let store = store_with_collection("demo", 1).await;
        initialize_schema(&store, "demo").await.unwrap();
        assert!(store.has_payload_index("demo", "relative_path").await.unwrap());
        assert_eq!(read_version(&store, "demo").await.unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[tokio::test]
    async fn ensure_current_schema_is_idempotent() {
        let store = store_with_collection("demo", 1).await;
        let first = ensure_current_schema(&store, "demo").await.unwrap();
        let second = ensure_current_schema(&store, "demo").await.unwrap();
        assert_eq!(first, CURRENT_SCHEMA_VERSION);
        assert_eq!(second, CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn ensure_current_schema_treats_existing_index_without_marker_as_current() {
        let store = store_with_collection("demo", 1).await;
        store.create_payload_index("demo", "relative_path", "keyword").await.unwrap();
        let version = ensure_current_schema(&store, "demo").await.unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn ensure_current_schema_migrates_stale_version_forward() {
        let store = store_with_collection("demo", 1).await;
        write_version(&store, "demo", 1).await.unwrap();
        let version = ensure_current_schema(&store, "demo").await.unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
        assert!(store.has_payload_index("demo", "relative_path").await.unwrap());
    }
}
