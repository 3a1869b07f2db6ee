//! HTTP route handlers for the semindex service.

use crate::error::AppError;
use crate::state::{CollectionRegistration, SharedState};
use axum::extract::{Path as AxumPath, State};
use axum::Json;
use semindex_core::query::{run_query, QueryOptions, QueryResult};
use semindex_core::SemIndexError;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

#[derive(Deserialize)]
pub struct RegisterCollectionRequest {
    pub name: String,
    pub codebase_path: String,
}

#[derive(Serialize)]
pub struct RegisterCollectionResponse {
    pub name: String,
    pub registered: bool,
}

pub async fn register_collection(
    State(state): State<SharedState>,
    Json(req): Json<RegisterCollectionRequest>,
) -> Result<Json<RegisterCollectionResponse>, AppError> {
    let mut collections = state.collections.write().await;
    if collections.contains_key(&req.name) {
        return Err(SemIndexError::CollectionExists(req.name).into());
    }
    collections.insert(
        req.name.clone(),
        CollectionRegistration { codebase_path: req.codebase_path, last_indexed_at: None },
    );
    info!(collection = %req.name, "registered collection");
    Ok(Json(RegisterCollectionResponse { name: req.name, registered: true }))
}

#[derive(Deserialize, Default)]
pub struct IndexRequest {
    #[serde(default)]
    pub full: bool,
}

pub async fn index_collection(
    State(state): State<SharedState>,
    AxumPath(name): AxumPath<String>,
    Json(req): Json<IndexRequest>,
) -> Result<Json<semindex_core::RunSummary>, AppError> {
    let codebase_path = {
        let collections = state.collections.read().await;
        collections
            .get(&name)
            .map(|r| r.codebase_path.clone())
            .ok_or_else(|| SemIndexError::CollectionNotFound(name.clone()))?
    };

    let pipeline = state.pipeline_for(&name).await;
    let indexer = state.indexer_for(&name, &codebase_path, pipeline);

    state.metrics.index_runs.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let summary = match indexer.run(req.full).await {
        Ok(summary) => summary,
        Err(err) => {
            state.metrics.index_failures.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return Err(err.into());
        }
    };

    if let Some(registration) = state.collections.write().await.get_mut(&name) {
        registration.last_indexed_at = Some(now_unix());
    }

    info!(collection = %name, files_indexed = summary.files_indexed, status = %summary.status, "index run complete");
    Ok(Json(summary))
}

#[derive(Deserialize)]
pub struct QueryRequest {
    pub collection: String,
    pub query: String,
    #[serde(default)]
    pub options: QueryOptions,
}

pub async fn query(
    State(state): State<SharedState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<Vec<QueryResult>>, AppError> {
    let started = Instant::now();
    let results = run_query(
        &state.store,
        &state.embedder,
        &req.collection,
        &req.query,
        &req.options,
        state.config.query.overfetch_multiplier,
    )
    .await?;
    state.record_query(started.elapsed().as_millis() as u64);
    Ok(Json(results))
}

#[derive(Serialize)]
pub struct CollectionStatusResponse {
    pub name: String,
    pub schema_version: u32,
    pub points_count: u64,
    pub last_indexed_at: Option<i64>,
    pub pipeline: semindex_core::PipelineStats,
}

pub async fn collection_status(
    State(state): State<SharedState>,
    AxumPath(name): AxumPath<String>,
) -> Result<Json<CollectionStatusResponse>, AppError> {
    let last_indexed_at = {
        let collections = state.collections.read().await;
        collections
            .get(&name)
            .map(|r| r.last_indexed_at)
            .ok_or_else(|| SemIndexError::CollectionNotFound(name.clone()))?
    };

    let schema_version = semindex_core::ensure_current_schema(&state.store, &name).await?;
    let info = state.store.get_collection_info(&name).await?;
    let pipeline_stats = state
        .pipelines
        .read()
        .await
        .get(&name)
        .map(|p| p.stats())
        .unwrap_or_default();

    Ok(Json(CollectionStatusResponse {
        name,
        schema_version,
        points_count: info.points_count,
        last_indexed_at,
        pipeline: pipeline_stats,
    }))
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub collections_registered: usize,
}

pub async fn status(State(state): State<SharedState>) -> Json<StatusResponse> {
    let collections_registered = state.collections.read().await.len();
    Json(StatusResponse { status: "ok".to_string(), collections_registered })
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
