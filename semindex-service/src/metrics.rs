//! Metrics response types and the GET /metrics handler.

use crate::state::SharedState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::Ordering;

#[derive(Serialize)]
pub struct MetricsResponse {
    pub performance: PerformanceMetrics,
    pub collections: HashMap<String, CollectionMetrics>,
}

#[derive(Serialize)]
pub struct PerformanceMetrics {
    pub queries: u64,
    pub avg_query_ms: u64,
    pub index_runs: u64,
    pub index_failures: u64,
}

#[derive(Serialize)]
pub struct CollectionMetrics {
    pub pipeline: semindex_core::PipelineStats,
    pub last_indexed_at: Option<i64>,
}

pub async fn metrics(State(state): State<SharedState>) -> Json<MetricsResponse> {
    let queries = state.metrics.queries.load(Ordering::Relaxed);
    let total_query_ms = state.metrics.total_query_ms.load(Ordering::Relaxed);
    let index_runs = state.metrics.index_runs.load(Ordering::Relaxed);
    let index_failures = state.metrics.index_failures.load(Ordering::Relaxed);

    let avg_query_ms = if queries > 0 { total_query_ms / queries } else { 0 };

    let registrations: Vec<(String, Option<i64>)> = {
        let collections = state.collections.read().await;
        collections
            .iter()
            .map(|(name, reg)| (name.clone(), reg.last_indexed_at))
            .collect()
    };

    let pipelines = state.pipelines.read().await;
    let collections = registrations
        .into_iter()
        .map(|(name, last_indexed_at)| {
            let pipeline = pipelines.get(&name).map(|p| p.stats()).unwrap_or_default();
            (name, CollectionMetrics { pipeline, last_indexed_at })
        })
        .collect();

    Json(MetricsResponse {
        performance: PerformanceMetrics { queries, avg_query_ms, index_runs, index_failures },
        collections,
    })
}
