//! Query engine: filter assembly, overfetch policy, client-side glob
//! post-filter, and rerank presets.

use crate::external::{Condition, Filter, VectorStore};
use crate::Result;
use globset::GlobBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default)]
    pub path_pattern: Option<String>,
    #[serde(default)]
    pub documentation_only: bool,
    #[serde(default)]
    pub score_threshold: Option<f32>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub modified_after: Option<i64>,
    #[serde(default)]
    pub modified_before: Option<i64>,
    #[serde(default)]
    pub min_age_days: Option<u32>,
    #[serde(default)]
    pub max_age_days: Option<u32>,
    #[serde(default)]
    pub min_commit_count: Option<u32>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub rerank: RerankOption,
    #[serde(default)]
    pub use_hybrid: bool,
}

fn default_limit() -> usize {
    5
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankOption {
    #[default]
    Relevance,
    Preset(RerankPreset),
    Custom(RerankWeights),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RerankPreset {
    Recent,
    Stable,
    TechDebt,
    Hotspots,
    CodeReview,
    Onboarding,
    SecurityAudit,
    Refactoring,
    Ownership,
    ImpactAnalysis,
}

/// Weights applied to the normalized feature vector
/// `[similarity, recency, churn, age, documentation, import_overlap]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RerankWeights {
    pub similarity: f32,
    pub recency: f32,
    pub churn: f32,
    pub age: f32,
    pub documentation: f32,
    pub import_overlap: f32,
}

impl RerankPreset {
    pub fn weights(self) -> RerankWeights {
        match self {
            RerankPreset::Recent => RerankWeights { similarity: 0.5, recency: 0.4, churn: 0.0, age: -0.1, documentation: 0.0, import_overlap: 0.0 },
            RerankPreset::Stable => RerankWeights { similarity: 0.5, recency: -0.1, churn: -0.3, age: 0.1, documentation: 0.0, import_overlap: 0.0 },
            RerankPreset::TechDebt => RerankWeights { similarity: 0.3, recency: 0.0, churn: 0.4, age: 0.3, documentation: 0.0, import_overlap: 0.0 },
            RerankPreset::Hotspots => RerankWeights { similarity: 0.3, recency: 0.2, churn: 0.5, age: 0.0, documentation: 0.0, import_overlap: 0.0 },
            RerankPreset::CodeReview => RerankWeights { similarity: 0.4, recency: 0.4, churn: 0.2, age: 0.0, documentation: 0.0, import_overlap: 0.0 },
            RerankPreset::Onboarding => RerankWeights { similarity: 0.4, recency: 0.0, churn: 0.0, age: -0.1, documentation: 0.5, import_overlap: 0.0 },
            RerankPreset::SecurityAudit => RerankWeights { similarity: 0.4, recency: 0.1, churn: 0.3, age: 0.0, documentation: 0.0, import_overlap: 0.2 },
            RerankPreset::Refactoring => RerankWeights { similarity: 0.3, recency: 0.1, churn: 0.3, age: 0.1, documentation: 0.0, import_overlap: 0.2 },
            RerankPreset::Ownership => RerankWeights { similarity: 0.3, recency: 0.2, churn: 0.2, age: 0.0, documentation: 0.0, import_overlap: 0.0 },
            RerankPreset::ImpactAnalysis => RerankWeights { similarity: 0.3, recency: 0.1, churn: 0.2, age: 0.0, documentation: 0.0, import_overlap: 0.4 },
        }
    }
}

pub const RELEVANCE_WEIGHTS: RerankWeights = RerankWeights {
    similarity: 1.0,
    recency: 0.0,
    churn: 0.0,
    age: 0.0,
    documentation: 0.0,
    import_overlap: 0.0,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub id: String,
    pub score: f32,
    pub relative_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub language: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub imports: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<serde_json::Value>,
}

/// Assembles the server-side filter from query options, not including
/// `path_pattern` (applied client-side after fetch) or `rerank`.
pub fn build_filter(options: &QueryOptions) -> Filter {
    let mut must = Vec::new();

    if !options.file_types.is_empty() {
        must.push(Condition::MatchAny {
            key: "file_extension".to_string(),
            any: options.file_types.iter().map(|t| serde_json::json!(t)).collect(),
        });
    }
    if options.documentation_only {
        must.push(Condition::Match {
            key: "is_documentation".to_string(),
            value: serde_json::json!(true),
        });
    }
    if let Some(author) = &options.author {
        must.push(Condition::Match {
            key: "git.dominant_author".to_string(),
            value: serde_json::json!(author),
        });
    }
    if options.modified_after.is_some() || options.modified_before.is_some() {
        must.push(Condition::Range {
            key: "git.last_modified_at".to_string(),
            gte: options.modified_after.map(|s| s as f64),
            lte: options.modified_before.map(|s| s as f64),
        });
    }
    if options.min_age_days.is_some() || options.max_age_days.is_some() {
        must.push(Condition::Range {
            key: "git.age_days".to_string(),
            gte: options.min_age_days.map(|a| a as f64),
            lte: options.max_age_days.map(|a| a as f64),
        });
    }
    if let Some(min_commits) = options.min_commit_count {
        must.push(Condition::Range {
            key: "git.commit_count".to_string(),
            gte: Some(min_commits as f64),
            lte: None,
        });
    }
    if let Some(task_id) = &options.task_id {
        must.push(Condition::Match {
            key: "git.task_ids".to_string(),
            value: serde_json::json!(task_id),
        });
    }

    Filter { must, should: vec![], must_not: vec![] }
}

/// `limit * overfetch_multiplier` when glob post-filtering or reranking is
/// requested, else just `limit`.
pub fn fetch_limit(options: &QueryOptions, overfetch_multiplier: usize) -> usize {
    let needs_overfetch = options.path_pattern.is_some() || !matches!(options.rerank, RerankOption::Relevance);
    if needs_overfetch {
        options.limit * overfetch_multiplier.max(1)
    } else {
        options.limit
    }
}

/// Bash-mode glob with brace expansion, applied client-side against
/// `relative_path`.
pub fn matches_path_pattern(relative_path: &str, pattern: &str) -> bool {
    let glob = match GlobBuilder::new(pattern).literal_separator(false).build() {
        Ok(g) => g,
        Err(_) => return false,
    };
    glob.compile_matcher().is_match(relative_path)
}

fn normalize(values: &[f32]) -> Vec<f32> {
    let max = values.iter().cloned().fold(f32::MIN, f32::max);
    let min = values.iter().cloned().fold(f32::MAX, f32::min);
    if (max - min).abs() < f32::EPSILON {
        return values.iter().map(|_| 1.0).collect();
    }
    values.iter().map(|v| (v - min) / (max - min)).collect()
}

fn feature_vector(hit: &crate::external::SearchHit, query_imports: &[String]) -> [f32; 5] {
    let payload = &hit.payload;
    let recency = payload
        .get("git")
        .and_then(|g| g.get("last_modified_at"))
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0) as f32;
    let churn = payload
        .get("git")
        .and_then(|g| g.get("commit_count"))
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0) as f32;
    let age = payload
        .get("git")
        .and_then(|g| g.get("age_days"))
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0) as f32;
    let documentation = if payload.get("is_documentation").and_then(|v| v.as_bool()).unwrap_or(false) {
        1.0
    } else {
        0.0
    };
    let imports: Vec<String> = payload
        .get("imports")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();
    let overlap = if query_imports.is_empty() {
        0.0
    } else {
        let shared = imports.iter().filter(|i| query_imports.contains(i)).count();
        shared as f32 / query_imports.len() as f32
    };
    [recency, churn, age, documentation, overlap]
}

/// Re-scores `hits` by a weighted combination of normalized similarity and
/// payload-derived features, returning results sorted by final score.
pub fn rerank(
    mut hits: Vec<crate::external::SearchHit>,
    weights: RerankWeights,
    query_imports: &[String],
) -> Vec<crate::external::SearchHit> {
    if hits.is_empty() {
        return hits;
    }
    let similarities: Vec<f32> = hits.iter().map(|h| h.score).collect();
    let features: Vec<[f32; 5]> = hits.iter().map(|h| feature_vector(h, query_imports)).collect();

    let norm_similarity = normalize(&similarities);
    let recency: Vec<f32> = normalize(&features.iter().map(|f| f[0]).collect::<Vec<_>>());
    let churn: Vec<f32> = normalize(&features.iter().map(|f| f[1]).collect::<Vec<_>>());
    let age: Vec<f32> = normalize(&features.iter().map(|f| f[2]).collect::<Vec<_>>());
    let documentation: Vec<f32> = features.iter().map(|f| f[3]).collect();
    let import_overlap: Vec<f32> = features.iter().map(|f| f[4]).collect();

    let mut scored: Vec<(f32, crate::external::SearchHit)> = (0..hits.len())
        .map(|i| {
            let score = weights.similarity * norm_similarity[i]
                + weights.recency * recency[i]
                + weights.churn * churn[i]
                + weights.age * age[i]
                + weights.documentation * documentation[i]
                + weights.import_overlap * import_overlap[i];
            (score, hits[i].clone())
        })
        .collect();
    hits.clear();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().map(|(_, hit)| hit).collect()
}

fn project_result(hit: &crate::external::SearchHit) -> QueryResult {
    let payload = &hit.payload;
    QueryResult {
        id: hit.id.clone(),
        score: hit.score,
        relative_path: payload.get("relative_path").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        start_line: payload.get("start_line").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
        end_line: payload.get("end_line").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
        language: payload.get("language").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        content: payload.get("content").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        chunk_type: payload.get("chunk_type").and_then(|v| v.as_str()).map(String::from),
        imports: payload
            .get("imports")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default(),
        git: payload.get("git").cloned(),
    }
}

/// Runs the full query algorithm against a collection: assemble filter,
/// overfetch, embed, search, glob post-filter, rerank, threshold, truncate.
pub async fn run_query(
    store: &Arc<dyn VectorStore>,
    embedder: &Arc<dyn crate::external::EmbeddingProvider>,
    collection: &str,
    query_text: &str,
    options: &QueryOptions,
    overfetch_multiplier: usize,
) -> Result<Vec<QueryResult>> {
    if !store.collection_exists(collection).await? {
        return Err(crate::SemIndexError::NotIndexed);
    }

    let filter = build_filter(options);
    let limit = fetch_limit(options, overfetch_multiplier);
    let embedding = embedder.embed(query_text).await?;

    let mut hits = store.search(collection, &embedding.vector, limit, &filter).await?;

    if let Some(pattern) = &options.path_pattern {
        hits.retain(|h| {
            h.payload
                .get("relative_path")
                .and_then(|v| v.as_str())
                .is_some_and(|p| matches_path_pattern(p, pattern))
        });
    }

    let query_imports: Vec<String> = query_text
        .split_whitespace()
        .filter(|w| w.contains("::") || w.contains('.'))
        .map(String::from)
        .collect();

    hits = match &options.rerank {
        RerankOption::Relevance => hits,
        RerankOption::Preset(preset) => rerank(hits, preset.weights(), &query_imports),
        RerankOption::Custom(weights) => rerank(hits, *weights, &query_imports),
    };

    if let Some(threshold) = options.score_threshold {
        hits.retain(|h| h.score >= threshold);
    }

    hits.truncate(options.limit);
    Ok(hits.iter().map(project_result).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::SearchHit;

    fn hit(id: &str, score: f32, payload: serde_json::Value) -> SearchHit {
        SearchHit { id: id.to_string(), score, payload }
    }

    #[test]
    fn build_filter_includes_file_types_as_match_any() {
        let options = QueryOptions {
            file_types: vec!["rs".to_string(), "py".to_string()],
            ..Default::default()
        };
        let filter = build_filter(&options);
        assert_eq!(filter.must.len(), 1);
        assert!(matches!(&filter.must[0], Condition::MatchAny { key, .. } if key == "file_extension"));
    }

    #[test]
    fn build_filter_includes_documentation_only() {
        let options = QueryOptions { documentation_only: true, ..Default::default() };
        let filter = build_filter(&options);
        assert!(matches!(&filter.must[0], Condition::Match { key, .. } if key == "is_documentation"));
    }

    #[test]
    fn fetch_limit_applies_overfetch_with_path_pattern() {
        let options = QueryOptions {
            limit: 5,
            path_pattern: Some("**/*.rs".to_string()),
            ..Default::default()
        };
        assert_eq!(fetch_limit(&options, 3), 15);
    }

    #[test]
    fn fetch_limit_is_plain_limit_without_overfetch_triggers() {
        let options = QueryOptions { limit: 5, ..Default::default() };
        assert_eq!(fetch_limit(&options, 3), 5);
    }

    #[test]
    fn matches_path_pattern_supports_brace_expansion() {
        assert!(matches_path_pattern("src/main.rs", "**/*.{rs,py}"));
        assert!(!matches_path_pattern("src/main.go", "**/*.{rs,py}"));
    }

    #[test]
    fn rerank_recent_preset_favors_recently_modified() {
        let hits = vec![
            hit("old", 0.9, serde_json::json!({"git": {"last_modified_at": 100}})),
            hit("new", 0.85, serde_json::json!({"git": {"last_modified_at": 1_000_000}})),
        ];
        let reranked = rerank(hits, RerankPreset::Recent.weights(), &[]);
        assert_eq!(reranked[0].id, "new");
    }

    #[test]
    fn rerank_relevance_weights_preserve_similarity_order() {
        let hits = vec![
            hit("a", 0.5, serde_json::json!({})),
            hit("b", 0.9, serde_json::json!({})),
        ];
        let reranked = rerank(hits, RELEVANCE_WEIGHTS, &[]);
        assert_eq!(reranked[0].id, "b");
    }

    #[test]
    fn project_result_extracts_payload_fields() {
        let h = hit(
            "1",
            0.75,
            serde_json::json!({"relative_path": "a.rs", "start_line": 1, "end_line": 2, "language": "rust", "content": "fn a() {}"}),
        );
        let result = project_result(&h);
        assert_eq!(result.relative_path, "a.rs");
        assert_eq!(result.start_line, 1);
    }
}
