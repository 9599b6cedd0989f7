//! Hybrid ranking via Reciprocal Rank Fusion.
//!
//! FTS and vector rankings each contribute `1/(K + rank)` per entry; the
//! fused order is stable across backends because ties break on entry ID.
//! Results pass through confidence decay, and surviving entries get their
//! `last_accessed` touched so decay resets on use.

use chrono::Utc;
use tracing::debug;

use crate::confidence::{
    compute_effective_confidence, decay_anchor, staleness_warning, STALE_FILTER_THRESHOLD,
};
use crate::db::{self, Database, FtsFilters};
use crate::embeddings::EmbeddingClient;
use crate::model::{SearchQuery, SearchResult};

use super::{fts_search, vector_search};

/// RRF constant - standard value from the literature.
pub const RRF_K: f64 = 60.0;

/// Fuse two rankings with Reciprocal Rank Fusion.
///
/// Each list contributes `1/(k + rank)` per entry with 1-based ranks.
/// Returns `(entry_id, rrf_score)` sorted by descending score; ties break
/// on ascending entry ID so the order is deterministic.
pub fn reciprocal_rank_fusion(
    fts_ranked: &[(String, f64)],
    vec_ranked: &[(String, f64)],
    k: f64,
) -> Vec<(String, f64)> {
    let mut scores: std::collections::HashMap<String, f64> = std::collections::HashMap::new();

    for (rank, (entry_id, _score)) in fts_ranked.iter().enumerate() {
        *scores.entry(entry_id.clone()).or_default() += 1.0 / (k + rank as f64 + 1.0);
    }
    for (rank, (entry_id, _distance)) in vec_ranked.iter().enumerate() {
        *scores.entry(entry_id.clone()).or_default() += 1.0 / (k + rank as f64 + 1.0);
    }

    let mut fused: Vec<(String, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused
}

/// Execute hybrid search combining FTS and vector similarity via RRF.
///
/// Falls back to FTS-only when embeddings are unavailable. Vector search
/// runs without the structured filters; the fused hydration step is where
/// inactive and stale entries drop out.
pub async fn hybrid_search(
    db: &dyn Database,
    embedder: Option<&EmbeddingClient>,
    query: &SearchQuery,
) -> crate::db::DbResult<Vec<SearchResult>> {
    // Over-fetch for re-ranking
    let fetch_limit = (query.limit * 3) as i64;

    let filters = FtsFilters {
        project_ref: query.project_ref.clone(),
        entry_type: query.entry_type.map(|t| t.as_str().to_string()),
        tags: query.tags.clone(),
    };
    let fts_ranked = fts_search(db, &query.query, &filters, fetch_limit).await;

    let mut vec_ranked: Vec<(String, f64)> = Vec::new();
    let mut match_source = "fts";
    if let Some(embedder) = embedder {
        vec_ranked = vector_search(embedder, &query.query, fetch_limit).await;
        if !vec_ranked.is_empty() {
            match_source = "hybrid";
        }
    }

    let fused = reciprocal_rank_fusion(&fts_ranked, &vec_ranked, RRF_K);
    debug!(
        "hybrid search: {} fts, {} vector, {} fused",
        fts_ranked.len(),
        vec_ranked.len(),
        fused.len()
    );

    let now = Utc::now();
    let mut results = Vec::new();
    let mut accessed: Vec<String> = Vec::new();

    for (entry_id, rrf_score) in fused.into_iter().take(query.limit) {
        let Some(entry) = db::get_entry(db, &entry_id).await? else {
            continue;
        };

        let effective = compute_effective_confidence(
            entry.confidence_level,
            entry.entry_type,
            decay_anchor(&entry),
            now,
        );
        if !query.include_stale && effective < STALE_FILTER_THRESHOLD {
            continue;
        }

        let warning = staleness_warning(effective, entry.entry_type);
        accessed.push(entry.id.clone());
        results.push(SearchResult {
            entry,
            score: rrf_score,
            effective_confidence: effective,
            staleness_warning: warning,
            match_source,
        });
    }

    db::touch_accessed(db, &accessed).await?;
    Ok(results)
}

// ============================================================================
// TESTS
// ============================================================================
