//! Vector similarity adapter.

use tracing::warn;

use crate::embeddings::EmbeddingClient;

/// KNN search by embedding the query text.
///
/// Returns `(entry_id, distance)` pairs where lower distance is a better
/// match. Empty when the embedding service is unavailable or the search
/// fails.
pub async fn vector_search(
    embedder: &EmbeddingClient,
    query: &str,
    limit: i64,
) -> Vec<(String, f64)> {
    if query.trim().is_empty() {
        return Vec::new();
    }
    let Some(embedding) = embedder.embed_query(query).await else {
        return Vec::new();
    };
    match embedder.search_similar(&embedding, limit).await {
        Ok(hits) => hits,
        Err(err) => {
            warn!("vector search failed: {err}");
            Vec::new()
        }
    }
}
