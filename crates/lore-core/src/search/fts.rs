//! Full-text search adapter.

use tracing::warn;

use crate::db::{Database, FtsFilters};

/// BM25-style full-text search over active entries.
///
/// Returns `(entry_id, score)` pairs where lower (more negative) scores are
/// better matches. Empty queries return no results; backend failures are
/// logged and produce no results.
pub async fn fts_search(
    db: &dyn Database,
    query: &str,
    filters: &FtsFilters,
    limit: i64,
) -> Vec<(String, f64)> {
    if query.trim().is_empty() {
        return Vec::new();
    }
    match db.fts_search(query, filters, limit).await {
        Ok(hits) => hits,
        Err(err) => {
            warn!("FTS search failed for query '{query}': {err}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteBackend;

    #[tokio::test]
    async fn test_empty_query_is_empty() {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.apply_schema(4).await.unwrap();
        let hits = fts_search(&db, "   ", &FtsFilters::default(), 10).await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_backend_error_is_swallowed() {
        // No schema applied: the FTS table is missing and the query errors
        let db = SqliteBackend::open_in_memory().unwrap();
        let hits = fts_search(&db, "anything", &FtsFilters::default(), 10).await;
        assert!(hits.is_empty());
    }
}
