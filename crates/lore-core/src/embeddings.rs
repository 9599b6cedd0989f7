//! Embedding client with graceful degradation.
//!
//! Wraps an Ollama-style embedding service over HTTP and persists vectors
//! through the database backend. Availability is cached only on success:
//! any failure clears the cache so the next call re-probes, and callers
//! degrade to FTS-only retrieval while the service is down.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;
use tracing::warn;

use crate::config;
use crate::db::{Database, Db, DbResult};

/// Capacity of the query-embedding cache; repeated searches skip the
/// embedding round trip.
const QUERY_CACHE_SIZE: usize = 100;

/// Generates embeddings via an HTTP service and stores them as vectors.
pub struct EmbeddingClient {
    db: Db,
    http: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
    /// Only `Some(true)` is ever cached; failures reset to `None`
    available: Mutex<Option<bool>>,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl EmbeddingClient {
    /// Client configured from the environment.
    pub fn new(db: Db) -> Self {
        Self::with_endpoint(
            db,
            config::ollama_url(),
            config::embedding_model(),
            Duration::from_secs_f64(config::ollama_timeout()),
        )
    }

    /// Client against an explicit endpoint (tests, alternate services).
    pub fn with_endpoint(db: Db, base_url: String, model: String, timeout: Duration) -> Self {
        Self {
            db,
            http: reqwest::Client::new(),
            base_url,
            model,
            timeout,
            available: Mutex::new(None),
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_SIZE).expect("cache size is non-zero"),
            )),
        }
    }

    fn cache_availability(&self, value: Option<bool>) {
        if let Ok(mut guard) = self.available.lock() {
            *guard = value;
        }
    }

    /// Check if the embedding service is reachable. Only caches success;
    /// retries on failure.
    pub async fn is_available(&self) -> bool {
        if let Ok(guard) = self.available.lock() {
            if *guard == Some(true) {
                return true;
            }
        }
        let probe = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.timeout)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());
        match probe {
            Ok(_) => {
                self.cache_availability(Some(true));
                true
            }
            Err(_) => {
                warn!("embedding service not available - vector search disabled");
                self.cache_availability(None);
                false
            }
        }
    }

    /// Generate an embedding for the given text. `None` when the service
    /// is unavailable or the call fails.
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        if !self.is_available().await {
            return None;
        }
        let payload = serde_json::json!({
            "model": self.model,
            "input": text,
        });
        let response = self
            .http
            .post(format!("{}/api/embed", self.base_url))
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        let body: serde_json::Value = match response {
            Ok(resp) => match resp.json().await {
                Ok(body) => body,
                Err(err) => {
                    warn!("embedding response was not JSON: {err}");
                    self.cache_availability(None);
                    return None;
                }
            },
            Err(err) => {
                warn!("embedding generation failed: {err}");
                self.cache_availability(None);
                return None;
            }
        };

        // /api/embed returns {"embeddings": [[...]]}
        let vector: Option<Vec<f32>> = body
            .get("embeddings")
            .and_then(|e| e.get(0))
            .and_then(|v| v.as_array())
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_f64())
                    .map(|v| v as f32)
                    .collect()
            });
        if vector.is_none() {
            warn!("embedding response had no embeddings array");
            self.cache_availability(None);
        }
        vector
    }

    /// Embed a search query through the LRU cache.
    pub async fn embed_query(&self, text: &str) -> Option<Vec<f32>> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(hit) = cache.get(text) {
                return Some(hit.clone());
            }
        }
        let vector = self.embed(text).await?;
        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(text.to_string(), vector.clone());
        }
        Some(vector)
    }

    /// Persist an entry's embedding (upsert).
    pub async fn store_embedding(&self, entry_id: &str, embedding: &[f32]) -> DbResult<()> {
        self.db.vector_store(entry_id, embedding).await?;
        self.db.commit().await
    }

    /// Find similar entries by vector distance.
    pub async fn search_similar(
        &self,
        query_embedding: &[f32],
        limit: i64,
    ) -> DbResult<Vec<(String, f64)>> {
        self.db.vector_search(query_embedding, limit).await
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteBackend;
    use std::sync::Arc;

    fn unreachable_client() -> EmbeddingClient {
        let db = SqliteBackend::open_in_memory().unwrap();
        EmbeddingClient::with_endpoint(
            Arc::new(db),
            // Reserved port on localhost; connections fail fast
            "http://127.0.0.1:1".to_string(),
            "test-model".to_string(),
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn test_unavailable_service_degrades() {
        let client = unreachable_client();
        assert!(!client.is_available().await);
        assert!(client.embed("some text").await.is_none());
        // Failure never caches availability
        assert_eq!(*client.available.lock().unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_and_search_round_trip() {
        let db = Arc::new(SqliteBackend::open_in_memory().unwrap());
        db.apply_schema(3).await.unwrap();
        let client = EmbeddingClient::with_endpoint(
            db,
            "http://127.0.0.1:1".to_string(),
            "test-model".to_string(),
            Duration::from_millis(200),
        );

        client.store_embedding("kb-00001", &[1.0, 0.0, 0.0]).await.unwrap();
        let hits = client.search_similar(&[1.0, 0.0, 0.0], 5).await.unwrap();
        assert_eq!(hits[0].0, "kb-00001");
    }
}
