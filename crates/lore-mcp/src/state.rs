//! Shared server state: backend, store, clients, enricher.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use lore_core::config;
use lore_core::db::{Database, Db, SqliteBackend};
use lore_core::embeddings::EmbeddingClient;
use lore_core::graph::{GraphBuilder, GraphEnricher};
use lore_core::ingest::FileIngester;
use lore_core::llm::{create_provider, Llm};
use lore_core::store::EntryStore;

/// Everything a tool handler needs. Handlers themselves are stateless;
/// this is shared for the lifetime of the process.
pub struct AppState {
    pub db: Db,
    pub store: EntryStore,
    pub embedder: Arc<EmbeddingClient>,
    /// LLM used by ingestion and enrichment
    pub extract_llm: Option<Llm>,
    /// LLM used by planning and synthesis
    pub query_llm: Option<Llm>,
    /// Enricher with its per-process vocabulary cache
    pub enricher: Option<Arc<GraphEnricher>>,
}

impl AppState {
    /// Open the configured backend, apply the schema, and wire up clients.
    pub async fn init(data_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let db: Db = match config::db_url() {
            #[cfg(feature = "postgres")]
            Some(url) => {
                info!("connecting to remote database");
                Arc::new(
                    lore_core::db::PostgresBackend::connect(&url)
                        .await
                        .context("connecting to KB_DB_URL")?,
                )
            }
            #[cfg(not(feature = "postgres"))]
            Some(_) => {
                anyhow::bail!(
                    "KB_DB_URL is set but this build lacks the 'postgres' feature"
                );
            }
            None => {
                let path = match data_dir {
                    Some(dir) => dir.join("knowledge.db"),
                    None => config::db_path(),
                };
                info!("opening database at {}", path.display());
                Arc::new(SqliteBackend::open(&path).context("opening database")?)
            }
        };
        db.apply_schema(config::embedding_dim())
            .await
            .context("applying schema")?;

        let store = EntryStore::new(db.clone());
        let embedder = Arc::new(EmbeddingClient::new(db.clone()));

        // Pre-check embedding availability (non-blocking, just logs)
        if embedder.is_available().await {
            info!("embedding service available - vector search enabled");
        } else {
            warn!("embedding service unavailable - FTS-only mode");
        }

        let extract_llm = create_provider(&config::extract_provider());
        let query_llm = create_provider(&config::query_provider());
        let enricher = extract_llm
            .clone()
            .map(|llm| Arc::new(GraphEnricher::new(db.clone(), llm)));

        Ok(Self {
            db,
            store,
            embedder,
            extract_llm,
            query_llm,
            enricher,
        })
    }

    /// A fresh graph builder over the shared backend.
    pub fn builder(&self) -> GraphBuilder {
        GraphBuilder::new(self.db.clone())
    }

    /// A file ingester, when an extraction LLM is configured.
    pub fn ingester(&self) -> Option<FileIngester> {
        let llm = self.extract_llm.clone()?;
        Some(FileIngester::new(
            self.db.clone(),
            self.store.clone(),
            self.embedder.clone(),
            self.builder(),
            self.enricher.clone(),
            llm,
        ))
    }
}
