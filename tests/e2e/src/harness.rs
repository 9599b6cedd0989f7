//! Test database manager.
//!
//! Provides isolated embedded databases for tests: a temporary directory
//! per instance, schema applied, with seeding helpers. The directory is
//! removed when the harness drops.

use std::sync::Arc;
use std::time::Duration;

use lore_core::db::{Database, Db, SqliteBackend};
use lore_core::embeddings::EmbeddingClient;
use lore_core::graph::{GraphBuilder, GraphEnricher};
use lore_core::llm::Llm;
use lore_core::model::{EntryType, KnowledgeEntry};
use lore_core::store::{EntryStore, NewEntry};
use lore_mcp::state::AppState;
use tempfile::TempDir;

use crate::mocks::ScriptedLlm;

/// An isolated knowledge base over a temp-dir database file.
pub struct TestDb {
    pub db: Db,
    pub store: EntryStore,
    /// Kept alive so the directory outlives the test
    _temp_dir: TempDir,
}

impl TestDb {
    /// Create a fresh database with the schema applied.
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("temp directory");
        let path = temp_dir.path().join("test_lore.db");
        let backend = SqliteBackend::open(&path).expect("test database");
        let db: Db = Arc::new(backend);
        db.apply_schema(4).await.expect("schema applies");
        let store = EntryStore::new(db.clone());
        Self {
            db,
            store,
            _temp_dir: temp_dir,
        }
    }

    /// An embedding client pointed at a dead endpoint: storage paths work,
    /// embedding generation degrades to unavailable.
    pub fn offline_embedder(&self) -> Arc<EmbeddingClient> {
        Arc::new(EmbeddingClient::with_endpoint(
            self.db.clone(),
            "http://127.0.0.1:1".to_string(),
            "test-model".to_string(),
            Duration::from_millis(100),
        ))
    }

    /// Full server state over this database with scripted LLMs.
    pub fn app_state(&self, extract_llm: Option<Llm>, query_llm: Option<Llm>) -> AppState {
        let enricher = extract_llm
            .clone()
            .map(|llm| Arc::new(GraphEnricher::new(self.db.clone(), llm)));
        AppState {
            db: self.db.clone(),
            store: self.store.clone(),
            embedder: self.offline_embedder(),
            extract_llm,
            query_llm,
            enricher,
        }
    }

    /// Server state with no LLM at all (pure search/storage paths).
    pub fn app_state_offline(&self) -> AppState {
        self.app_state(None, None)
    }

    /// Server state where both LLM roles share one scripted provider.
    pub fn app_state_scripted(&self, llm: Arc<ScriptedLlm>) -> AppState {
        self.app_state(Some(llm.clone()), Some(llm))
    }

    /// Create an entry and build its deterministic graph edges, the way
    /// the kb_store tool would.
    pub async fn seed_entry(&self, new: NewEntry) -> KnowledgeEntry {
        let entry = self.store.create_entry(new).await.expect("entry creates");
        GraphBuilder::new(self.db.clone())
            .build_for_entry(&entry)
            .await
            .expect("graph builds");
        entry
    }

    /// Seed a batch of plainly-titled entries, returning their IDs.
    pub async fn seed_numbered(&self, count: usize, entry_type: EntryType) -> Vec<String> {
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            let entry = self
                .seed_entry(NewEntry {
                    short_title: format!("seeded entry {i}"),
                    long_title: format!("seeded entry number {i}"),
                    knowledge_details: format!("details for seeded entry {i}"),
                    entry_type,
                    tags: vec![format!("seed-{}", i % 3)],
                    ..Default::default()
                })
                .await;
            ids.push(entry.id);
        }
        ids
    }
}
