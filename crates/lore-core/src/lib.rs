//! # Lore Core
//!
//! Personal knowledge engine for AI coding assistants:
//!
//! - **Entries**: discrete, versioned units of knowledge with typed decay
//! - **Hybrid Search**: FTS5/tsvector BM25 + vector KNN fused with RRF
//! - **Knowledge Graph**: deterministic edges plus LLM-enriched entities
//! - **Ingestion**: safety-gated file ingestion with LLM extraction
//!
//! Storage goes through a narrow async [`db::Database`] capability with two
//! implementations: an embedded single-file SQLite backend and a remote
//! PostgreSQL backend (feature `postgres`).
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lore_core::db::SqliteBackend;
//! use lore_core::store::EntryStore;
//! use lore_core::model::EntryType;
//!
//! let db = std::sync::Arc::new(SqliteBackend::open("knowledge.db")?);
//! db.apply_schema(1024).await?;
//!
//! let store = EntryStore::new(db.clone());
//! let entry = store
//!     .create_entry(NewEntry {
//!         short_title: "WAL mode".into(),
//!         long_title: "SQLite WAL mode allows concurrent readers".into(),
//!         knowledge_details: "Enable with PRAGMA journal_mode=WAL.".into(),
//!         entry_type: EntryType::FactualReference,
//!         ..Default::default()
//!     })
//!     .await?;
//! ```

// ============================================================================
// MODULES
// ============================================================================

pub mod config;
pub mod confidence;
pub mod db;
pub mod embeddings;
pub mod graph;
pub mod ingest;
pub mod llm;
pub mod model;
pub mod search;
pub mod store;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Storage capability
pub use db::{Database, Db, DbError, DbResult, FtsFilters, SqlRow, SqlValue};

// Entry model
pub use model::{EntryType, KnowledgeEntry, EntryVersion, SearchQuery, SearchResult};

// Entry store
pub use store::{EntryStore, NewEntry, StoreError, UpdateEntry};

// Confidence decay
pub use confidence::{compute_effective_confidence, decay_anchor, staleness_warning};

// Search
pub use search::hybrid_search;

// Graph
pub use graph::{GraphBuilder, GraphEnricher, QueryPlan, QueryPlanner};

// LLM capability
pub use llm::{create_provider, LlmProvider};

// Embeddings
pub use embeddings::EmbeddingClient;

// Ingestion
pub use ingest::{FileIngester, FileResult, IngestResult};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current database schema version
pub const SCHEMA_VERSION: i64 = 1;
