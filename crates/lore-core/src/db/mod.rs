//! Database backend abstraction.
//!
//! Application code programs against the [`Database`] capability and writes
//! SQL in one dialect (positional `?`, `INSERT OR IGNORE`,
//! `ON CONFLICT ... DO UPDATE`, `json_extract`). Backends that speak a
//! different dialect translate at execute time and implement the specialized
//! methods (FTS, vectors, maintenance) natively:
//!
//! - [`SqliteBackend`]: embedded single file, FTS5 + blob vectors
//! - `PostgresBackend` (feature `postgres`): tsvector/GIN FTS + pgvector KNN

mod queries;
mod schema;
mod sqlite;

#[cfg(feature = "postgres")]
mod postgres;

pub use queries::{
    delete_entry_cascade, get_all_active_entry_ids, get_db_stats, get_entry, get_versions,
    insert_entry, insert_version, next_entry_id, row_to_entry, touch_accessed, update_entry,
    DbStats,
};
pub use schema::{GRAPH_SCHEMA_SQL, INGEST_SCHEMA_SQL, SCHEMA_SQL};
pub use sqlite::SqliteBackend;

#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;

use async_trait::async_trait;
use std::sync::Arc;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Database error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// SQLite error
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// PostgreSQL error
    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    /// Connection pool error
    #[cfg(feature = "postgres")]
    #[error("connection pool error: {0}")]
    Pool(String),
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Initialization error
    #[error("initialization error: {0}")]
    Init(String),
}

/// Database result type
pub type DbResult<T> = std::result::Result<T, DbError>;

/// Shared handle to a backend
pub type Db = Arc<dyn Database>;

// ============================================================================
// PARAMETERS AND ROWS
// ============================================================================

/// A positional SQL parameter or column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Text content, when this value is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content; real values are truncated.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            SqlValue::Real(f) => Some(*f as i64),
            _ => None,
        }
    }

    /// Float content; integers are widened.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            SqlValue::Real(f) => Some(*f),
            SqlValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            SqlValue::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&String> for SqlValue {
    fn from(v: &String) -> Self {
        SqlValue::Text(v.clone())
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Integer(v as i64)
    }
}

impl From<usize> for SqlValue {
    fn from(v: usize) -> Self {
        SqlValue::Integer(v as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Integer(v as i64)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Blob(v)
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => SqlValue::Null,
        }
    }
}

/// Build a positional parameter array from mixed value types.
#[macro_export]
macro_rules! sql_params {
    ($($v:expr),* $(,)?) => {
        [$($crate::db::SqlValue::from($v)),*]
    };
}

/// A result row supporting both named and positional access.
#[derive(Debug, Clone)]
pub struct SqlRow {
    columns: Arc<Vec<String>>,
    values: Vec<SqlValue>,
}

impl SqlRow {
    pub fn new(columns: Arc<Vec<String>>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Value at a position, if present.
    pub fn value_at(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    /// Value by column name, if the column exists.
    pub fn value(&self, name: &str) -> Option<&SqlValue> {
        let idx = self.columns.iter().position(|c| c == name)?;
        self.values.get(idx)
    }

    /// Non-null text by column name.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.value(name).and_then(SqlValue::as_text)
    }

    /// Non-null integer by column name.
    pub fn integer(&self, name: &str) -> Option<i64> {
        self.value(name).and_then(SqlValue::as_integer)
    }

    /// Non-null float by column name.
    pub fn real(&self, name: &str) -> Option<f64> {
        self.value(name).and_then(SqlValue::as_real)
    }
}

/// Outcome of a single statement: result rows plus the affected-row count
/// (-1 for queries, where the notion does not apply).
#[derive(Debug, Default)]
pub struct ExecResult {
    pub rows: Vec<SqlRow>,
    pub rowcount: i64,
}

impl ExecResult {
    /// First row, consuming the result.
    pub fn into_first(self) -> Option<SqlRow> {
        self.rows.into_iter().next()
    }
}

// ============================================================================
// FTS FILTERS
// ============================================================================

/// Optional filters applied to full-text search.
#[derive(Debug, Clone, Default)]
pub struct FtsFilters {
    pub project_ref: Option<String>,
    pub entry_type: Option<String>,
    pub tags: Option<Vec<String>>,
}

// ============================================================================
// DATABASE CAPABILITY
// ============================================================================

/// Async database backend.
///
/// Every mutating call is durable once [`Database::commit`] returns; this is
/// a single-writer system, so callers commit eagerly after each logical
/// mutation. Reads never open an explicit transaction.
#[async_trait]
pub trait Database: Send + Sync {
    /// Execute a single SQL statement with positional parameters.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<ExecResult>;

    /// Execute a SQL statement once per parameter set.
    async fn execute_many(&self, sql: &str, params_seq: &[Vec<SqlValue>]) -> DbResult<()>;

    /// Execute multiple SQL statements (DDL, migrations, VACUUM).
    async fn execute_script(&self, sql: &str) -> DbResult<()>;

    /// Commit the current transaction, if one is open.
    async fn commit(&self) -> DbResult<()>;

    /// Close the backend, releasing connections.
    async fn close(&self) -> DbResult<()>;

    /// Full-text search over active entries.
    ///
    /// Returns `(entry_id, score)` pairs where score < 0 and more negative
    /// is a better match, regardless of the underlying engine.
    async fn fts_search(
        &self,
        query: &str,
        filters: &FtsFilters,
        limit: i64,
    ) -> DbResult<Vec<(String, f64)>>;

    /// Upsert an entry's embedding (one row per entry).
    async fn vector_store(&self, entry_id: &str, embedding: &[f32]) -> DbResult<()>;

    /// KNN search. Returns `(entry_id, distance)` pairs; distance is
    /// non-negative and lower is better.
    async fn vector_search(&self, embedding: &[f32], limit: i64) -> DbResult<Vec<(String, f64)>>;

    /// Delete an entry's embedding.
    async fn vector_delete(&self, entry_id: &str) -> DbResult<()>;

    /// Remove all LLM-provenance edges originating at an entry.
    async fn delete_llm_edges(&self, entry_id: &str) -> DbResult<()>;

    /// Optimize the database. Returns a human-readable status line.
    async fn vacuum(&self) -> DbResult<String>;

    /// Apply the full schema; idempotent. The embedding dimension is fixed
    /// here and immutable afterwards.
    async fn apply_schema(&self, embedding_dim: usize) -> DbResult<()>;
}

// ============================================================================
// VECTOR HELPERS
// ============================================================================

/// Pack an embedding as little-endian f32 bytes for blob storage.
pub fn serialize_f32(vec: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Unpack a little-endian f32 blob. Trailing partial floats are dropped.
pub fn deserialize_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine distance in [0, 2]; lower is a better match. Mismatched or zero
/// vectors yield the maximum distance.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 2.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_round_trip() {
        let vec = vec![0.5f32, -1.25, 3.0];
        let bytes = serialize_f32(&vec);
        assert_eq!(bytes.len(), 12);
        assert_eq!(deserialize_f32(&bytes), vec);
    }

    #[test]
    fn test_cosine_distance_identity() {
        let v = vec![0.1f32, 0.2, 0.7];
        assert!(cosine_distance(&v, &v) < 1e-6);
    }

    #[test]
    fn test_cosine_distance_orthogonal() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!((cosine_distance(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_mismatch() {
        assert_eq!(cosine_distance(&[1.0], &[1.0, 2.0]), 2.0);
        assert_eq!(cosine_distance(&[], &[]), 2.0);
    }

    #[test]
    fn test_sql_value_conversions() {
        assert_eq!(SqlValue::from("x"), SqlValue::Text("x".into()));
        assert_eq!(SqlValue::from(true), SqlValue::Integer(1));
        assert_eq!(SqlValue::from(Option::<String>::None), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(3i64)), SqlValue::Integer(3));
    }

    #[test]
    fn test_row_access() {
        let cols = Arc::new(vec!["id".to_string(), "score".to_string()]);
        let row = SqlRow::new(
            cols,
            vec![SqlValue::Text("kb-00001".into()), SqlValue::Real(-1.5)],
        );
        assert_eq!(row.text("id"), Some("kb-00001"));
        assert_eq!(row.real("score"), Some(-1.5));
        assert_eq!(row.text("missing"), None);
        assert_eq!(row.value_at(0).and_then(SqlValue::as_text), Some("kb-00001"));
    }
}
