//! SQLite backend.
//!
//! Thin wrapper over a mutex-guarded rusqlite connection. Application SQL is
//! already SQLite-flavored, so no translation happens here. Writes open an
//! implicit transaction on first use and stay open until [`commit`]
//! (mirroring the embedded driver semantics the store layer assumes);
//! reads run in autocommit.
//!
//! [`commit`]: crate::db::Database::commit

use async_trait::async_trait;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    cosine_distance, deserialize_f32, serialize_f32, Database, DbError, DbResult, ExecResult,
    FtsFilters, SqlRow, SqlValue,
};
use super::schema::{
    GRAPH_SCHEMA_SQL, INGEST_SCHEMA_SQL, INIT_SEQ_SQL, SCHEMA_SQL, VEC_SCHEMA_SQL,
};
use crate::SCHEMA_VERSION;

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

fn value_ref_to_sql(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(f) => SqlValue::Real(f),
        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
    }
}

/// Convert a natural language query to a safe FTS5 query.
///
/// Wraps each token in quotes to defuse FTS5 syntax characters.
pub(crate) fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "")))
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// BACKEND
// ============================================================================

/// Embedded single-file backend.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteBackend {
    /// Open (or create) a database file and configure the connection.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database (tests and dry runs).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    fn configure(conn: &Connection) -> DbResult<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DbError::Init("connection lock poisoned".to_string()))
    }

    /// Run one statement on a held connection, opening an implicit
    /// transaction before the first write.
    fn run_statement(
        conn: &Connection,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<ExecResult> {
        let mut stmt = conn.prepare(sql)?;
        if !stmt.readonly() && conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
        }

        if stmt.column_count() > 0 {
            let columns: Arc<Vec<String>> = Arc::new(
                stmt.column_names().iter().map(|c| c.to_string()).collect(),
            );
            let mut out = Vec::new();
            let mut rows = stmt.query(params_from_iter(params.iter()))?;
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(columns.len());
                for i in 0..columns.len() {
                    values.push(value_ref_to_sql(row.get_ref(i)?));
                }
                out.push(SqlRow::new(columns.clone(), values));
            }
            Ok(ExecResult {
                rows: out,
                rowcount: -1,
            })
        } else {
            let affected = stmt.execute(params_from_iter(params.iter()))?;
            Ok(ExecResult {
                rows: Vec::new(),
                rowcount: affected as i64,
            })
        }
    }
}

#[async_trait]
impl Database for SqliteBackend {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<ExecResult> {
        let conn = self.conn()?;
        Self::run_statement(&conn, sql, params)
    }

    async fn execute_many(&self, sql: &str, params_seq: &[Vec<SqlValue>]) -> DbResult<()> {
        let conn = self.conn()?;
        for params in params_seq {
            Self::run_statement(&conn, sql, params)?;
        }
        Ok(())
    }

    async fn execute_script(&self, sql: &str) -> DbResult<()> {
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }
        conn.execute_batch(sql)?;
        Ok(())
    }

    async fn commit(&self) -> DbResult<()> {
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    async fn close(&self) -> DbResult<()> {
        self.commit().await
    }

    // -- FTS5 search --

    async fn fts_search(
        &self,
        query: &str,
        filters: &FtsFilters,
        limit: i64,
    ) -> DbResult<Vec<(String, f64)>> {
        let fts_query = escape_fts_query(query);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }

        // bm25 column weights: title > long_title > details > tags
        let mut sql = String::from(
            "SELECT e.id, bm25(knowledge_fts, 4.0, 2.0, 1.0, 0.5) AS score
             FROM knowledge_fts f
             JOIN knowledge_entries e ON e.rowid = f.rowid
             WHERE knowledge_fts MATCH ?
             AND e.is_active = 1",
        );
        let mut params: Vec<SqlValue> = vec![SqlValue::Text(fts_query)];

        if let Some(project) = &filters.project_ref {
            sql.push_str(" AND e.project_ref = ?");
            params.push(SqlValue::Text(project.clone()));
        }
        if let Some(entry_type) = &filters.entry_type {
            sql.push_str(" AND e.entry_type = ?");
            params.push(SqlValue::Text(entry_type.clone()));
        }
        if let Some(tags) = &filters.tags {
            // Tags are stored space-separated; each requested tag must appear
            for tag in tags {
                sql.push_str(" AND (' ' || e.tags || ' ') LIKE ?");
                params.push(SqlValue::Text(format!("% {} %", tag)));
            }
        }

        sql.push_str(" ORDER BY score LIMIT ?");
        params.push(SqlValue::Integer(limit));

        let result = self.execute(&sql, &params).await?;
        Ok(result
            .rows
            .into_iter()
            .filter_map(|row| {
                let id = row.value_at(0)?.as_text()?.to_string();
                let score = row.value_at(1)?.as_real()?;
                Some((id, score))
            })
            .collect())
    }

    // -- Vector operations (blob column + in-process cosine scan) --

    async fn vector_store(&self, entry_id: &str, embedding: &[f32]) -> DbResult<()> {
        let blob = serialize_f32(embedding);
        self.execute(
            "INSERT INTO knowledge_vec (entry_id, embedding) VALUES (?, ?)
             ON CONFLICT(entry_id) DO UPDATE SET embedding = excluded.embedding",
            &[SqlValue::Text(entry_id.to_string()), SqlValue::Blob(blob)],
        )
        .await?;
        Ok(())
    }

    async fn vector_search(&self, embedding: &[f32], limit: i64) -> DbResult<Vec<(String, f64)>> {
        let result = self
            .execute("SELECT entry_id, embedding FROM knowledge_vec", &[])
            .await?;

        let mut scored: Vec<(String, f64)> = result
            .rows
            .into_iter()
            .filter_map(|row| {
                let id = row.value_at(0)?.as_text()?.to_string();
                let stored = deserialize_f32(row.value_at(1)?.as_blob()?);
                if stored.len() != embedding.len() {
                    return None;
                }
                Some((id, cosine_distance(embedding, &stored)))
            })
            .collect();

        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit.max(0) as usize);
        Ok(scored)
    }

    async fn vector_delete(&self, entry_id: &str) -> DbResult<()> {
        self.execute(
            "DELETE FROM knowledge_vec WHERE entry_id = ?",
            &[SqlValue::Text(entry_id.to_string())],
        )
        .await?;
        Ok(())
    }

    // -- Graph helpers --

    async fn delete_llm_edges(&self, entry_id: &str) -> DbResult<()> {
        self.execute(
            "DELETE FROM graph_edges
             WHERE source = ? AND json_extract(properties, '$.source') = 'llm'",
            &[SqlValue::Text(entry_id.to_string())],
        )
        .await?;
        Ok(())
    }

    // -- Maintenance --

    async fn vacuum(&self) -> DbResult<String> {
        {
            let conn = self.conn()?;
            if !conn.is_autocommit() {
                conn.execute_batch("COMMIT")?;
            }
            conn.execute_batch("PRAGMA optimize; VACUUM;")?;
        }

        let mut size_info = String::new();
        if let Some(path) = &self.path {
            if let Ok(meta) = std::fs::metadata(path) {
                let size = meta.len();
                if size < 1024 * 1024 {
                    size_info = format!(" Database size: {:.1} KB", size as f64 / 1024.0);
                } else {
                    size_info =
                        format!(" Database size: {:.1} MB", size as f64 / (1024.0 * 1024.0));
                }
            }
        }

        Ok(format!("Vacuum complete.{}", size_info))
    }

    // -- Schema --

    async fn apply_schema(&self, _embedding_dim: usize) -> DbResult<()> {
        self.execute_script(SCHEMA_SQL).await?;
        self.execute_script(GRAPH_SCHEMA_SQL).await?;
        self.execute_script(INGEST_SCHEMA_SQL).await?;
        self.execute_script(VEC_SCHEMA_SQL).await?;
        self.execute(INIT_SEQ_SQL, &[]).await?;

        let row = self
            .execute("SELECT version FROM schema_version", &[])
            .await?
            .into_first();
        if row.is_none() {
            self.execute(
                "INSERT INTO schema_version (version) VALUES (?)",
                &[SqlValue::Integer(SCHEMA_VERSION)],
            )
            .await?;
        }

        self.commit().await
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_params;

    fn backend() -> SqliteBackend {
        SqliteBackend::open_in_memory().expect("in-memory database")
    }

    #[tokio::test]
    async fn test_apply_schema_idempotent() {
        let db = backend();
        db.apply_schema(8).await.unwrap();
        db.apply_schema(8).await.unwrap();

        let version = db
            .execute("SELECT version FROM schema_version", &[])
            .await
            .unwrap();
        assert_eq!(version.rows.len(), 1);
    }

    #[tokio::test]
    async fn test_execute_rows_and_rowcount() {
        let db = backend();
        db.apply_schema(8).await.unwrap();

        let result = db
            .execute(
                "INSERT INTO graph_nodes (node_id, node_type, properties, created_at)
                 VALUES (?, ?, '{}', ?)",
                &sql_params!["tag:rust", "tag", "2025-01-01T00:00:00Z"],
            )
            .await
            .unwrap();
        assert_eq!(result.rowcount, 1);
        db.commit().await.unwrap();

        let rows = db
            .execute("SELECT node_id, node_type FROM graph_nodes", &[])
            .await
            .unwrap();
        assert_eq!(rows.rows.len(), 1);
        assert_eq!(rows.rows[0].text("node_id"), Some("tag:rust"));
    }

    #[tokio::test]
    async fn test_fts_escape() {
        assert_eq!(escape_fts_query("hello world"), "\"hello\" \"world\"");
        assert_eq!(escape_fts_query("a-b (c)"), "\"a-b\" \"(c)\"");
        assert_eq!(escape_fts_query("   "), "");
    }

    #[tokio::test]
    async fn test_fts_search_active_only() {
        let db = backend();
        db.apply_schema(8).await.unwrap();

        for (id, title, active) in [
            ("kb-00001", "rust ownership rules", 1i64),
            ("kb-00002", "rust borrow checker", 0i64),
        ] {
            db.execute(
                "INSERT INTO knowledge_entries
                 (id, short_title, long_title, knowledge_details, entry_type,
                  tags, hints, created_at, updated_at, is_active)
                 VALUES (?, ?, ?, ?, 'factual_reference', '', '{}', ?, ?, ?)",
                &sql_params![
                    id,
                    title,
                    title,
                    "details about rust",
                    "2025-01-01T00:00:00Z",
                    "2025-01-01T00:00:00Z",
                    active
                ],
            )
            .await
            .unwrap();
        }
        db.commit().await.unwrap();

        let hits = db
            .fts_search("rust", &FtsFilters::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "kb-00001");
        assert!(hits[0].1 < 0.0, "bm25 scores are negative");
    }

    #[tokio::test]
    async fn test_vector_round_trip() {
        let db = backend();
        db.apply_schema(4).await.unwrap();

        db.vector_store("kb-00001", &[1.0, 0.0, 0.0, 0.0]).await.unwrap();
        db.vector_store("kb-00002", &[0.0, 1.0, 0.0, 0.0]).await.unwrap();
        db.commit().await.unwrap();

        let hits = db.vector_search(&[1.0, 0.0, 0.0, 0.0], 10).await.unwrap();
        assert_eq!(hits[0].0, "kb-00001");
        assert!(hits[0].1 < hits[1].1);

        // Upsert overwrites in place
        db.vector_store("kb-00001", &[0.0, 0.0, 1.0, 0.0]).await.unwrap();
        db.commit().await.unwrap();
        let hits = db.vector_search(&[0.0, 0.0, 1.0, 0.0], 1).await.unwrap();
        assert_eq!(hits[0].0, "kb-00001");

        db.vector_delete("kb-00001").await.unwrap();
        db.commit().await.unwrap();
        let hits = db.vector_search(&[1.0, 0.0, 0.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_llm_edges_keeps_deterministic() {
        let db = backend();
        db.apply_schema(4).await.unwrap();

        for node in ["kb-00001", "tool:redis", "tag:db"] {
            db.execute(
                "INSERT INTO graph_nodes (node_id, node_type, properties, created_at)
                 VALUES (?, 'entry', '{}', '2025-01-01T00:00:00Z')",
                &sql_params![node],
            )
            .await
            .unwrap();
        }
        db.execute(
            "INSERT INTO graph_edges (source, target, edge_type, properties, created_at)
             VALUES ('kb-00001', 'tool:redis', 'uses', '{\"source\": \"llm\"}', '2025-01-01T00:00:00Z')",
            &[],
        )
        .await
        .unwrap();
        db.execute(
            "INSERT INTO graph_edges (source, target, edge_type, properties, created_at)
             VALUES ('kb-00001', 'tag:db', 'has_tag', '{}', '2025-01-01T00:00:00Z')",
            &[],
        )
        .await
        .unwrap();
        db.commit().await.unwrap();

        db.delete_llm_edges("kb-00001").await.unwrap();
        db.commit().await.unwrap();

        let rows = db
            .execute("SELECT edge_type FROM graph_edges WHERE source = 'kb-00001'", &[])
            .await
            .unwrap();
        assert_eq!(rows.rows.len(), 1);
        assert_eq!(rows.rows[0].text("edge_type"), Some("has_tag"));
    }
}
