//! PostgreSQL backend (feature `postgres`).
//!
//! Application SQL stays in the embedded dialect; this backend translates
//! positional `?` placeholders to `$N` at execute time and implements the
//! specialized methods natively: tsvector + GIN for FTS (scores negated so
//! lower stays better) and pgvector L2 distance for KNN. `commit` is a
//! no-op because statements auto-commit.

use async_trait::async_trait;
use bytes::BytesMut;
use deadpool_postgres::{Config, Pool, Runtime};
use pgvector::Vector;
use std::sync::Arc;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::NoTls;

use super::{Database, DbError, DbResult, ExecResult, FtsFilters, SqlRow, SqlValue};
use crate::SCHEMA_VERSION;

/// Convert `?` placeholders to `$1, $2, ...`. SQL text is otherwise opaque.
pub(crate) fn translate_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut counter = 0;
    for ch in sql.chars() {
        if ch == '?' {
            counter += 1;
            out.push('$');
            out.push_str(&counter.to_string());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Rewrite the embedded dialect for PostgreSQL: `INSERT OR IGNORE` becomes
/// `INSERT ... ON CONFLICT DO NOTHING`, and `?` becomes `$N`.
pub(crate) fn translate_dialect(sql: &str) -> String {
    let trimmed = sql.trim_start();
    let translated = if trimmed.len() >= 16 && trimmed[..16].eq_ignore_ascii_case("insert or ignore")
    {
        let rest = &trimmed[16..];
        format!("INSERT{rest} ON CONFLICT DO NOTHING")
    } else {
        sql.to_string()
    };
    translate_placeholders(&translated)
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Integer(i) => {
                if *ty == Type::INT2 {
                    (*i as i16).to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    (*i as i32).to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*i as f32).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*i as f64).to_sql(ty, out)
                } else if *ty == Type::BOOL {
                    (*i != 0).to_sql(ty, out)
                } else {
                    i.to_sql(ty, out)
                }
            }
            SqlValue::Real(f) => {
                if *ty == Type::FLOAT4 {
                    (*f as f32).to_sql(ty, out)
                } else {
                    f.to_sql(ty, out)
                }
            }
            SqlValue::Text(s) => s.to_sql(ty, out),
            SqlValue::Blob(b) => b.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn pg_value(row: &tokio_postgres::Row, idx: usize) -> SqlValue {
    let ty = row.columns()[idx].type_().clone();
    if ty == Type::BOOL {
        match row.try_get::<_, Option<bool>>(idx) {
            Ok(Some(v)) => SqlValue::Integer(v as i64),
            _ => SqlValue::Null,
        }
    } else if ty == Type::INT2 {
        match row.try_get::<_, Option<i16>>(idx) {
            Ok(Some(v)) => SqlValue::Integer(v as i64),
            _ => SqlValue::Null,
        }
    } else if ty == Type::INT4 {
        match row.try_get::<_, Option<i32>>(idx) {
            Ok(Some(v)) => SqlValue::Integer(v as i64),
            _ => SqlValue::Null,
        }
    } else if ty == Type::INT8 {
        match row.try_get::<_, Option<i64>>(idx) {
            Ok(Some(v)) => SqlValue::Integer(v),
            _ => SqlValue::Null,
        }
    } else if ty == Type::FLOAT4 {
        match row.try_get::<_, Option<f32>>(idx) {
            Ok(Some(v)) => SqlValue::Real(v as f64),
            _ => SqlValue::Null,
        }
    } else if ty == Type::FLOAT8 {
        match row.try_get::<_, Option<f64>>(idx) {
            Ok(Some(v)) => SqlValue::Real(v),
            _ => SqlValue::Null,
        }
    } else if ty == Type::BYTEA {
        match row.try_get::<_, Option<Vec<u8>>>(idx) {
            Ok(Some(v)) => SqlValue::Blob(v),
            _ => SqlValue::Null,
        }
    } else {
        match row.try_get::<_, Option<String>>(idx) {
            Ok(Some(v)) => SqlValue::Text(v),
            _ => SqlValue::Null,
        }
    }
}

// ============================================================================
// BACKEND
// ============================================================================

/// Remote relational backend over a small connection pool.
pub struct PostgresBackend {
    pool: Pool,
}

impl PostgresBackend {
    /// Create a backend from a `postgres://` connection URL.
    pub async fn connect(url: &str) -> DbResult<Self> {
        let mut cfg = Config::new();
        cfg.url = Some(url.to_string());
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(10));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DbError::Pool(e.to_string()))?;

        // Fail fast on an unreachable server
        pool.get()
            .await
            .map_err(|e| DbError::Pool(e.to_string()))?;

        Ok(Self { pool })
    }

    async fn client(&self) -> DbResult<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| DbError::Pool(e.to_string()))
    }
}

fn borrow_params(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

fn rows_to_result(rows: Vec<tokio_postgres::Row>) -> ExecResult {
    let columns: Arc<Vec<String>> = Arc::new(
        rows.first()
            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default(),
    );
    let converted = rows
        .iter()
        .map(|row| {
            let values = (0..row.columns().len()).map(|i| pg_value(row, i)).collect();
            SqlRow::new(columns.clone(), values)
        })
        .collect();
    ExecResult {
        rows: converted,
        rowcount: -1,
    }
}

#[async_trait]
impl Database for PostgresBackend {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<ExecResult> {
        let pg_sql = translate_dialect(sql);
        let client = self.client().await?;
        let stmt = client.prepare(&pg_sql).await?;
        let args = borrow_params(params);

        if stmt.columns().is_empty() {
            let affected = client.execute(&stmt, &args).await?;
            Ok(ExecResult {
                rows: Vec::new(),
                rowcount: affected as i64,
            })
        } else {
            let rows = client.query(&stmt, &args).await?;
            Ok(rows_to_result(rows))
        }
    }

    async fn execute_many(&self, sql: &str, params_seq: &[Vec<SqlValue>]) -> DbResult<()> {
        let pg_sql = translate_dialect(sql);
        let client = self.client().await?;
        let stmt = client.prepare(&pg_sql).await?;
        for params in params_seq {
            let args = borrow_params(params);
            client.execute(&stmt, &args).await?;
        }
        Ok(())
    }

    async fn execute_script(&self, sql: &str) -> DbResult<()> {
        let client = self.client().await?;
        client.batch_execute(sql).await?;
        Ok(())
    }

    async fn commit(&self) -> DbResult<()> {
        // Statements auto-commit
        Ok(())
    }

    async fn close(&self) -> DbResult<()> {
        self.pool.close();
        Ok(())
    }

    // -- FTS (tsvector + GIN) --

    async fn fts_search(
        &self,
        query: &str,
        filters: &FtsFilters,
        limit: i64,
    ) -> DbResult<Vec<(String, f64)>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        // Scores negated so that lower = better matches the FTS5 convention
        let mut sql = String::from(
            "SELECT e.id, (-ts_rank_cd(e.search_vector, plainto_tsquery('english', $1)))::float8 AS score
             FROM knowledge_entries e
             WHERE e.search_vector @@ plainto_tsquery('english', $1)
             AND e.is_active = 1",
        );
        let mut params: Vec<SqlValue> = vec![SqlValue::Text(query.to_string())];
        let mut idx = 2;

        if let Some(project) = &filters.project_ref {
            sql.push_str(&format!(" AND e.project_ref = ${idx}"));
            params.push(SqlValue::Text(project.clone()));
            idx += 1;
        }
        if let Some(entry_type) = &filters.entry_type {
            sql.push_str(&format!(" AND e.entry_type = ${idx}"));
            params.push(SqlValue::Text(entry_type.clone()));
            idx += 1;
        }
        if let Some(tags) = &filters.tags {
            for tag in tags {
                sql.push_str(&format!(" AND (' ' || e.tags || ' ') LIKE ${idx}"));
                params.push(SqlValue::Text(format!("% {} %", tag)));
                idx += 1;
            }
        }

        sql.push_str(&format!(" ORDER BY score LIMIT ${idx}"));
        params.push(SqlValue::Integer(limit));

        let client = self.client().await?;
        let args = borrow_params(&params);
        let rows = client.query(&sql, &args).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let id: String = row.get(0);
                let score: f64 = row.get(1);
                (id, score)
            })
            .collect())
    }

    // -- Vector operations (pgvector) --

    async fn vector_store(&self, entry_id: &str, embedding: &[f32]) -> DbResult<()> {
        let vector = Vector::from(embedding.to_vec());
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO knowledge_vec (entry_id, embedding)
                 VALUES ($1, $2)
                 ON CONFLICT (entry_id) DO UPDATE SET embedding = EXCLUDED.embedding",
                &[&entry_id, &vector],
            )
            .await?;
        Ok(())
    }

    async fn vector_search(&self, embedding: &[f32], limit: i64) -> DbResult<Vec<(String, f64)>> {
        let vector = Vector::from(embedding.to_vec());
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT entry_id, (embedding <-> $1)::float8 AS distance
                 FROM knowledge_vec
                 ORDER BY distance
                 LIMIT $2",
                &[&vector, &limit],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let id: String = row.get(0);
                let distance: f64 = row.get(1);
                (id, distance)
            })
            .collect())
    }

    async fn vector_delete(&self, entry_id: &str) -> DbResult<()> {
        let client = self.client().await?;
        client
            .execute("DELETE FROM knowledge_vec WHERE entry_id = $1", &[&entry_id])
            .await?;
        Ok(())
    }

    // -- Graph helpers --

    async fn delete_llm_edges(&self, entry_id: &str) -> DbResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "DELETE FROM graph_edges
                 WHERE source = $1 AND properties::json->>'source' = 'llm'",
                &[&entry_id],
            )
            .await?;
        Ok(())
    }

    // -- Maintenance --

    async fn vacuum(&self) -> DbResult<String> {
        let client = self.client().await?;
        client.batch_execute("ANALYZE").await?;
        Ok("Vacuum complete (ANALYZE).".to_string())
    }

    // -- Schema --

    async fn apply_schema(&self, embedding_dim: usize) -> DbResult<()> {
        let client = self.client().await?;

        client
            .batch_execute("CREATE EXTENSION IF NOT EXISTS vector")
            .await?;

        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS schema_version (
                     version INTEGER NOT NULL
                 );

                 CREATE TABLE IF NOT EXISTS knowledge_entries (
                     id TEXT PRIMARY KEY,
                     project_ref TEXT,
                     short_title TEXT NOT NULL,
                     long_title TEXT NOT NULL,
                     knowledge_details TEXT NOT NULL,
                     entry_type TEXT NOT NULL,
                     source_context TEXT,
                     confidence_level REAL NOT NULL DEFAULT 0.9,
                     tags TEXT NOT NULL DEFAULT '',
                     hints TEXT NOT NULL DEFAULT '{}',
                     created_at TEXT NOT NULL,
                     updated_at TEXT NOT NULL,
                     last_accessed TEXT,
                     superseded_by TEXT,
                     is_active INTEGER NOT NULL DEFAULT 1,
                     has_embedding INTEGER NOT NULL DEFAULT 0,
                     version INTEGER NOT NULL DEFAULT 1,
                     search_vector tsvector
                 );

                 CREATE INDEX IF NOT EXISTS idx_entries_project ON knowledge_entries(project_ref);
                 CREATE INDEX IF NOT EXISTS idx_entries_type ON knowledge_entries(entry_type);
                 CREATE INDEX IF NOT EXISTS idx_entries_active ON knowledge_entries(is_active);
                 CREATE INDEX IF NOT EXISTS idx_entries_fts
                     ON knowledge_entries USING gin(search_vector);",
            )
            .await?;

        // Write-time FTS projection: same weighted fields as the embedded
        // backend's trigger set
        client
            .batch_execute(
                "CREATE OR REPLACE FUNCTION knowledge_entries_search_trigger() RETURNS trigger AS $$
                 BEGIN
                     NEW.search_vector :=
                         setweight(to_tsvector('english', COALESCE(NEW.short_title, '')), 'A') ||
                         setweight(to_tsvector('english', COALESCE(NEW.long_title, '')), 'B') ||
                         setweight(to_tsvector('english', COALESCE(NEW.knowledge_details, '')), 'C') ||
                         setweight(to_tsvector('english', COALESCE(NEW.tags, '')), 'D');
                     RETURN NEW;
                 END
                 $$ LANGUAGE plpgsql;

                 DROP TRIGGER IF EXISTS tsvector_update ON knowledge_entries;
                 CREATE TRIGGER tsvector_update BEFORE INSERT OR UPDATE
                 ON knowledge_entries FOR EACH ROW
                 EXECUTE FUNCTION knowledge_entries_search_trigger();",
            )
            .await?;

        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS entry_versions (
                     id SERIAL PRIMARY KEY,
                     entry_id TEXT NOT NULL REFERENCES knowledge_entries(id),
                     version_number INTEGER NOT NULL,
                     knowledge_details TEXT NOT NULL,
                     change_reason TEXT,
                     confidence_level REAL NOT NULL,
                     created_at TEXT NOT NULL,
                     UNIQUE(entry_id, version_number)
                 );

                 CREATE TABLE IF NOT EXISTS entry_id_seq (
                     next_id INTEGER NOT NULL DEFAULT 1
                 );
                 INSERT INTO entry_id_seq (next_id)
                 SELECT 1 WHERE NOT EXISTS (SELECT 1 FROM entry_id_seq);

                 CREATE TABLE IF NOT EXISTS graph_nodes (
                     node_id TEXT PRIMARY KEY,
                     node_type TEXT NOT NULL,
                     properties TEXT NOT NULL DEFAULT '{}',
                     created_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_nodes_type ON graph_nodes(node_type);

                 CREATE TABLE IF NOT EXISTS graph_edges (
                     id SERIAL PRIMARY KEY,
                     source TEXT NOT NULL REFERENCES graph_nodes(node_id),
                     target TEXT NOT NULL REFERENCES graph_nodes(node_id),
                     edge_type TEXT NOT NULL,
                     properties TEXT NOT NULL DEFAULT '{}',
                     created_at TEXT NOT NULL,
                     UNIQUE(source, target, edge_type)
                 );
                 CREATE INDEX IF NOT EXISTS idx_edges_source ON graph_edges(source);
                 CREATE INDEX IF NOT EXISTS idx_edges_target ON graph_edges(target);
                 CREATE INDEX IF NOT EXISTS idx_edges_type ON graph_edges(edge_type);

                 CREATE TABLE IF NOT EXISTS ingested_files (
                     id SERIAL PRIMARY KEY,
                     relative_path TEXT NOT NULL UNIQUE,
                     content_hash TEXT NOT NULL,
                     note_node_id TEXT NOT NULL,
                     entry_ids TEXT NOT NULL DEFAULT '[]',
                     summary TEXT NOT NULL,
                     file_size INTEGER NOT NULL,
                     file_extension TEXT NOT NULL,
                     project_ref TEXT,
                     redactions TEXT NOT NULL DEFAULT '[]',
                     ingested_at TEXT NOT NULL,
                     updated_at TEXT NOT NULL,
                     is_active INTEGER NOT NULL DEFAULT 1
                 );",
            )
            .await?;

        client
            .batch_execute(&format!(
                "CREATE TABLE IF NOT EXISTS knowledge_vec (
                     entry_id TEXT PRIMARY KEY,
                     embedding vector({embedding_dim})
                 )"
            ))
            .await?;

        let row = client
            .query_opt("SELECT version FROM schema_version", &[])
            .await?;
        if row.is_none() {
            client
                .execute(
                    "INSERT INTO schema_version (version) VALUES ($1)",
                    &[&(SCHEMA_VERSION as i32)],
                )
                .await?;
        }

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_placeholders() {
        assert_eq!(
            translate_placeholders("SELECT * FROM t WHERE a = ? AND b = ?"),
            "SELECT * FROM t WHERE a = $1 AND b = $2"
        );
        assert_eq!(translate_placeholders("no params"), "no params");
    }

    #[test]
    fn test_translate_placeholders_many() {
        let sql = translate_placeholders(&vec!["?"; 11].join(","));
        assert!(sql.ends_with("$11"));
    }

    #[test]
    fn test_translate_insert_or_ignore() {
        let sql = translate_dialect("INSERT OR IGNORE INTO graph_edges (a, b) VALUES (?, ?)");
        assert_eq!(
            sql,
            "INSERT INTO graph_edges (a, b) VALUES ($1, $2) ON CONFLICT DO NOTHING"
        );

        // Plain inserts pass through untouched
        let sql = translate_dialect("INSERT INTO t (a) VALUES (?)");
        assert_eq!(sql, "INSERT INTO t (a) VALUES ($1)");
    }
}
