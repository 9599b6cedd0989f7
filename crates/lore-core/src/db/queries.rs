//! Query helpers for common database operations.
//!
//! These are free functions over the [`Database`] capability so every layer
//! (store, search, graph, tools) shares one row mapping and one SQL text per
//! operation. Mutating helpers do not commit; callers commit once per
//! logical operation so an entry row and its version row land in the same
//! transaction. `touch_accessed` and `delete_entry_cascade` are standalone
//! operations and commit themselves.

use chrono::{DateTime, Utc};

use super::{Database, DbError, DbResult, SqlRow, SqlValue};
use crate::model::{EntryType, EntryVersion, KnowledgeEntry};
use crate::sql_params;

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse tags from storage format (space-separated text).
fn parse_tags(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(|t| t.to_string()).collect()
}

/// Allocate the next entry ID, incrementing the sequence in the caller's
/// open transaction.
pub async fn next_entry_id(db: &dyn Database) -> DbResult<String> {
    let row = db
        .execute("SELECT next_id FROM entry_id_seq", &[])
        .await?
        .into_first()
        .ok_or_else(|| DbError::Init("entry_id_seq table is empty".to_string()))?;
    let next_id = row
        .integer("next_id")
        .ok_or_else(|| DbError::Init("entry_id_seq holds no integer".to_string()))?;
    db.execute(
        "UPDATE entry_id_seq SET next_id = ?",
        &sql_params![next_id + 1],
    )
    .await?;
    Ok(format!("kb-{:05}", next_id))
}

/// Convert a `SELECT * FROM knowledge_entries` row into an entry.
pub fn row_to_entry(row: &SqlRow) -> Option<KnowledgeEntry> {
    let now = Utc::now();
    Some(KnowledgeEntry {
        id: row.text("id")?.to_string(),
        project_ref: row.text("project_ref").map(str::to_string),
        short_title: row.text("short_title")?.to_string(),
        long_title: row.text("long_title")?.to_string(),
        knowledge_details: row.text("knowledge_details")?.to_string(),
        entry_type: EntryType::parse_name(row.text("entry_type")?).unwrap_or_default(),
        source_context: row.text("source_context").map(str::to_string),
        confidence_level: row.real("confidence_level").unwrap_or(0.9),
        tags: row.text("tags").map(parse_tags).unwrap_or_default(),
        hints: row
            .text("hints")
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default(),
        created_at: row.text("created_at").and_then(parse_ts).unwrap_or(now),
        updated_at: row.text("updated_at").and_then(parse_ts).unwrap_or(now),
        last_accessed: row.text("last_accessed").and_then(parse_ts),
        superseded_by: row.text("superseded_by").map(str::to_string),
        is_active: row.integer("is_active").unwrap_or(1) != 0,
        has_embedding: row.integer("has_embedding").unwrap_or(0) != 0,
        version: row.integer("version").unwrap_or(1),
    })
}

/// Insert a new entry row. FTS is auto-synced by the backend.
pub async fn insert_entry(db: &dyn Database, entry: &KnowledgeEntry) -> DbResult<()> {
    let tags_text = entry.tags.join(" ");
    let hints_json = serde_json::to_string(&entry.hints).unwrap_or_else(|_| "{}".to_string());
    db.execute(
        "INSERT INTO knowledge_entries
         (id, project_ref, short_title, long_title, knowledge_details, entry_type,
          source_context, confidence_level, tags, hints, created_at, updated_at,
          last_accessed, superseded_by, is_active, has_embedding, version)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        &sql_params![
            &entry.id,
            entry.project_ref.as_deref(),
            &entry.short_title,
            &entry.long_title,
            &entry.knowledge_details,
            entry.entry_type.as_str(),
            entry.source_context.as_deref(),
            entry.confidence_level,
            tags_text,
            hints_json,
            entry.created_at.to_rfc3339(),
            entry.updated_at.to_rfc3339(),
            entry.last_accessed.map(|t| t.to_rfc3339()),
            entry.superseded_by.as_deref(),
            entry.is_active,
            entry.has_embedding,
            entry.version
        ],
    )
    .await?;
    Ok(())
}

/// Update an existing entry row in place.
pub async fn update_entry(db: &dyn Database, entry: &KnowledgeEntry) -> DbResult<()> {
    let tags_text = entry.tags.join(" ");
    let hints_json = serde_json::to_string(&entry.hints).unwrap_or_else(|_| "{}".to_string());
    db.execute(
        "UPDATE knowledge_entries SET
         project_ref=?, short_title=?, long_title=?, knowledge_details=?, entry_type=?,
         source_context=?, confidence_level=?, tags=?, hints=?, updated_at=?,
         superseded_by=?, is_active=?, has_embedding=?, version=?
         WHERE id=?",
        &sql_params![
            entry.project_ref.as_deref(),
            &entry.short_title,
            &entry.long_title,
            &entry.knowledge_details,
            entry.entry_type.as_str(),
            entry.source_context.as_deref(),
            entry.confidence_level,
            tags_text,
            hints_json,
            entry.updated_at.to_rfc3339(),
            entry.superseded_by.as_deref(),
            entry.is_active,
            entry.has_embedding,
            entry.version,
            &entry.id
        ],
    )
    .await?;
    Ok(())
}

/// Fetch a single entry by ID.
pub async fn get_entry(db: &dyn Database, entry_id: &str) -> DbResult<Option<KnowledgeEntry>> {
    let row = db
        .execute(
            "SELECT * FROM knowledge_entries WHERE id = ?",
            &sql_params![entry_id],
        )
        .await?
        .into_first();
    Ok(row.as_ref().and_then(row_to_entry))
}

/// Insert an entry version record.
pub async fn insert_version(db: &dyn Database, version: &EntryVersion) -> DbResult<()> {
    db.execute(
        "INSERT INTO entry_versions (entry_id, version_number, knowledge_details,
         change_reason, confidence_level, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        &sql_params![
            &version.entry_id,
            version.version_number,
            &version.knowledge_details,
            version.change_reason.as_deref(),
            version.confidence_level,
            version.created_at.to_rfc3339()
        ],
    )
    .await?;
    Ok(())
}

/// All versions of an entry, oldest first.
pub async fn get_versions(db: &dyn Database, entry_id: &str) -> DbResult<Vec<EntryVersion>> {
    let result = db
        .execute(
            "SELECT entry_id, version_number, knowledge_details, change_reason,
             confidence_level, created_at
             FROM entry_versions WHERE entry_id = ? ORDER BY version_number",
            &sql_params![entry_id],
        )
        .await?;
    Ok(result
        .rows
        .iter()
        .filter_map(|row| {
            Some(EntryVersion {
                entry_id: row.text("entry_id")?.to_string(),
                version_number: row.integer("version_number")?,
                knowledge_details: row.text("knowledge_details")?.to_string(),
                change_reason: row.text("change_reason").map(str::to_string),
                confidence_level: row.real("confidence_level")?,
                created_at: row.text("created_at").and_then(parse_ts)?,
            })
        })
        .collect())
}

/// Batch-update last_accessed to now for the given entry IDs.
pub async fn touch_accessed(db: &dyn Database, entry_ids: &[String]) -> DbResult<()> {
    if entry_ids.is_empty() {
        return Ok(());
    }
    let placeholders = vec!["?"; entry_ids.len()].join(",");
    let sql = format!(
        "UPDATE knowledge_entries SET last_accessed = ? WHERE id IN ({})",
        placeholders
    );
    let mut params: Vec<SqlValue> = Vec::with_capacity(entry_ids.len() + 1);
    params.push(SqlValue::Text(now_iso()));
    params.extend(entry_ids.iter().map(|id| SqlValue::Text(id.clone())));
    db.execute(&sql, &params).await?;
    db.commit().await
}

/// All active entry IDs, ordered.
pub async fn get_all_active_entry_ids(db: &dyn Database) -> DbResult<Vec<String>> {
    let result = db
        .execute(
            "SELECT id FROM knowledge_entries WHERE is_active = 1 ORDER BY id",
            &[],
        )
        .await?;
    Ok(result
        .rows
        .iter()
        .filter_map(|row| row.text("id").map(str::to_string))
        .collect())
}

/// Hard-delete an entry and all related data: vector, versions, incident
/// edges, node, row.
pub async fn delete_entry_cascade(db: &dyn Database, entry_id: &str) -> DbResult<()> {
    db.vector_delete(entry_id).await?;
    db.execute(
        "DELETE FROM entry_versions WHERE entry_id = ?",
        &sql_params![entry_id],
    )
    .await?;
    db.execute(
        "DELETE FROM graph_edges WHERE source = ? OR target = ?",
        &sql_params![entry_id, entry_id],
    )
    .await?;
    db.execute(
        "DELETE FROM graph_nodes WHERE node_id = ?",
        &sql_params![entry_id],
    )
    .await?;
    db.execute(
        "DELETE FROM knowledge_entries WHERE id = ?",
        &sql_params![entry_id],
    )
    .await?;
    db.commit().await
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Database overview: entry counts, embeddings, graph composition.
#[derive(Debug, Default)]
pub struct DbStats {
    pub total_entries: i64,
    pub active_entries: i64,
    pub inactive_entries: i64,
    pub by_type: Vec<(String, i64)>,
    pub by_project: Vec<(String, i64)>,
    pub with_embeddings: i64,
    pub without_embeddings: i64,
    pub graph_nodes_by_type: Vec<(String, i64)>,
    pub graph_edges_by_type: Vec<(String, i64)>,
}

fn grouped(rows: &[SqlRow]) -> Vec<(String, i64)> {
    rows.iter()
        .filter_map(|row| {
            let name = row.value_at(0)?.as_text()?.to_string();
            let count = row.value_at(1)?.as_integer()?;
            Some((name, count))
        })
        .collect()
}

/// Collect database statistics.
pub async fn get_db_stats(db: &dyn Database) -> DbResult<DbStats> {
    let mut stats = DbStats::default();

    let row = db
        .execute(
            "SELECT COUNT(*) AS total,
             COALESCE(SUM(is_active), 0) AS active,
             COUNT(*) - COALESCE(SUM(is_active), 0) AS inactive
             FROM knowledge_entries",
            &[],
        )
        .await?
        .into_first();
    if let Some(row) = row {
        stats.total_entries = row.integer("total").unwrap_or(0);
        stats.active_entries = row.integer("active").unwrap_or(0);
        stats.inactive_entries = row.integer("inactive").unwrap_or(0);
    }

    let by_type = db
        .execute(
            "SELECT entry_type, COUNT(*) AS cnt
             FROM knowledge_entries WHERE is_active = 1
             GROUP BY entry_type ORDER BY entry_type",
            &[],
        )
        .await?;
    stats.by_type = grouped(&by_type.rows);

    let by_project = db
        .execute(
            "SELECT COALESCE(project_ref, '(none)') AS proj, COUNT(*) AS cnt
             FROM knowledge_entries WHERE is_active = 1
             GROUP BY project_ref ORDER BY cnt DESC",
            &[],
        )
        .await?;
    stats.by_project = grouped(&by_project.rows);

    let embeddings = db
        .execute(
            "SELECT COALESCE(SUM(has_embedding), 0) AS with_emb,
             COUNT(*) - COALESCE(SUM(has_embedding), 0) AS without_emb
             FROM knowledge_entries WHERE is_active = 1",
            &[],
        )
        .await?
        .into_first();
    if let Some(row) = embeddings {
        stats.with_embeddings = row.integer("with_emb").unwrap_or(0);
        stats.without_embeddings = row.integer("without_emb").unwrap_or(0);
    }

    let nodes = db
        .execute(
            "SELECT node_type, COUNT(*) AS cnt FROM graph_nodes
             GROUP BY node_type ORDER BY node_type",
            &[],
        )
        .await?;
    stats.graph_nodes_by_type = grouped(&nodes.rows);

    let edges = db
        .execute(
            "SELECT edge_type, COUNT(*) AS cnt FROM graph_edges
             GROUP BY edge_type ORDER BY edge_type",
            &[],
        )
        .await?;
    stats.graph_edges_by_type = grouped(&edges.rows);

    Ok(stats)
}

// ============================================================================
// TESTS
// ============================================================================
