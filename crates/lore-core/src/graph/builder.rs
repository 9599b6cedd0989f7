//! Deterministic graph derivation from entry fields.

use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::db::{Database, Db, DbResult};
use crate::model::KnowledgeEntry;
use crate::sql_params;

fn kb_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"kb-\d{5}").expect("valid regex"))
}

/// Coerce a hint value to a list: `None` -> empty, arrays as-is, any other
/// value as a single element.
fn as_list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
    }
}

/// Rebuilds an entry's outgoing edges from its tags, project, hints, and
/// text references. Incoming edges are preserved, so other entries' links
/// survive a rebuild. Building twice yields the same edge set.
pub struct GraphBuilder {
    db: Db,
}

impl GraphBuilder {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Rebuild all outgoing graph edges for an entry.
    pub async fn build_for_entry(&self, entry: &KnowledgeEntry) -> DbResult<()> {
        self.clear_edges_for_source(&entry.id).await?;

        // 1. Upsert the entry node with its display properties
        let props = serde_json::json!({
            "short_title": entry.short_title,
            "entry_type": entry.entry_type.as_str(),
        });
        self.ensure_node(&entry.id, "entry", Some(&props)).await?;

        // 2. Tags
        for tag in &entry.tags {
            let node_id = format!("tag:{tag}");
            self.ensure_node(&node_id, "tag", None).await?;
            self.add_edge(&entry.id, &node_id, "has_tag").await?;
        }

        // 3. Project
        if let Some(project) = &entry.project_ref {
            let node_id = format!("project:{project}");
            self.ensure_node(&node_id, "project", None).await?;
            self.add_edge(&entry.id, &node_id, "in_project").await?;
        }

        // 4. Supersedes hints (this entry replaces older ones)
        for target in as_list(entry.hints.get("supersedes")) {
            if let Some(target) = target.as_str().filter(|s| !s.is_empty()) {
                self.ensure_node(target, "entry", None).await?;
                self.add_edge(&entry.id, target, "supersedes").await?;
            }
        }

        // 5. Related entities: strings or {id|target, edge_type|type} objects
        for rel in as_list(entry.hints.get("related_entities")) {
            match rel {
                Value::Object(map) => {
                    let target = map
                        .get("id")
                        .or_else(|| map.get("target"))
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty());
                    if let Some(target) = target {
                        let edge_type = map
                            .get("edge_type")
                            .or_else(|| map.get("type"))
                            .and_then(Value::as_str)
                            .unwrap_or("related_to");
                        self.ensure_node(target, "entry", None).await?;
                        self.add_edge(&entry.id, target, edge_type).await?;
                    }
                }
                Value::String(target) if !target.is_empty() => {
                    self.ensure_node(target, "entry", None).await?;
                    self.add_edge(&entry.id, target, "related_to").await?;
                }
                // Malformed shapes contribute no edges
                _ => {}
            }
        }

        // 6. Person hints
        for person in as_list(entry.hints.get("person")) {
            if let Some(person) = person.as_str().filter(|s| !s.is_empty()) {
                let node_id = format!("person:{}", person.to_lowercase());
                self.ensure_node(&node_id, "person", None).await?;
                self.add_edge(&entry.id, &node_id, "mentions_person").await?;
            }
        }

        // 7. Tool hints
        for tool in as_list(entry.hints.get("tool")) {
            if let Some(tool) = tool.as_str().filter(|s| !s.is_empty()) {
                let node_id = format!("tool:{}", tool.to_lowercase());
                self.ensure_node(&node_id, "tool", None).await?;
                self.add_edge(&entry.id, &node_id, "uses_tool").await?;
            }
        }

        // 8. Superseded_by, reversed so the chain reads older -> newer
        if let Some(newer) = &entry.superseded_by {
            self.ensure_node(newer, "entry", None).await?;
            self.add_edge(newer, &entry.id, "supersedes").await?;
        }

        // 9. Text references (kb-XXXXX patterns in the details)
        let mut seen: HashSet<&str> = HashSet::new();
        for found in kb_id_re().find_iter(&entry.knowledge_details) {
            let ref_id = found.as_str();
            if ref_id != entry.id && seen.insert(ref_id) {
                self.ensure_node(ref_id, "entry", None).await?;
                self.add_edge(&entry.id, ref_id, "references").await?;
            }
        }

        self.db.commit().await
    }

    /// Insert a node, updating its properties when provided.
    async fn ensure_node(
        &self,
        node_id: &str,
        node_type: &str,
        properties: Option<&Value>,
    ) -> DbResult<()> {
        let now = Utc::now().to_rfc3339();
        let props_json = properties
            .map(|p| p.to_string())
            .unwrap_or_else(|| "{}".to_string());
        if properties.is_some() {
            self.db
                .execute(
                    "INSERT INTO graph_nodes (node_id, node_type, properties, created_at)
                     VALUES (?, ?, ?, ?)
                     ON CONFLICT(node_id) DO UPDATE SET properties = excluded.properties",
                    &sql_params![node_id, node_type, props_json, now],
                )
                .await?;
        } else {
            self.db
                .execute(
                    "INSERT INTO graph_nodes (node_id, node_type, properties, created_at)
                     VALUES (?, ?, ?, ?)
                     ON CONFLICT(node_id) DO NOTHING",
                    &sql_params![node_id, node_type, props_json, now],
                )
                .await?;
        }
        Ok(())
    }

    /// Insert an edge, ignoring duplicates.
    async fn add_edge(&self, source: &str, target: &str, edge_type: &str) -> DbResult<()> {
        let now = Utc::now().to_rfc3339();
        self.db
            .execute(
                "INSERT OR IGNORE INTO graph_edges (source, target, edge_type, properties, created_at)
                 VALUES (?, ?, ?, '{}', ?)",
                &sql_params![source, target, edge_type, now],
            )
            .await?;
        Ok(())
    }

    async fn clear_edges_for_source(&self, source: &str) -> DbResult<()> {
        self.db
            .execute(
                "DELETE FROM graph_edges WHERE source = ?",
                &sql_params![source],
            )
            .await?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, SqliteBackend};
    use crate::model::EntryType;
    use std::sync::Arc;

    async fn graph_db() -> Db {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.apply_schema(4).await.unwrap();
        Arc::new(db)
    }

    fn entry_with_hints(hints: serde_json::Value) -> KnowledgeEntry {
        let now = Utc::now();
        KnowledgeEntry {
            id: "kb-00001".into(),
            project_ref: Some("lore".into()),
            short_title: "title".into(),
            long_title: "long".into(),
            knowledge_details: "see kb-00007 and kb-00007 but not kb-00001".into(),
            entry_type: EntryType::Decision,
            source_context: None,
            confidence_level: 0.9,
            tags: vec!["rust".into(), "db".into()],
            hints: hints.as_object().cloned().unwrap_or_default(),
            created_at: now,
            updated_at: now,
            last_accessed: None,
            superseded_by: None,
            is_active: true,
            has_embedding: false,
            version: 1,
        }
    }

    async fn edges_from(db: &dyn Database, source: &str) -> Vec<(String, String)> {
        let result = db
            .execute(
                "SELECT target, edge_type FROM graph_edges WHERE source = ?
                 ORDER BY target, edge_type",
                &sql_params![source],
            )
            .await
            .unwrap();
        result
            .rows
            .iter()
            .map(|row| {
                (
                    row.text("target").unwrap().to_string(),
                    row.text("edge_type").unwrap().to_string(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_build_derives_expected_edges() {
        let db = graph_db().await;
        let builder = GraphBuilder::new(db.clone());
        let entry = entry_with_hints(serde_json::json!({
            "supersedes": "kb-00002",
            "person": ["Ada", "grace"],
            "tool": "Redis",
            "related_entities": [
                "kb-00003",
                {"id": "kb-00004", "edge_type": "depends_on"},
                {"target": "kb-00005"},
                42,
                {"id": 13},
            ],
        }));

        builder.build_for_entry(&entry).await.unwrap();

        let edges = edges_from(db.as_ref(), "kb-00001").await;
        let expect = |target: &str, ty: &str| {
            assert!(
                edges.contains(&(target.to_string(), ty.to_string())),
                "missing edge ({target}, {ty}); have {edges:?}"
            );
        };
        expect("tag:rust", "has_tag");
        expect("tag:db", "has_tag");
        expect("project:lore", "in_project");
        expect("kb-00002", "supersedes");
        expect("person:ada", "mentions_person");
        expect("person:grace", "mentions_person");
        expect("tool:redis", "uses_tool");
        expect("kb-00003", "related_to");
        expect("kb-00004", "depends_on");
        expect("kb-00005", "related_to");
        // One references edge despite the id appearing twice; no self edge
        expect("kb-00007", "references");
        assert_eq!(edges.len(), 11, "malformed hints contribute nothing");
    }

    #[tokio::test]
    async fn test_build_is_idempotent() {
        let db = graph_db().await;
        let builder = GraphBuilder::new(db.clone());
        let entry = entry_with_hints(serde_json::json!({"tool": "redis"}));

        builder.build_for_entry(&entry).await.unwrap();
        let first = edges_from(db.as_ref(), "kb-00001").await;
        builder.build_for_entry(&entry).await.unwrap();
        let second = edges_from(db.as_ref(), "kb-00001").await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_rebuild_preserves_incoming_edges(){
        let db = graph_db().await;
        let builder = GraphBuilder::new(db.clone());

        let entry = entry_with_hints(serde_json::json!({}));
        builder.build_for_entry(&entry).await.unwrap();

        // Another entry pointing at this one
        let mut other = entry_with_hints(serde_json::json!({"related_entities": "kb-00001"}));
        other.id = "kb-00002".into();
        builder.build_for_entry(&other).await.unwrap();

        // Rebuild the first entry; the incoming edge survives
        builder.build_for_entry(&entry).await.unwrap();
        let incoming = edges_from(db.as_ref(), "kb-00002").await;
        assert!(incoming.contains(&("kb-00001".to_string(), "related_to".to_string())));
    }

    #[tokio::test]
    async fn test_superseded_by_reverses_direction() {
        let db = graph_db().await;
        let builder = GraphBuilder::new(db.clone());
        let mut entry = entry_with_hints(serde_json::json!({}));
        entry.superseded_by = Some("kb-00009".into());

        builder.build_for_entry(&entry).await.unwrap();

        let from_newer = edges_from(db.as_ref(), "kb-00009").await;
        assert!(from_newer.contains(&("kb-00001".to_string(), "supersedes".to_string())));
    }
}
