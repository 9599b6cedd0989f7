//! kb_store - create, update, or deactivate a knowledge entry.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use lore_core::db::Database;
use lore_core::model::{EntryType, KnowledgeEntry};
use lore_core::store::{NewEntry, UpdateEntry};

use crate::state::AppState;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "short_title": {
                "type": "string",
                "description": "Brief identifier for the entry"
            },
            "long_title": {
                "type": "string",
                "description": "Descriptive title"
            },
            "knowledge_details": {
                "type": "string",
                "description": "Full content of the knowledge entry"
            },
            "entry_type": {
                "type": "string",
                "enum": ["factual_reference", "decision", "pattern_convention", "lesson_learned"],
                "description": "factual_reference: config values and endpoints; decision: chose X because Y; pattern_convention: standards; lesson_learned: debugging insights"
            },
            "project_ref": {
                "type": "string",
                "description": "Project tag/category for filtering"
            },
            "source_context": {
                "type": "string",
                "description": "Where this knowledge came from"
            },
            "confidence_level": {
                "type": "number",
                "description": "Initial confidence score (0.0-1.0)",
                "default": 0.9,
                "minimum": 0.0,
                "maximum": 1.0
            },
            "tags": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Freeform tags for categorization"
            },
            "hints": {
                "type": "object",
                "description": "Structured hints for graph building (supersedes, related_entities, person, tool)"
            },
            "update_entry_id": {
                "type": "string",
                "description": "ID of an existing entry to update (e.g. kb-00042)"
            },
            "deactivate_entry_id": {
                "type": "string",
                "description": "ID of an existing entry to deactivate"
            },
            "change_reason": {
                "type": "string",
                "description": "Reason for the update"
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct StoreArgs {
    short_title: Option<String>,
    long_title: Option<String>,
    knowledge_details: Option<String>,
    entry_type: Option<String>,
    project_ref: Option<String>,
    source_context: Option<String>,
    confidence_level: Option<f64>,
    tags: Option<Vec<String>>,
    hints: Option<serde_json::Map<String, Value>>,
    update_entry_id: Option<String>,
    deactivate_entry_id: Option<String>,
    change_reason: Option<String>,
}

pub async fn execute(state: &AppState, args: Option<Value>) -> Result<String, String> {
    let args: StoreArgs = super::parse_args(args)?;

    if let Some(entry_id) = &args.deactivate_entry_id {
        return deactivate(state, entry_id).await;
    }

    if let Some(entry_id) = args.update_entry_id.clone() {
        return update(state, &entry_id, args).await;
    }

    create(state, args).await
}

async fn deactivate(state: &AppState, entry_id: &str) -> Result<String, String> {
    let entry = state
        .store
        .deactivate_entry(entry_id)
        .await
        .map_err(|err| format!("Error: {err}"))?;

    // Soft delete clears outgoing edges; incoming links survive
    state
        .db
        .execute(
            "DELETE FROM graph_edges WHERE source = ?",
            &lore_core::sql_params![entry_id],
        )
        .await
        .map_err(|err| format!("Error: {err}"))?;
    state
        .db
        .commit()
        .await
        .map_err(|err| format!("Error: {err}"))?;

    Ok(format!("Deactivated entry {}: {}", entry.id, entry.short_title))
}

async fn update(state: &AppState, entry_id: &str, args: StoreArgs) -> Result<String, String> {
    let Some(knowledge_details) = args.knowledge_details else {
        return Err("Error: knowledge_details is required when updating".to_string());
    };

    let entry = state
        .store
        .update_entry(
            entry_id,
            UpdateEntry {
                knowledge_details,
                change_reason: args.change_reason,
                confidence_level: args.confidence_level,
                tags: args.tags,
                hints: args.hints,
            },
        )
        .await
        .map_err(|err| format!("Error: {err}"))?;

    finish_entry(state, &entry).await;
    let entry = refreshed(state, entry).await;
    Ok(format_store_result(&entry, true))
}

async fn create(state: &AppState, args: StoreArgs) -> Result<String, String> {
    let mut missing = Vec::new();
    if args.short_title.is_none() {
        missing.push("short_title");
    }
    if args.long_title.is_none() {
        missing.push("long_title");
    }
    if args.knowledge_details.is_none() {
        missing.push("knowledge_details");
    }
    if args.entry_type.is_none() {
        missing.push("entry_type");
    }
    if !missing.is_empty() {
        return Err(format!("Error: missing required fields: {}", missing.join(", ")));
    }

    let type_name = args.entry_type.unwrap_or_default();
    let Some(entry_type) = EntryType::parse_name(&type_name) else {
        return Err(format!(
            "Error: invalid entry_type '{}'. Use: {}",
            type_name,
            EntryType::NAMES.join(", ")
        ));
    };

    let entry = state
        .store
        .create_entry(NewEntry {
            short_title: args.short_title.unwrap_or_default(),
            long_title: args.long_title.unwrap_or_default(),
            knowledge_details: args.knowledge_details.unwrap_or_default(),
            entry_type,
            project_ref: args.project_ref,
            source_context: args.source_context,
            confidence_level: args.confidence_level.unwrap_or(0.9).clamp(0.0, 1.0),
            tags: args.tags.unwrap_or_default(),
            hints: args.hints.unwrap_or_default(),
        })
        .await
        .map_err(|err| format!("Error: {err}"))?;

    finish_entry(state, &entry).await;
    let entry = refreshed(state, entry).await;
    Ok(format_store_result(&entry, false))
}

/// Embed, rebuild deterministic edges, and enrich. Failures degrade: the
/// entry is stored either way.
pub(crate) async fn finish_entry(state: &AppState, entry: &KnowledgeEntry) {
    embed_entry(state, entry).await;

    if let Err(err) = state.builder().build_for_entry(entry).await {
        warn!("failed to build graph for {}: {err}", entry.id);
    }
    if let Some(enricher) = &state.enricher {
        if let Err(err) = enricher.enrich_entry(entry).await {
            warn!("failed to enrich graph for {}: {err}", entry.id);
        }
    }
}

/// Embed and mark an entry; logs failures without raising.
pub(crate) async fn embed_entry(state: &AppState, entry: &KnowledgeEntry) {
    let Some(embedding) = state.embedder.embed(&entry.embedding_text()).await else {
        return;
    };
    if let Err(err) = state.embedder.store_embedding(&entry.id, &embedding).await {
        warn!("failed to store embedding for {}: {err}", entry.id);
        return;
    }
    if let Err(err) = state.store.mark_embedding(&entry.id, true).await {
        warn!("failed to mark embedding for {}: {err}", entry.id);
    }
}

/// Re-fetch to pick up embedding and enrichment book-keeping.
pub(crate) async fn refreshed(state: &AppState, entry: KnowledgeEntry) -> KnowledgeEntry {
    state
        .store
        .get_entry(&entry.id)
        .await
        .ok()
        .flatten()
        .unwrap_or(entry)
}

pub(crate) fn format_store_result(entry: &KnowledgeEntry, is_update: bool) -> String {
    let action = if is_update { "Updated" } else { "Created" };
    let mut lines = vec![
        format!("{action} entry {} (v{})", entry.id, entry.version),
        format!("  Title: {}", entry.short_title),
        format!("  Type: {}", entry.entry_type),
    ];
    if let Some(project) = &entry.project_ref {
        lines.push(format!("  Project: {project}"));
    }
    if !entry.tags.is_empty() {
        lines.push(format!("  Tags: {}", entry.tags.join(", ")));
    }
    if !entry.has_embedding {
        lines.push(
            "  Note: Entry will be embedded when the embedding service is available".to_string(),
        );
    }
    lines.join("\n")
}
