//! kb_store_batch - create several entries with one enrichment call.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use lore_core::model::{EntryType, KnowledgeEntry};
use lore_core::store::NewEntry;

use crate::formatters::format_entry_compact;
use crate::state::AppState;
use lore_core::confidence::{compute_effective_confidence, decay_anchor};

const MAX_BATCH: usize = 10;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "entries": {
                "type": "array",
                "maxItems": MAX_BATCH,
                "description": "Entry objects (max 10). Each requires short_title, long_title, knowledge_details. Optional: entry_type, project_ref, source_context, confidence_level, tags, hints.",
                "items": {
                    "type": "object",
                    "properties": {
                        "short_title": { "type": "string" },
                        "long_title": { "type": "string" },
                        "knowledge_details": { "type": "string" },
                        "entry_type": {
                            "type": "string",
                            "enum": ["factual_reference", "decision", "pattern_convention", "lesson_learned"]
                        },
                        "project_ref": { "type": "string" },
                        "source_context": { "type": "string" },
                        "confidence_level": { "type": "number" },
                        "tags": { "type": "array", "items": { "type": "string" } },
                        "hints": { "type": "object" }
                    },
                    "required": ["short_title", "long_title", "knowledge_details"]
                }
            }
        },
        "required": ["entries"]
    })
}

#[derive(Debug, Deserialize)]
struct BatchArgs {
    entries: Vec<serde_json::Map<String, Value>>,
}

const REQUIRED_FIELDS: [&str; 3] = ["short_title", "long_title", "knowledge_details"];

pub async fn execute(state: &AppState, args: Option<Value>) -> Result<String, String> {
    let args: BatchArgs = super::parse_args(args)?;

    if args.entries.is_empty() {
        return Err("Error: entries list is empty.".to_string());
    }
    if args.entries.len() > MAX_BATCH {
        return Err(format!(
            "Error: Maximum {MAX_BATCH} entries per batch (got {}).",
            args.entries.len()
        ));
    }

    // Validate everything before storing anything
    for (index, item) in args.entries.iter().enumerate() {
        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| item.get(*field).and_then(Value::as_str).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(format!(
                "Error: entry {index} missing required fields: {}",
                missing.join(", ")
            ));
        }
    }

    let builder = state.builder();
    let mut created: Vec<KnowledgeEntry> = Vec::new();
    for item in &args.entries {
        let entry_type = item
            .get("entry_type")
            .and_then(Value::as_str)
            .and_then(EntryType::parse_name)
            .unwrap_or_default();

        let entry = state
            .store
            .create_entry(NewEntry {
                short_title: field(item, "short_title"),
                long_title: field(item, "long_title"),
                knowledge_details: field(item, "knowledge_details"),
                entry_type,
                project_ref: item.get("project_ref").and_then(Value::as_str).map(str::to_string),
                source_context: item
                    .get("source_context")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                confidence_level: item
                    .get("confidence_level")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.9)
                    .clamp(0.0, 1.0),
                tags: item
                    .get("tags")
                    .and_then(Value::as_array)
                    .map(|tags| {
                        tags.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
                hints: item
                    .get("hints")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
            })
            .await
            .map_err(|err| format!("Error: {err}"))?;

        super::store::embed_entry(state, &entry).await;
        if let Err(err) = builder.build_for_entry(&entry).await {
            warn!("failed to build graph for {}: {err}", entry.id);
        }
        created.push(entry);
    }

    // One LLM call enriches the whole batch
    if let Some(enricher) = &state.enricher {
        if let Err(err) = enricher.enrich_batch(&created).await {
            warn!("batch enrichment failed: {err}");
        }
    }

    let now = chrono::Utc::now();
    let mut formatted = Vec::new();
    for entry in created {
        let entry = super::store::refreshed(state, entry).await;
        let effective = compute_effective_confidence(
            entry.confidence_level,
            entry.entry_type,
            decay_anchor(&entry),
            now,
        );
        formatted.push(format!(
            "Created {} (v{})\n{}",
            entry.id,
            entry.version,
            format_entry_compact(&entry, effective, None)
        ));
    }

    Ok(crate::formatters::format_result_list(
        &formatted,
        Some(&format!("Batch: {} entries created", formatted.len())),
        None,
    ))
}

fn field(item: &serde_json::Map<String, Value>, name: &str) -> String {
    item.get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
