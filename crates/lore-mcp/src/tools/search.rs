//! kb_search - hybrid FTS + vector search with graph hints.

use serde::Deserialize;
use serde_json::Value;

use lore_core::db;
use lore_core::graph::queries::{get_neighbors, is_entry_id, Direction};
use lore_core::model::{EntryType, SearchQuery, SearchResult};
use lore_core::search::hybrid_search;

use crate::formatters::{format_entry_compact, format_result_list};
use crate::state::AppState;

/// Below this many results, graph hints top up the response.
const HINT_THRESHOLD: usize = 3;
const MAX_HINTS: usize = 3;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "Search query (natural language or keywords)"
            },
            "project_ref": {
                "type": "string",
                "description": "Filter to a specific project"
            },
            "entry_type": {
                "type": "string",
                "enum": ["factual_reference", "decision", "pattern_convention", "lesson_learned"],
                "description": "Filter by entry type"
            },
            "tags": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Filter by tags (all must match)"
            },
            "limit": {
                "type": "integer",
                "description": "Maximum results to return (1-50)",
                "default": 10,
                "minimum": 1,
                "maximum": 50
            },
            "include_stale": {
                "type": "boolean",
                "description": "Include entries with very low effective confidence",
                "default": false
            }
        },
        "required": ["query"]
    })
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    project_ref: Option<String>,
    entry_type: Option<String>,
    tags: Option<Vec<String>>,
    limit: Option<i64>,
    include_stale: Option<bool>,
}

pub async fn execute(state: &AppState, args: Option<Value>) -> Result<String, String> {
    let args: SearchArgs = super::parse_args(args)?;

    let entry_type = match &args.entry_type {
        Some(name) => match EntryType::parse_name(name) {
            Some(parsed) => Some(parsed),
            None => {
                return Err(format!(
                    "Error: invalid entry_type '{}'. Use: {}",
                    name,
                    EntryType::NAMES.join(", ")
                ))
            }
        },
        None => None,
    };

    let query = SearchQuery {
        query: args.query,
        project_ref: args.project_ref,
        entry_type,
        tags: args.tags,
        limit: args.limit.unwrap_or(10).clamp(1, 50) as usize,
        include_stale: args.include_stale.unwrap_or(false),
    };

    let results = hybrid_search(state.db.as_ref(), Some(&state.embedder), &query)
        .await
        .map_err(|err| format!("Error: {err}"))?;

    let note = if !state.embedder.is_available().await {
        Some("Vector search unavailable (embedding service offline). Results are FTS-only.")
    } else {
        None
    };

    let formatted: Vec<String> = results
        .iter()
        .map(|r| format_entry_compact(&r.entry, r.effective_confidence, r.staleness_warning.as_deref()))
        .collect();
    let mut output = format_result_list(&formatted, None, note);

    // Sparse results: surface related entries reachable through the graph
    if results.len() < HINT_THRESHOLD {
        let hints = graph_hints(state, &results, MAX_HINTS)
            .await
            .unwrap_or_default();
        if !hints.is_empty() {
            output.push_str("\n\nRelated entries via graph:\n");
            output.push_str(&hints.join("\n"));
        }
    }

    Ok(output)
}

/// Entries connected to the results through shared tag/project/person/tool
/// nodes, excluding the results themselves.
async fn graph_hints(
    state: &AppState,
    results: &[SearchResult],
    max_hints: usize,
) -> lore_core::db::DbResult<Vec<String>> {
    let mut seen: std::collections::HashSet<String> =
        results.iter().map(|r| r.entry.id.clone()).collect();
    let mut hints = Vec::new();

    for result in results {
        let anchors =
            get_neighbors(state.db.as_ref(), &result.entry.id, None, Direction::Outgoing, 20)
                .await?;
        for (anchor, _edge_type, _) in anchors {
            if is_entry_id(&anchor) {
                continue;
            }
            let connected =
                get_neighbors(state.db.as_ref(), &anchor, None, Direction::Incoming, 20).await?;
            for (candidate, via_edge, _) in connected {
                if !is_entry_id(&candidate) || !seen.insert(candidate.clone()) {
                    continue;
                }
                let Some(entry) = db::get_entry(state.db.as_ref(), &candidate).await? else {
                    continue;
                };
                if !entry.is_active {
                    continue;
                }
                hints.push(format!(
                    "  [{}] {} via {} ({})",
                    entry.id, entry.short_title, anchor, via_edge
                ));
                if hints.len() >= max_hints {
                    return Ok(hints);
                }
            }
        }
    }

    Ok(hints)
}
