//! kb_ask - graph traversal strategies.
//!
//! Dispatches to one of the fixed strategies; `auto` optionally consults
//! the LLM planner, which can re-route the question to a better strategy
//! and resolve entity mentions to node IDs.

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use lore_core::confidence::{compute_effective_confidence, decay_anchor, staleness_warning};
use lore_core::db::{self, DbResult, FtsFilters};
use lore_core::graph::queries::{
    bfs_entries, entries_for_scope, find_path, get_neighbors, is_entry_id, supersedes_chain,
    Direction,
};
use lore_core::graph::QueryPlanner;
use lore_core::model::{KnowledgeEntry, SearchQuery};
use lore_core::search::{fts_search, hybrid_search};

use crate::state::AppState;

const STRATEGIES: [&str; 5] = ["auto", "connection", "decision_trace", "related", "timeline"];

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "question": {
                "type": "string",
                "description": "Natural language question or keywords"
            },
            "strategy": {
                "type": "string",
                "enum": ["auto", "decision_trace", "timeline", "related", "connection"],
                "description": "auto: hybrid search + graph expansion; decision_trace: supersedes chains; timeline: chronological scope; related: BFS from a node; connection: path between two nodes",
                "default": "auto"
            },
            "scope": {
                "type": "string",
                "description": "Filter: \"project:X\", \"tag:Y\", an entry ID, or a node ID"
            },
            "target": {
                "type": "string",
                "description": "Second node for the 'connection' strategy"
            },
            "include_graph_context": {
                "type": "boolean",
                "description": "Expand results with graph neighbors",
                "default": true
            },
            "limit": {
                "type": "integer",
                "description": "Max results",
                "default": 20,
                "minimum": 1,
                "maximum": 50
            }
        },
        "required": ["question"]
    })
}

#[derive(Debug, Deserialize)]
struct AskArgs {
    question: String,
    strategy: Option<String>,
    scope: Option<String>,
    target: Option<String>,
    include_graph_context: Option<bool>,
    limit: Option<i64>,
}

pub async fn execute(state: &AppState, args: Option<Value>) -> Result<String, String> {
    let args: AskArgs = super::parse_args(args)?;
    let strategy = args.strategy.unwrap_or_else(|| "auto".to_string());
    let limit = args.limit.unwrap_or(20).clamp(1, 50) as usize;
    let include_graph_context = args.include_graph_context.unwrap_or(true);

    if !STRATEGIES.contains(&strategy.as_str()) {
        return Err(format!(
            "Unknown strategy '{}'. Use: {}",
            strategy,
            STRATEGIES.join(", ")
        ));
    }

    let result = match strategy.as_str() {
        "auto" => {
            strategy_auto_with_planner(
                state,
                &args.question,
                args.scope.as_deref(),
                include_graph_context,
                limit,
            )
            .await
        }
        "decision_trace" => {
            strategy_decision_trace(state, &args.question, args.scope.as_deref(), limit).await
        }
        "timeline" => strategy_timeline(state, args.scope.as_deref(), limit).await,
        "related" => strategy_related(state, args.scope.as_deref(), limit).await,
        "connection" => {
            strategy_connection(state, args.scope.as_deref(), args.target.as_deref()).await
        }
        _ => unreachable!("strategy validated above"),
    };

    result.map_err(|err| format!("Error: {err}"))
}

/// Auto with an optional LLM plan: a non-auto plan re-routes the question,
/// an auto plan may still contribute a refined search query.
async fn strategy_auto_with_planner(
    state: &AppState,
    question: &str,
    scope: Option<&str>,
    include_graph_context: bool,
    limit: usize,
) -> DbResult<String> {
    let plan = match &state.query_llm {
        Some(llm) => {
            let planner = QueryPlanner::new(state.db.clone(), llm.clone());
            let plan = planner.plan(question).await?;
            debug!("query plan: {plan:?}");
            plan
        }
        None => None,
    };

    if let Some(plan) = &plan {
        if plan.strategy != "auto" {
            let mut header = format!("[Planned: {}]", plan.strategy);
            if let Some(reasoning) = &plan.reasoning {
                header.push_str(&format!(" {reasoning}"));
            }
            header.push_str("\n\n");

            let plan_scope = plan.scope.as_deref().or(scope);
            let body = match plan.strategy.as_str() {
                "decision_trace" => {
                    let question = plan.search_query.as_deref().unwrap_or(question);
                    strategy_decision_trace(state, question, plan_scope, limit).await?
                }
                "timeline" => strategy_timeline(state, plan_scope, limit).await?,
                "related" => strategy_related(state, plan_scope, limit).await?,
                "connection" => {
                    strategy_connection(state, plan_scope, plan.target.as_deref()).await?
                }
                _ => unreachable!("planner strategies are validated"),
            };
            return Ok(header + &body);
        }
    }

    let search_query = plan
        .as_ref()
        .and_then(|p| p.search_query.as_deref())
        .unwrap_or(question);
    strategy_auto(state, search_query, include_graph_context, limit).await
}

/// Hybrid search, optionally expanded one hop through the graph.
pub(crate) async fn strategy_auto(
    state: &AppState,
    question: &str,
    include_graph_context: bool,
    limit: usize,
) -> DbResult<String> {
    let results = hybrid_search(
        state.db.as_ref(),
        Some(&state.embedder),
        &SearchQuery {
            query: question.to_string(),
            limit,
            ..Default::default()
        },
    )
    .await?;

    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut entries: Vec<(KnowledgeEntry, String)> = Vec::new();
    for result in &results {
        seen.insert(result.entry.id.clone());
        entries.push((
            result.entry.clone(),
            format!("search match (score: {:.4})", result.score),
        ));
    }

    if include_graph_context && !results.is_empty() {
        'expand: for result in &results {
            let neighbors =
                get_neighbors(state.db.as_ref(), &result.entry.id, None, Direction::Both, 10)
                    .await?;
            for (neighbor, edge_type, direction) in neighbors {
                if !is_entry_id(&neighbor) || seen.contains(&neighbor) {
                    continue;
                }
                let Some(entry) = db::get_entry(state.db.as_ref(), &neighbor).await? else {
                    continue;
                };
                if !entry.is_active {
                    continue;
                }
                seen.insert(neighbor);
                let context = match direction {
                    Direction::Outgoing => {
                        format!("linked from {} via {edge_type}", result.entry.id)
                    }
                    _ => format!("links to {} via {edge_type}", result.entry.id),
                };
                entries.push((entry, context));
                if entries.len() >= limit {
                    break 'expand;
                }
            }
        }
    }

    if entries.is_empty() {
        return Ok("No results found.".to_string());
    }
    Ok(format_entries(&entries, &format!("Auto search: {question}")))
}

/// Decision entries matching the question, each expanded to its full
/// supersedes chain with per-step context.
async fn strategy_decision_trace(
    state: &AppState,
    question: &str,
    scope: Option<&str>,
    limit: usize,
) -> DbResult<String> {
    let filters = FtsFilters {
        entry_type: Some("decision".to_string()),
        ..Default::default()
    };
    let mut matches = fts_search(state.db.as_ref(), question, &filters, limit as i64).await;

    if matches.is_empty() {
        if let Some(scope) = scope {
            let ids = entries_for_scope(state.db.as_ref(), scope, Some("decision"), "created_at")
                .await?;
            matches = ids.into_iter().take(limit).map(|id| (id, 0.0)).collect();
        }
    }

    if matches.is_empty() {
        return Ok("No decision entries found matching the query.".to_string());
    }

    let mut seen_chains: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut entries: Vec<(KnowledgeEntry, String)> = Vec::new();

    'outer: for (entry_id, _score) in matches {
        if seen_chains.contains(&entry_id) {
            continue;
        }
        let chain = supersedes_chain(state.db.as_ref(), &entry_id).await?;
        for id in &chain {
            seen_chains.insert(id.clone());
        }

        for (index, id) in chain.iter().enumerate() {
            let Some(entry) = db::get_entry(state.db.as_ref(), id).await? else {
                continue;
            };
            let context = if chain.len() == 1 {
                "current decision".to_string()
            } else if index == 0 {
                "original decision".to_string()
            } else if index == chain.len() - 1 {
                format!("current (supersedes {})", chain[index - 1])
            } else {
                format!("supersedes {}", chain[index - 1])
            };
            entries.push((entry, context));
            if entries.len() >= limit {
                break 'outer;
            }
        }
    }

    if entries.is_empty() {
        return Ok("No decision entries found matching the query.".to_string());
    }
    Ok(format_entries(&entries, &format!("Decision trace: {question}")))
}

/// Chronological entries for a scope.
async fn strategy_timeline(state: &AppState, scope: Option<&str>, limit: usize) -> DbResult<String> {
    let Some(scope) = scope else {
        return Ok("Timeline strategy requires a scope (e.g. project:X, tag:Y, decision).".to_string());
    };

    let entry_ids = entries_for_scope(state.db.as_ref(), scope, None, "created_at").await?;
    if entry_ids.is_empty() {
        return Ok(format!("No entries found for scope: {scope}"));
    }

    let mut entries: Vec<(KnowledgeEntry, String)> = Vec::new();
    for id in entry_ids.iter().take(limit) {
        let Some(entry) = db::get_entry(state.db.as_ref(), id).await? else {
            continue;
        };
        if !entry.is_active {
            continue;
        }
        let date = entry.created_at.format("%Y-%m-%d").to_string();
        entries.push((entry, format!("created {date}")));
    }

    if entries.is_empty() {
        return Ok(format!("No active entries found for scope: {scope}"));
    }
    Ok(format_entries(&entries, &format!("Timeline: {scope}")))
}

/// BFS to depth 2 from the scope node.
async fn strategy_related(state: &AppState, scope: Option<&str>, limit: usize) -> DbResult<String> {
    let Some(scope) = scope else {
        return Ok("Related strategy requires a scope (entry ID or node ID like tag:python).".to_string());
    };

    let reached = bfs_entries(state.db.as_ref(), scope, 2, None, limit).await?;
    if reached.is_empty() {
        return Ok(format!("No related entries found from: {scope}"));
    }

    let mut entries: Vec<(KnowledgeEntry, String)> = Vec::new();
    for (entry_id, depth, path) in reached {
        let Some(entry) = db::get_entry(state.db.as_ref(), &entry_id).await? else {
            continue;
        };
        if !entry.is_active {
            continue;
        }
        let context = if depth == 1 {
            "directly connected".to_string()
        } else {
            let intermediates: Vec<&str> = path[1..path.len() - 1]
                .iter()
                .map(String::as_str)
                .filter(|node| !is_entry_id(node))
                .collect();
            if intermediates.is_empty() {
                format!("connected (depth {depth})")
            } else {
                format!("connected via {}", intermediates.join(", "))
            }
        };
        entries.push((entry, context));
    }

    if entries.is_empty() {
        return Ok(format!("No related entries found from: {scope}"));
    }
    Ok(format_entries(&entries, &format!("Related to: {scope}")))
}

/// Shortest path between two nodes, rendered step by step.
async fn strategy_connection(
    state: &AppState,
    scope: Option<&str>,
    target: Option<&str>,
) -> DbResult<String> {
    let (Some(scope), Some(target)) = (scope, target) else {
        return Ok("Connection strategy requires both scope and target parameters.".to_string());
    };

    let Some(path) = find_path(state.db.as_ref(), scope, target, 4).await? else {
        return Ok(format!(
            "No connection found between {scope} and {target} (max depth: 4)."
        ));
    };
    if path.is_empty() {
        return Ok(format!("{scope} and {target} are the same node."));
    }

    let mut lines = vec![format!("Connection: {scope} -> {target}\n"), "Path:".to_string()];
    for (index, (src, edge_type, tgt)) in path.iter().enumerate() {
        lines.push(format!("  {}. {src} --[{edge_type}]--> {tgt}", index + 1));
    }

    // Entries along the path, with decayed confidence
    let mut entry_ids: Vec<&str> = Vec::new();
    for (src, _edge, tgt) in &path {
        for node in [src.as_str(), tgt.as_str()] {
            if is_entry_id(node) && !entry_ids.contains(&node) {
                entry_ids.push(node);
            }
        }
    }
    entry_ids.sort_unstable();

    if !entry_ids.is_empty() {
        lines.push("\nEntries along the path:".to_string());
        let now = Utc::now();
        for id in entry_ids {
            let Some(entry) = db::get_entry(state.db.as_ref(), id).await? else {
                continue;
            };
            let effective = compute_effective_confidence(
                entry.confidence_level,
                entry.entry_type,
                decay_anchor(&entry),
                now,
            );
            lines.push(format!(
                "  [{}] {}: {} ({:.0}%)",
                entry.id,
                entry.entry_type,
                entry.short_title,
                effective * 100.0
            ));
        }
    }

    Ok(lines.join("\n"))
}

/// Render `(entry, context)` pairs with decay, warnings, and details.
pub(crate) fn format_entries(entries: &[(KnowledgeEntry, String)], header: &str) -> String {
    let now = Utc::now();
    let mut lines = vec![format!("{header}\n"), format!("Found {} result(s):\n", entries.len())];

    for (entry, context) in entries {
        let effective = compute_effective_confidence(
            entry.confidence_level,
            entry.entry_type,
            decay_anchor(entry),
            now,
        );
        lines.push(format!(
            "[{}] {}: {} ({:.0}%)",
            entry.id,
            entry.entry_type,
            entry.short_title,
            effective * 100.0
        ));
        lines.push(format!("  \u{21b3} {context}"));
        if !entry.tags.is_empty() {
            lines.push(format!("  Tags: {}", entry.tags.join(", ")));
        }
        if let Some(warning) = staleness_warning(effective, entry.entry_type) {
            lines.push(format!("  WARNING: {warning}"));
        }
        lines.push(format!("  {}", entry.knowledge_details));
        lines.push(String::new());
    }

    lines.join("\n")
}
