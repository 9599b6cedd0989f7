//! LLM query planner.
//!
//! Translates a natural language question into a structured query plan:
//! one of the fixed strategies plus resolved scope/target node IDs. The
//! per-request context carries graph composition counts and the vocabulary
//! so the model resolves mentions against names that actually exist.

use tracing::warn;

use crate::db::{get_db_stats, Db, DbResult};
use crate::graph::queries::get_graph_vocabulary;
use crate::llm::{parse, Llm, LlmProvider};

const VALID_STRATEGIES: [&str; 5] = ["auto", "decision_trace", "timeline", "related", "connection"];

const SYSTEM_PROMPT: &str = "\
You are a knowledge graph query planner. Given a natural language question and \
a graph vocabulary, choose the best query strategy and resolve entity references.

Available strategies:
- auto: Hybrid search + graph expansion. Best for general questions or when unsure.
- decision_trace: Follow supersedes chains for decision history. Use when the \
question asks about WHY something was decided or how a decision evolved.
- timeline: Chronological entries for a scope. Use when the question asks about \
history, progression, or \"what happened\" in a specific area.
- related: BFS from a starting node. Use when the question asks \"what relates to X\" \
or \"what else uses X\".
- connection: Find paths between two nodes. Use when the question asks how two \
things are connected.

Node ID formats:
- tag:X (e.g., tag:python, tag:sqlite)
- project:X (e.g., project:lore)
- person:X (e.g., person:ada)
- tool:X (e.g., tool:aiosqlite)
- concept:X (e.g., concept:async-io)
- technology:X (e.g., technology:fastapi)
- kb-XXXXX (entry IDs)

Output a single JSON object:
{
  \"strategy\": \"auto|decision_trace|timeline|related|connection\",
  \"scope\": \"resolved node ID or null\",
  \"target\": \"second node ID (connection only) or null\",
  \"search_query\": \"refined search terms or null\",
  \"reasoning\": \"brief explanation of your choice\"
}

Rules:
- Choose ONE strategy. When in doubt, use \"auto\".
- Resolve mentions to exact node IDs from the vocabulary provided.
- For \"auto\", provide a refined search_query if the original question is verbose.
- For \"related\" and \"timeline\", scope is required.
- For \"connection\", both scope and target are required.
- If you can't resolve a mention to a known node, use \"auto\" instead.";

/// Result of query planning: a structured graph query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPlan {
    pub strategy: String,
    pub scope: Option<String>,
    pub target: Option<String>,
    pub search_query: Option<String>,
    pub reasoning: Option<String>,
}

/// Translates natural language questions into structured query plans.
pub struct QueryPlanner {
    db: Db,
    llm: Llm,
}

impl QueryPlanner {
    pub fn new(db: Db, llm: Llm) -> Self {
        Self { db, llm }
    }

    /// Generate a query plan for a question. `None` on any failure; the
    /// caller falls back to a raw `auto` run.
    pub async fn plan(&self, question: &str) -> DbResult<Option<QueryPlan>> {
        let context = self.build_context(question).await?;
        let Some(raw) = self.llm.generate(&context, Some(SYSTEM_PROMPT)).await else {
            return Ok(None);
        };
        Ok(parse_plan(&raw))
    }

    /// Per-request context: graph composition and vocabulary.
    async fn build_context(&self, question: &str) -> DbResult<String> {
        let stats = get_db_stats(self.db.as_ref()).await?;
        let mut parts = vec![
            "Graph stats:".to_string(),
            format!("  Nodes by type: {}", counts_json(&stats.graph_nodes_by_type)),
            format!("  Edges by type: {}", counts_json(&stats.graph_edges_by_type)),
            format!("  Active entries: {}", stats.active_entries),
        ];

        let vocab = get_graph_vocabulary(self.db.as_ref(), 200).await?;
        if !vocab.is_empty() {
            parts.push("\nGraph vocabulary (available node names by type):".to_string());
            let mut sorted = vocab;
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            for (node_type, names) in sorted {
                parts.push(format!("  {}: {}", node_type, names.join(", ")));
            }
        }

        parts.push(format!("\nQuestion: {question}"));
        Ok(parts.join("\n"))
    }
}

fn counts_json(counts: &[(String, i64)]) -> String {
    let map: serde_json::Map<String, serde_json::Value> = counts
        .iter()
        .map(|(name, count)| (name.clone(), serde_json::Value::from(*count)))
        .collect();
    serde_json::Value::Object(map).to_string()
}

/// Parse an LLM response into a plan. Invalid strategies fall back to
/// `auto`; unparseable responses yield `None`.
fn parse_plan(raw: &str) -> Option<QueryPlan> {
    let map = match parse::extract_json_object(raw) {
        Some(map) => map,
        None => {
            warn!("no JSON object found in planner response");
            return None;
        }
    };

    let get_str = |key: &str| {
        map.get(key)
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let mut strategy = get_str("strategy").unwrap_or_else(|| "auto".to_string());
    if !VALID_STRATEGIES.contains(&strategy.as_str()) {
        warn!("invalid strategy '{strategy}' from planner, falling back to auto");
        strategy = "auto".to_string();
    }

    Some(QueryPlan {
        strategy,
        scope: get_str("scope"),
        target: get_str("target"),
        search_query: get_str("search_query"),
        reasoning: get_str("reasoning"),
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_plan() {
        let plan = parse_plan(
            r#"{"strategy": "timeline", "scope": "project:lore", "target": null,
                "search_query": null, "reasoning": "history question"}"#,
        )
        .unwrap();
        assert_eq!(plan.strategy, "timeline");
        assert_eq!(plan.scope.as_deref(), Some("project:lore"));
        assert_eq!(plan.target, None);
    }

    #[test]
    fn test_invalid_strategy_falls_back_to_auto() {
        let plan = parse_plan(r#"{"strategy": "teleport", "scope": "tag:x"}"#).unwrap();
        assert_eq!(plan.strategy, "auto");
        assert_eq!(plan.scope.as_deref(), Some("tag:x"));
    }

    #[test]
    fn test_unparseable_response_is_none() {
        assert!(parse_plan("the best strategy is probably auto").is_none());
    }

    #[test]
    fn test_fenced_plan_parses() {
        let plan = parse_plan("```json\n{\"strategy\": \"related\", \"scope\": \"tool:redis\"}\n```")
            .unwrap();
        assert_eq!(plan.strategy, "related");
    }
}
