//! Tool surface: stateless handlers over the shared [`AppState`].
//!
//! Each module exposes `schema()` (the tool's JSON input schema) and
//! `execute()` returning `Result<String, String>`; the Err side becomes an
//! error content block. Nothing below a handler escapes the tool boundary:
//! typed degradations render as plain lines, anything else as `Error: ...`.

pub mod ask;
pub mod get;
pub mod ingest;
pub mod maintain;
pub mod search;
pub mod store;
pub mod store_batch;
pub mod summarize;

use crate::protocol::messages::ToolDescription;
use crate::state::AppState;

/// Deserialize tool arguments, mapping both missing and malformed
/// arguments to a user-visible error line.
pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(
    args: Option<serde_json::Value>,
) -> Result<T, String> {
    match args {
        Some(value) => {
            serde_json::from_value(value).map_err(|err| format!("Invalid arguments: {err}"))
        }
        None => serde_json::from_value(serde_json::json!({}))
            .map_err(|err| format!("Invalid arguments: {err}")),
    }
}

/// Descriptions for `tools/list`.
pub fn descriptions() -> Vec<ToolDescription> {
    vec![
        ToolDescription {
            name: "kb_store".to_string(),
            description: Some(
                "Store, update, or deactivate a knowledge entry. Every update creates a \
                 version record. Entries are indexed for full-text and (when the embedding \
                 service is up) vector search, and their graph edges are rebuilt."
                    .to_string(),
            ),
            input_schema: store::schema(),
        },
        ToolDescription {
            name: "kb_store_batch".to_string(),
            description: Some(
                "Store up to 10 entries in one call. More efficient than repeated kb_store: \
                 graph enrichment runs as a single LLM call across the batch."
                    .to_string(),
            ),
            input_schema: store_batch::schema(),
        },
        ToolDescription {
            name: "kb_search".to_string(),
            description: Some(
                "Hybrid search (BM25 + vector similarity fused with RRF) with confidence \
                 decay. Best for quick lookups and tag/project/type filtering; sparse \
                 result sets are topped up with graph hints."
                    .to_string(),
            ),
            input_schema: search::schema(),
        },
        ToolDescription {
            name: "kb_get".to_string(),
            description: Some(
                "Retrieve full details for one or more entries by ID (max 20). Marks the \
                 entries as accessed, which resets their confidence decay."
                    .to_string(),
            ),
            input_schema: get::schema(),
        },
        ToolDescription {
            name: "kb_ask".to_string(),
            description: Some(
                "Answer questions by traversing the knowledge graph combined with search. \
                 Strategies: auto (hybrid + graph expansion), decision_trace (supersedes \
                 chains), timeline (chronological scope), related (BFS), connection \
                 (path between two nodes)."
                    .to_string(),
            ),
            input_schema: ask::schema(),
        },
        ToolDescription {
            name: "kb_summarize".to_string(),
            description: Some(
                "Answer a question with a synthesized response citing entry IDs in \
                 [kb-XXXXX] format. Falls back to raw results when no LLM is available."
                    .to_string(),
            ),
            input_schema: summarize::schema(),
        },
        ToolDescription {
            name: "kb_ingest".to_string(),
            description: Some(
                "Ingest files from disk: deny-list and secret checks, PII redaction, LLM \
                 summarization, and structured entry extraction. Accepts a file, directory, \
                 or glob pattern."
                    .to_string(),
            ),
            input_schema: ingest::schema(),
        },
        ToolDescription {
            name: "kb_maintain".to_string(),
            description: Some(
                "Administrative maintenance (requires KB_MANAGER=TRUE): stats, deactivate, \
                 reactivate, rebuild_embeddings, rebuild_graph, purge_inactive, vacuum, \
                 entry_versions."
                    .to_string(),
            ),
            input_schema: maintain::schema(),
        },
    ]
}

/// Dispatch a tool call by name.
pub async fn call(
    state: &AppState,
    name: &str,
    arguments: Option<serde_json::Value>,
) -> Result<String, String> {
    match name {
        "kb_store" => store::execute(state, arguments).await,
        "kb_store_batch" => store_batch::execute(state, arguments).await,
        "kb_search" => search::execute(state, arguments).await,
        "kb_get" => get::execute(state, arguments).await,
        "kb_ask" => ask::execute(state, arguments).await,
        "kb_summarize" => summarize::execute(state, arguments).await,
        "kb_ingest" => ingest::execute(state, arguments).await,
        "kb_maintain" => maintain::execute(state, arguments).await,
        other => Err(format!("Unknown tool: {other}")),
    }
}
