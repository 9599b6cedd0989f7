//! kb_summarize - synthesized answers with citations.

use serde::Deserialize;
use serde_json::Value;

use lore_core::llm::LlmProvider;

use crate::state::AppState;

const SYNTHESIS_SYSTEM_PROMPT: &str = "\
You are a knowledge base assistant. Given a question and a set of retrieved \
knowledge entries, synthesize a clear, concise answer.

Rules:
- Answer ONLY from the provided entries. Do not use outside knowledge.
- Cite entry IDs in [kb-XXXXX] format when referencing specific entries.
- If entries contain conflicting information, note the conflict and cite both.
- If no entries are relevant to the question, say so clearly.
- Be concise. Prefer bullet points for multi-part answers.
- Do not repeat the question back.";

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "question": {
                "type": "string",
                "description": "Natural language question"
            },
            "scope": {
                "type": "string",
                "description": "Optional filter (project:X, tag:Y, etc.)"
            },
            "limit": {
                "type": "integer",
                "description": "Max entries to retrieve",
                "default": 20,
                "minimum": 1,
                "maximum": 50
            }
        },
        "required": ["question"]
    })
}

#[derive(Debug, Deserialize)]
struct SummarizeArgs {
    question: String,
    #[allow(dead_code)]
    scope: Option<String>,
    limit: Option<i64>,
}

pub async fn execute(state: &AppState, args: Option<Value>) -> Result<String, String> {
    let args: SummarizeArgs = super::parse_args(args)?;
    let limit = args.limit.unwrap_or(20).clamp(1, 50) as usize;

    // Retrieve with the auto strategy, graph expansion included
    let raw_results = super::ask::strategy_auto(state, &args.question, true, limit)
        .await
        .map_err(|err| format!("Error: {err}"))?;

    if raw_results == "No results found." {
        return Ok("No entries found matching your question.".to_string());
    }

    let Some(llm) = &state.query_llm else {
        return Ok(format!("(LLM unavailable - showing raw results)\n\n{raw_results}"));
    };

    let prompt = format!(
        "Question: {}\n\nRetrieved entries:\n{raw_results}",
        args.question
    );
    match llm.generate(&prompt, Some(SYNTHESIS_SYSTEM_PROMPT)).await {
        Some(synthesis) => Ok(synthesis),
        None => Ok(format!(
            "(LLM synthesis failed - showing raw results)\n\n{raw_results}"
        )),
    }
}
