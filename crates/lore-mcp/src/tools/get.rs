//! kb_get - full entry retrieval by ID.

use serde::Deserialize;
use serde_json::Value;

use crate::formatters::{format_entry_full, format_result_list};
use crate::state::AppState;

const MAX_IDS: usize = 20;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "entry_id": {
                "description": "Single entry ID or list of IDs (max 20)",
                "anyOf": [
                    { "type": "string" },
                    { "type": "array", "items": { "type": "string" }, "maxItems": MAX_IDS }
                ]
            }
        },
        "required": ["entry_id"]
    })
}

#[derive(Debug, Deserialize)]
struct GetArgs {
    entry_id: Value,
}

pub async fn execute(state: &AppState, args: Option<Value>) -> Result<String, String> {
    let args: GetArgs = super::parse_args(args)?;

    let ids: Vec<String> = match args.entry_id {
        Value::String(id) => vec![id],
        Value::Array(values) => values
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => return Err("Error: entry_id must be a string or an array of strings".to_string()),
    };
    if ids.is_empty() {
        return Err("Error: entry_id is required".to_string());
    }
    if ids.len() > MAX_IDS {
        return Err(format!(
            "Error: Maximum {MAX_IDS} IDs per request (got {}).",
            ids.len()
        ));
    }

    let mut formatted = Vec::new();
    let mut accessed = Vec::new();
    for id in &ids {
        match state.store.get_entry(id).await {
            Ok(Some(entry)) if entry.is_active => {
                formatted.push(format_entry_full(&entry, None));
                accessed.push(id.clone());
            }
            Ok(_) => formatted.push(format!("[{id}] not found")),
            Err(err) => return Err(format!("Error: {err}")),
        }
    }

    // Only found-and-active entries count as accessed
    if !accessed.is_empty() {
        state
            .store
            .touch_accessed(&accessed)
            .await
            .map_err(|err| format!("Error: {err}"))?;
    }

    Ok(format_result_list(&formatted, None, None))
}
