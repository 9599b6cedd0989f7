//! LLM-based file summarization and structured entry extraction.

use serde_json::Value;
use tracing::warn;

use crate::llm::{parse, LlmProvider};
use crate::model::EntryType;

/// Content cap before prompting (~25K tokens).
const MAX_CONTENT_CHARS: usize = 100_000;

const MAX_ENTRIES_PER_FILE: usize = 10;

const SUMMARIZE_SYSTEM: &str = "\
You are a knowledge base assistant. Given a file's path and content, write a \
2-3 sentence summary describing what knowledge this file contains and why it \
might be useful to recall later.

Be specific and factual. Focus on WHAT the file teaches, not how it's formatted. \
Return ONLY the summary text, no JSON, no markdown formatting.";

const EXTRACT_SYSTEM: &str = "\
You are a knowledge extraction system. Given a file, extract discrete knowledge \
entries suitable for a personal knowledge base.

Return ONLY a JSON array. Each object has:
- \"short_title\": brief identifier (3-8 words)
- \"long_title\": descriptive title (1 sentence)
- \"knowledge_details\": the actual knowledge content (detailed, self-contained)
- \"entry_type\": one of: factual_reference, decision, pattern_convention, lesson_learned
- \"tags\": list of lowercase tag strings (2-5 tags)

Rules:
- Extract 1-10 entries per file. Only extract genuinely useful knowledge.
- Each entry must be SELF-CONTAINED - understandable without the source file.
- Prefer specific, actionable knowledge over vague summaries.
- entry_type must be one of: factual_reference, decision, pattern_convention, lesson_learned.
- Skip boilerplate, TODOs, and trivial content.
- Return [] if the file has no extractable knowledge.

Example output:
[
  {
    \"short_title\": \"WAL mode for concurrent reads\",
    \"long_title\": \"SQLite WAL journal mode allows readers during writes\",
    \"knowledge_details\": \"Enable with PRAGMA journal_mode=WAL before heavy read traffic.\",
    \"entry_type\": \"lesson_learned\",
    \"tags\": [\"sqlite\", \"wal\", \"concurrency\"]
  }
]";

/// A knowledge entry extracted from a file by the LLM.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEntry {
    pub short_title: String,
    pub long_title: String,
    pub knowledge_details: String,
    pub entry_type: EntryType,
    pub tags: Vec<String>,
}

fn truncated(content: &str) -> String {
    content.chars().take(MAX_CONTENT_CHARS).collect()
}

/// Generate a 2-3 sentence summary of a file's knowledge content.
/// `None` when the LLM is unavailable or fails.
pub async fn summarize_file(
    llm: &dyn LlmProvider,
    file_path: &str,
    content: &str,
) -> Option<String> {
    if !llm.is_available().await {
        return None;
    }
    let prompt = format!("File: {file_path}\n\n{}", truncated(content));
    llm.generate(&prompt, Some(SUMMARIZE_SYSTEM)).await
}

/// Extract structured knowledge entries from a file. Empty when the LLM is
/// unavailable or extraction fails.
pub async fn extract_entries(
    llm: &dyn LlmProvider,
    file_path: &str,
    content: &str,
) -> Vec<ExtractedEntry> {
    if !llm.is_available().await {
        return Vec::new();
    }
    let prompt = format!("File: {file_path}\n\n{}", truncated(content));
    let Some(raw) = llm.generate(&prompt, Some(EXTRACT_SYSTEM)).await else {
        return Vec::new();
    };
    parse_entries(&raw)
}

/// Parse an LLM response into validated entries, capped at
/// [`MAX_ENTRIES_PER_FILE`]. Items with invalid types are skipped.
pub fn parse_entries(raw: &str) -> Vec<ExtractedEntry> {
    let Some(items) = parse::extract_json_array(raw) else {
        warn!("no JSON array found in extraction response");
        return Vec::new();
    };

    let mut results = Vec::new();
    for item in items {
        let Value::Object(map) = item else { continue };

        let (Some(short_title), Some(long_title), Some(knowledge_details), Some(entry_type)) = (
            map.get("short_title").and_then(Value::as_str),
            map.get("long_title").and_then(Value::as_str),
            map.get("knowledge_details").and_then(Value::as_str),
            map.get("entry_type").and_then(Value::as_str),
        ) else {
            continue;
        };

        let Some(entry_type) = EntryType::parse_name(entry_type) else {
            continue;
        };

        let tags = map
            .get("tags")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|t| t.to_lowercase())
                    .collect()
            })
            .unwrap_or_default();

        results.push(ExtractedEntry {
            short_title: short_title.to_string(),
            long_title: long_title.to_string(),
            knowledge_details: knowledge_details.to_string(),
            entry_type,
            tags,
        });

        if results.len() >= MAX_ENTRIES_PER_FILE {
            break;
        }
    }
    results
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_entries() {
        let raw = r#"[
            {"short_title": "a", "long_title": "b", "knowledge_details": "c",
             "entry_type": "decision", "tags": ["X", "y"]},
            {"short_title": "d", "long_title": "e", "knowledge_details": "f",
             "entry_type": "lesson_learned"}
        ]"#;
        let entries = parse_entries(raw);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entry_type, EntryType::Decision);
        assert_eq!(entries[0].tags, vec!["x", "y"], "tags are lowercased");
        assert!(entries[1].tags.is_empty());
    }

    #[test]
    fn test_parse_skips_invalid_types() {
        let raw = r#"[
            {"short_title": "ok", "long_title": "ok", "knowledge_details": "ok",
             "entry_type": "decision", "tags": []},
            {"short_title": "bad", "long_title": "bad", "knowledge_details": "bad",
             "entry_type": "prophecy", "tags": []},
            {"long_title": "missing short title", "knowledge_details": "x",
             "entry_type": "decision"},
            "not an object"
        ]"#;
        let entries = parse_entries(raw);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].short_title, "ok");
    }

    #[test]
    fn test_parse_caps_at_ten() {
        let items: Vec<String> = (0..15)
            .map(|i| {
                format!(
                    r#"{{"short_title": "t{i}", "long_title": "l", "knowledge_details": "d",
                        "entry_type": "factual_reference", "tags": []}}"#
                )
            })
            .collect();
        let raw = format!("[{}]", items.join(","));
        assert_eq!(parse_entries(&raw).len(), 10);
    }

    #[test]
    fn test_parse_fenced_response() {
        let raw = "Sure!\n```json\n[{\"short_title\": \"a\", \"long_title\": \"b\", \"knowledge_details\": \"c\", \"entry_type\": \"decision\", \"tags\": []}]\n```";
        assert_eq!(parse_entries(raw).len(), 1);
    }
}
