//! Robust extraction of JSON from LLM responses.
//!
//! Models wrap JSON in markdown fences, surround it with prose, or prefix
//! it with a `<think>...</think>` block. These helpers strip all of that,
//! locate the outermost array or object, and parse it; callers validate
//! field types and silently skip invalid elements.

use regex::Regex;
use std::sync::OnceLock;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("valid regex"))
}

fn think_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"))
}

/// Strip `<think>` blocks and unwrap the first fenced block, if any.
fn clean(raw: &str) -> String {
    let without_think = think_re().replace_all(raw, "");
    if let Some(captures) = fence_re().captures(&without_think) {
        captures[1].to_string()
    } else {
        without_think.into_owned()
    }
}

/// Slice from the first occurrence of `open` to the last occurrence of
/// `close`, inclusive.
fn outermost<'a>(text: &'a str, open: char, close: char) -> Option<&'a str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Parse the outermost JSON array from a response. `None` when no valid
/// array can be located.
pub fn extract_json_array(raw: &str) -> Option<Vec<serde_json::Value>> {
    let cleaned = clean(raw);
    let candidate = outermost(&cleaned, '[', ']')?;
    match serde_json::from_str::<serde_json::Value>(candidate) {
        Ok(serde_json::Value::Array(items)) => Some(items),
        _ => None,
    }
}

/// Parse the outermost JSON object from a response. `None` when no valid
/// object can be located.
pub fn extract_json_object(raw: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    let cleaned = clean(raw);
    let candidate = outermost(&cleaned, '{', '}')?;
    match serde_json::from_str::<serde_json::Value>(candidate) {
        Ok(serde_json::Value::Object(map)) => Some(map),
        _ => None,
    }
}

// ============================================================================
// TESTS
// ============================================================================
