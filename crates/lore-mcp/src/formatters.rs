//! Compact output formatters for tool responses.

use chrono::Utc;
use lore_core::confidence::{compute_effective_confidence, decay_anchor, staleness_warning};
use lore_core::model::KnowledgeEntry;

/// `[kb-00082] lesson_learned | Title (90%)`
pub fn format_entry_header(entry: &KnowledgeEntry, effective_confidence: f64) -> String {
    format!(
        "[{}] {} | {} ({:.0}%)",
        entry.id,
        entry.entry_type,
        entry.short_title,
        effective_confidence * 100.0
    )
}

/// `#tag1 #tag2 | project  [STALE]`
pub fn format_entry_meta(entry: &KnowledgeEntry, stale: bool) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !entry.tags.is_empty() {
        parts.push(
            entry
                .tags
                .iter()
                .map(|t| format!("#{t}"))
                .collect::<Vec<_>>()
                .join(" "),
        );
    }
    if let Some(project) = &entry.project_ref {
        parts.push(project.clone());
    }
    let line = parts.join(" | ");
    match (stale, line.is_empty()) {
        (true, true) => "[STALE]".to_string(),
        (true, false) => format!("{line}  [STALE]"),
        (false, _) => line,
    }
}

/// Header + optional long-title line + optional meta line, no details.
/// Used by kb_search and kb_store.
pub fn format_entry_compact(
    entry: &KnowledgeEntry,
    effective_confidence: f64,
    stale_warning: Option<&str>,
) -> String {
    let mut lines = vec![format_entry_header(entry, effective_confidence)];
    if !entry.long_title.is_empty() && entry.long_title != entry.short_title {
        lines.push(format!("  {}", entry.long_title));
    }
    let meta = format_entry_meta(entry, stale_warning.is_some());
    if !meta.is_empty() {
        lines.push(format!("  {meta}"));
    }
    lines.join("\n")
}

/// Header + meta + optional context line + details. Used by kb_get and
/// kb_ask.
pub fn format_entry_full(entry: &KnowledgeEntry, context: Option<&str>) -> String {
    let now = Utc::now();
    let effective = compute_effective_confidence(
        entry.confidence_level,
        entry.entry_type,
        decay_anchor(entry),
        now,
    );
    let warning = staleness_warning(effective, entry.entry_type);

    let mut lines = vec![format_entry_header(entry, effective)];
    let meta = format_entry_meta(entry, warning.is_some());
    if !meta.is_empty() {
        lines.push(format!("  {meta}"));
    }
    if let Some(context) = context {
        lines.push(format!("  \u{21b3} {context}"));
    }
    lines.push(format!("  {}", entry.knowledge_details));
    lines.join("\n")
}

/// Count + optional note + entries separated by blank lines.
pub fn format_result_list(
    formatted_entries: &[String],
    header: Option<&str>,
    note: Option<&str>,
) -> String {
    if formatted_entries.is_empty() {
        return "No results found.".to_string();
    }
    let mut lines: Vec<String> = Vec::new();
    if let Some(header) = header {
        lines.push(header.to_string());
    }
    lines.push(format!("{} result(s)", formatted_entries.len()));
    if let Some(note) = note {
        lines.push(format!("Note: {note}"));
    }
    lines.push(String::new());
    lines.push(formatted_entries.join("\n\n"));
    lines.join("\n")
}

// ============================================================================
// TESTS
// ============================================================================
