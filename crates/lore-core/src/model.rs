//! Entry model - the fundamental unit of stored knowledge.
//!
//! Each entry carries:
//! - Titles, details, and a coarse [`EntryType`] controlling decay half-life
//! - A confidence level decayed over time at read paths
//! - Tags (stored whitespace-joined for FTS) and free-form graph hints
//! - Soft-delete and embedding book-keeping flags
//! - A monotonic version, snapshotted in [`EntryVersion`] on every mutation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// ENTRY TYPES
// ============================================================================

/// Classification of knowledge entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// Version numbers, API endpoints, config values
    #[default]
    FactualReference,
    /// "Chose X because Y" - history is critical
    Decision,
    /// Coding standards, workflow preferences
    PatternConvention,
    /// Mistakes and debugging insights
    LessonLearned,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::FactualReference => "factual_reference",
            EntryType::Decision => "decision",
            EntryType::PatternConvention => "pattern_convention",
            EntryType::LessonLearned => "lesson_learned",
        }
    }

    /// Parse a stored or user-supplied name; `None` for unknown values.
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "factual_reference" => Some(EntryType::FactualReference),
            "decision" => Some(EntryType::Decision),
            "pattern_convention" => Some(EntryType::PatternConvention),
            "lesson_learned" => Some(EntryType::LessonLearned),
            _ => None,
        }
    }

    /// All valid names, for validation messages.
    pub const NAMES: [&'static str; 4] = [
        "factual_reference",
        "decision",
        "pattern_convention",
        "lesson_learned",
    ];
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// KNOWLEDGE ENTRY
// ============================================================================

/// A single knowledge entry with metadata and versioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    /// Zero-padded monotonic identifier (`kb-00042`)
    pub id: String,
    /// Optional project scope tag
    pub project_ref: Option<String>,
    pub short_title: String,
    pub long_title: String,
    pub knowledge_details: String,
    pub entry_type: EntryType,
    /// Where this knowledge came from
    pub source_context: Option<String>,
    /// Base confidence in [0, 1]
    pub confidence_level: f64,
    pub tags: Vec<String>,
    /// Free-form graph-building hints (supersedes, related_entities, person, tool)
    pub hints: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed: Option<DateTime<Utc>>,
    pub superseded_by: Option<String>,
    /// Soft-delete flag
    pub is_active: bool,
    pub has_embedding: bool,
    /// Monotonic, >= 1; bumped on every update
    pub version: i64,
}

impl KnowledgeEntry {
    /// Text used for generating embeddings.
    pub fn embedding_text(&self) -> String {
        format!(
            "{} {} {}",
            self.short_title, self.long_title, self.knowledge_details
        )
    }
}

// ============================================================================
// VERSION RECORD
// ============================================================================

/// A versioned snapshot of an entry, written on every create/update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryVersion {
    pub entry_id: String,
    pub version_number: i64,
    pub knowledge_details: String,
    pub change_reason: Option<String>,
    pub confidence_level: f64,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// SEARCH TYPES
// ============================================================================

/// Parameters for a knowledge base search.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub query: String,
    pub project_ref: Option<String>,
    pub entry_type: Option<EntryType>,
    pub tags: Option<Vec<String>>,
    /// Clamped to [1, 50] by callers; default 10
    pub limit: usize,
    pub include_stale: bool,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            query: String::new(),
            project_ref: None,
            entry_type: None,
            tags: None,
            limit: 10,
            include_stale: false,
        }
    }
}

/// A single search result with scoring and staleness info.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub entry: KnowledgeEntry,
    /// Combined RRF score (higher is better)
    pub score: f64,
    pub effective_confidence: f64,
    pub staleness_warning: Option<String>,
    /// "hybrid" or "fts"
    pub match_source: &'static str,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_type_round_trip() {
        for name in EntryType::NAMES {
            let parsed = EntryType::parse_name(name).unwrap();
            assert_eq!(parsed.as_str(), name);
        }
        assert_eq!(EntryType::parse_name("bogus"), None);
    }

    #[test]
    fn test_entry_type_serde() {
        let json = serde_json::to_string(&EntryType::LessonLearned).unwrap();
        assert_eq!(json, "\"lesson_learned\"");
        let back: EntryType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EntryType::LessonLearned);
    }

    #[test]
    fn test_embedding_text_joins_fields() {
        let now = Utc::now();
        let entry = KnowledgeEntry {
            id: "kb-00001".into(),
            project_ref: None,
            short_title: "a".into(),
            long_title: "b".into(),
            knowledge_details: "c".into(),
            entry_type: EntryType::Decision,
            source_context: None,
            confidence_level: 0.9,
            tags: vec![],
            hints: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
            last_accessed: None,
            superseded_by: None,
            is_active: true,
            has_embedding: false,
            version: 1,
        };
        assert_eq!(entry.embedding_text(), "a b c");
    }
}
