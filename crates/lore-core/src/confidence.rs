//! Confidence decay by entry type.
//!
//! `effective = base * 2^(-age_days / half_life)`, anchored at the most
//! recent of last_accessed / updated_at / created_at. Accessing an entry
//! through a search or get path resets the anchor via `touch_accessed`.

use chrono::{DateTime, Utc};

use crate::model::{EntryType, KnowledgeEntry};

/// Half-life in days per entry type.
pub fn half_life_days(entry_type: EntryType) -> f64 {
    match entry_type {
        // 3 months - facts go stale fast
        EntryType::FactualReference => 90.0,
        // 1 year - decisions persist but context shifts
        EntryType::Decision => 365.0,
        // 2 years - conventions are durable
        EntryType::PatternConvention => 730.0,
        // 5 years - hard-won lessons stick
        EntryType::LessonLearned => 1825.0,
    }
}

/// Below this effective confidence, entries carry a staleness warning.
pub const STALENESS_THRESHOLD: f64 = 0.5;

/// Below this effective confidence, hybrid search drops results unless
/// `include_stale` is set.
pub const STALE_FILTER_THRESHOLD: f64 = 0.3;

/// Compute confidence after time-based decay.
///
/// `age_days <= 0` returns the base unchanged. The result is rounded to
/// four decimal places.
pub fn compute_effective_confidence(
    base_confidence: f64,
    entry_type: EntryType,
    anchor: DateTime<Utc>,
    now: DateTime<Utc>,
) -> f64 {
    let age_days = (now - anchor).num_seconds() as f64 / 86_400.0;
    if age_days <= 0.0 {
        return base_confidence;
    }
    let decay = (2.0f64).powf(-age_days / half_life_days(entry_type));
    (base_confidence * decay * 10_000.0).round() / 10_000.0
}

/// The decay anchor for an entry: the most recent of last_accessed,
/// updated_at, and created_at.
pub fn decay_anchor(entry: &KnowledgeEntry) -> DateTime<Utc> {
    let mut anchor = entry.created_at.max(entry.updated_at);
    if let Some(accessed) = entry.last_accessed {
        anchor = anchor.max(accessed);
    }
    anchor
}

/// A warning string when the entry has decayed below the staleness
/// threshold, else `None`.
pub fn staleness_warning(effective_confidence: f64, entry_type: EntryType) -> Option<String> {
    if effective_confidence >= STALENESS_THRESHOLD {
        return None;
    }
    Some(format!(
        "Stale {} entry (confidence: {:.0}%). Consider verifying this information is still current.",
        entry_type,
        effective_confidence * 100.0
    ))
}

// ============================================================================
// TESTS
// ============================================================================
