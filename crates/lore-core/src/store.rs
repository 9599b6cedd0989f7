//! CRUD operations for knowledge entries with versioning.
//!
//! Every mutation writes an [`EntryVersion`] row in the same commit as the
//! entry row, so an observer never sees an entry at a version it has no
//! record for.

use chrono::Utc;
use tracing::info;

use crate::db::{self, Database, Db, DbError, DbStats};
use crate::model::{EntryType, EntryVersion, KnowledgeEntry};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Entry store error type
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No entry with this ID
    #[error("Entry {0} not found")]
    NotFound(String),
    /// The entry is soft-deleted and cannot be updated
    #[error("Entry {0} is inactive and cannot be updated")]
    Inactive(String),
    /// Deactivation of an entry that is already inactive
    #[error("Entry {0} is already inactive")]
    AlreadyInactive(String),
    /// Reactivation of an entry that is already active
    #[error("Entry {0} is already active")]
    AlreadyActive(String),
    /// Underlying database error
    #[error(transparent)]
    Db(#[from] DbError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ============================================================================
// INPUT TYPES
// ============================================================================

/// Fields for a new entry.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub short_title: String,
    pub long_title: String,
    pub knowledge_details: String,
    pub entry_type: EntryType,
    pub project_ref: Option<String>,
    pub source_context: Option<String>,
    pub confidence_level: f64,
    pub tags: Vec<String>,
    pub hints: serde_json::Map<String, serde_json::Value>,
}

impl Default for NewEntry {
    fn default() -> Self {
        Self {
            short_title: String::new(),
            long_title: String::new(),
            knowledge_details: String::new(),
            entry_type: EntryType::FactualReference,
            project_ref: None,
            source_context: None,
            confidence_level: 0.9,
            tags: Vec::new(),
            hints: serde_json::Map::new(),
        }
    }
}

/// Fields for an entry update. Absent optionals keep the stored value;
/// hints are shallow-merged with new keys overwriting.
#[derive(Debug, Clone, Default)]
pub struct UpdateEntry {
    pub knowledge_details: String,
    pub change_reason: Option<String>,
    pub confidence_level: Option<f64>,
    pub tags: Option<Vec<String>>,
    pub hints: Option<serde_json::Map<String, serde_json::Value>>,
}

// ============================================================================
// ENTRY STORE
// ============================================================================

/// CRUD on entries, version history, soft deletes, and access tracking.
#[derive(Clone)]
pub struct EntryStore {
    db: Db,
}

impl EntryStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Shared backend handle, for collaborators that run their own SQL.
    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Create a new entry with its initial version. ID allocation, entry
    /// row, and version row land in one commit.
    pub async fn create_entry(&self, new: NewEntry) -> StoreResult<KnowledgeEntry> {
        let entry_id = db::next_entry_id(self.db.as_ref()).await?;
        let now = Utc::now();

        let entry = KnowledgeEntry {
            id: entry_id.clone(),
            project_ref: new.project_ref,
            short_title: new.short_title,
            long_title: new.long_title,
            knowledge_details: new.knowledge_details,
            entry_type: new.entry_type,
            source_context: new.source_context,
            confidence_level: new.confidence_level,
            tags: new.tags,
            hints: new.hints,
            created_at: now,
            updated_at: now,
            last_accessed: None,
            superseded_by: None,
            is_active: true,
            has_embedding: false,
            version: 1,
        };
        db::insert_entry(self.db.as_ref(), &entry).await?;

        db::insert_version(
            self.db.as_ref(),
            &EntryVersion {
                entry_id: entry_id.clone(),
                version_number: 1,
                knowledge_details: entry.knowledge_details.clone(),
                change_reason: Some("Initial creation".to_string()),
                confidence_level: entry.confidence_level,
                created_at: now,
            },
        )
        .await?;

        self.db.commit().await?;
        info!("Created entry {}: {}", entry_id, entry.short_title);
        Ok(entry)
    }

    /// Update an existing entry, creating a new version. The version
    /// counter bumps unconditionally, even for tag/hint-only changes, and
    /// `has_embedding` resets so the entry is re-embedded.
    pub async fn update_entry(
        &self,
        entry_id: &str,
        update: UpdateEntry,
    ) -> StoreResult<KnowledgeEntry> {
        let existing = db::get_entry(self.db.as_ref(), entry_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(entry_id.to_string()))?;
        if !existing.is_active {
            return Err(StoreError::Inactive(entry_id.to_string()));
        }

        let now = Utc::now();
        let new_version = existing.version + 1;
        let new_confidence = update.confidence_level.unwrap_or(existing.confidence_level);

        let mut merged_hints = existing.hints.clone();
        if let Some(hints) = update.hints {
            for (key, value) in hints {
                merged_hints.insert(key, value);
            }
        }

        let updated = KnowledgeEntry {
            knowledge_details: update.knowledge_details.clone(),
            confidence_level: new_confidence,
            tags: update.tags.unwrap_or(existing.tags),
            hints: merged_hints,
            updated_at: now,
            version: new_version,
            // Reset - needs re-embedding
            has_embedding: false,
            ..existing
        };
        db::update_entry(self.db.as_ref(), &updated).await?;

        db::insert_version(
            self.db.as_ref(),
            &EntryVersion {
                entry_id: entry_id.to_string(),
                version_number: new_version,
                knowledge_details: update.knowledge_details,
                change_reason: update.change_reason,
                confidence_level: new_confidence,
                created_at: now,
            },
        )
        .await?;

        self.db.commit().await?;
        info!("Updated entry {} to v{}", entry_id, new_version);
        Ok(updated)
    }

    /// Get a single entry by ID.
    pub async fn get_entry(&self, entry_id: &str) -> StoreResult<Option<KnowledgeEntry>> {
        Ok(db::get_entry(self.db.as_ref(), entry_id).await?)
    }

    /// Soft-delete an entry.
    pub async fn deactivate_entry(&self, entry_id: &str) -> StoreResult<KnowledgeEntry> {
        let entry = db::get_entry(self.db.as_ref(), entry_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(entry_id.to_string()))?;
        if !entry.is_active {
            return Err(StoreError::AlreadyInactive(entry_id.to_string()));
        }
        self.set_active(entry_id, false).await?;
        Ok(KnowledgeEntry {
            is_active: false,
            updated_at: Utc::now(),
            ..entry
        })
    }

    /// Undo a soft delete.
    pub async fn reactivate_entry(&self, entry_id: &str) -> StoreResult<KnowledgeEntry> {
        let entry = db::get_entry(self.db.as_ref(), entry_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(entry_id.to_string()))?;
        if entry.is_active {
            return Err(StoreError::AlreadyActive(entry_id.to_string()));
        }
        self.set_active(entry_id, true).await?;
        Ok(KnowledgeEntry {
            is_active: true,
            updated_at: Utc::now(),
            ..entry
        })
    }

    async fn set_active(&self, entry_id: &str, active: bool) -> StoreResult<()> {
        self.db
            .execute(
                "UPDATE knowledge_entries SET is_active = ?, updated_at = ? WHERE id = ?",
                &crate::sql_params![active, Utc::now().to_rfc3339(), entry_id],
            )
            .await?;
        self.db.commit().await?;
        Ok(())
    }

    /// Mark an entry as having (or not having) an embedding.
    pub async fn mark_embedding(&self, entry_id: &str, has_embedding: bool) -> StoreResult<()> {
        self.db
            .execute(
                "UPDATE knowledge_entries SET has_embedding = ? WHERE id = ?",
                &crate::sql_params![has_embedding, entry_id],
            )
            .await?;
        self.db.commit().await?;
        Ok(())
    }

    /// Active entry IDs that still need embeddings.
    pub async fn entries_without_embeddings(&self, limit: i64) -> StoreResult<Vec<String>> {
        let result = self
            .db
            .execute(
                "SELECT id FROM knowledge_entries
                 WHERE has_embedding = 0 AND is_active = 1 LIMIT ?",
                &crate::sql_params![limit],
            )
            .await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| row.text("id").map(str::to_string))
            .collect())
    }

    /// Batch set `last_accessed` for the given IDs.
    pub async fn touch_accessed(&self, entry_ids: &[String]) -> StoreResult<()> {
        Ok(db::touch_accessed(self.db.as_ref(), entry_ids).await?)
    }

    /// Version history for an entry, oldest first.
    pub async fn get_versions(&self, entry_id: &str) -> StoreResult<Vec<EntryVersion>> {
        Ok(db::get_versions(self.db.as_ref(), entry_id).await?)
    }

    /// Database overview statistics.
    pub async fn stats(&self) -> StoreResult<DbStats> {
        Ok(db::get_db_stats(self.db.as_ref()).await?)
    }
}

// ============================================================================
// TESTS
// ============================================================================
