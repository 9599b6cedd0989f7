//! Embedded-backend DDL.
//!
//! The relational backend carries its own dialect-native DDL in
//! `postgres.rs`; both produce the same logical layout: entries, versions,
//! an FTS projection kept in sync by triggers, the id sequence, graph
//! tables, the ingestion ledger, and one vector row per entry.

/// Entries, versions, FTS5 projection + sync triggers, id sequence.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS knowledge_entries (
    id TEXT PRIMARY KEY,
    project_ref TEXT,
    short_title TEXT NOT NULL,
    long_title TEXT NOT NULL,
    knowledge_details TEXT NOT NULL,
    entry_type TEXT NOT NULL,
    source_context TEXT,
    confidence_level REAL NOT NULL DEFAULT 0.9,
    tags TEXT NOT NULL DEFAULT '',
    hints TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_accessed TEXT,
    superseded_by TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    has_embedding INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_entries_project ON knowledge_entries(project_ref);
CREATE INDEX IF NOT EXISTS idx_entries_type ON knowledge_entries(entry_type);
CREATE INDEX IF NOT EXISTS idx_entries_active ON knowledge_entries(is_active);

CREATE TABLE IF NOT EXISTS entry_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_id TEXT NOT NULL REFERENCES knowledge_entries(id),
    version_number INTEGER NOT NULL,
    knowledge_details TEXT NOT NULL,
    change_reason TEXT,
    confidence_level REAL NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(entry_id, version_number)
);

CREATE VIRTUAL TABLE IF NOT EXISTS knowledge_fts USING fts5(
    short_title,
    long_title,
    knowledge_details,
    tags,
    content='knowledge_entries',
    content_rowid='rowid',
    tokenize='porter unicode61'
);

-- Triggers to keep FTS in sync with the content table
CREATE TRIGGER IF NOT EXISTS knowledge_fts_ai AFTER INSERT ON knowledge_entries BEGIN
    INSERT INTO knowledge_fts(rowid, short_title, long_title, knowledge_details, tags)
    VALUES (new.rowid, new.short_title, new.long_title, new.knowledge_details, new.tags);
END;

CREATE TRIGGER IF NOT EXISTS knowledge_fts_ad AFTER DELETE ON knowledge_entries
BEGIN
    INSERT INTO knowledge_fts(
        knowledge_fts, rowid, short_title, long_title, knowledge_details, tags
    ) VALUES (
        'delete', old.rowid, old.short_title, old.long_title,
        old.knowledge_details, old.tags
    );
END;

CREATE TRIGGER IF NOT EXISTS knowledge_fts_au AFTER UPDATE ON knowledge_entries
BEGIN
    INSERT INTO knowledge_fts(
        knowledge_fts, rowid, short_title, long_title, knowledge_details, tags
    ) VALUES (
        'delete', old.rowid, old.short_title, old.long_title,
        old.knowledge_details, old.tags
    );
    INSERT INTO knowledge_fts(rowid, short_title, long_title, knowledge_details, tags)
    VALUES (new.rowid, new.short_title, new.long_title, new.knowledge_details, new.tags);
END;

CREATE TABLE IF NOT EXISTS entry_id_seq (
    next_id INTEGER NOT NULL DEFAULT 1
);
"#;

/// Seed the id sequence with a single row, once.
pub const INIT_SEQ_SQL: &str = r#"
INSERT INTO entry_id_seq (next_id)
SELECT 1 WHERE NOT EXISTS (SELECT 1 FROM entry_id_seq);
"#;

/// Typed property graph: nodes and edges keyed by strings.
pub const GRAPH_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS graph_nodes (
    node_id TEXT PRIMARY KEY,
    node_type TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_nodes_type ON graph_nodes(node_type);

CREATE TABLE IF NOT EXISTS graph_edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL REFERENCES graph_nodes(node_id),
    target TEXT NOT NULL REFERENCES graph_nodes(node_id),
    edge_type TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    UNIQUE(source, target, edge_type)
);
CREATE INDEX IF NOT EXISTS idx_edges_source ON graph_edges(source);
CREATE INDEX IF NOT EXISTS idx_edges_target ON graph_edges(target);
CREATE INDEX IF NOT EXISTS idx_edges_type ON graph_edges(edge_type);
"#;

/// Ledger of ingested files, keyed by relative path.
pub const INGEST_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS ingested_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    relative_path TEXT NOT NULL UNIQUE,
    content_hash TEXT NOT NULL,
    note_node_id TEXT NOT NULL,
    entry_ids TEXT NOT NULL DEFAULT '[]',
    summary TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    file_extension TEXT NOT NULL,
    project_ref TEXT,
    redactions TEXT NOT NULL DEFAULT '[]',
    ingested_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1
);
"#;

/// One embedding row per entry; little-endian f32 blob.
pub const VEC_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS knowledge_vec (
    entry_id TEXT PRIMARY KEY,
    embedding BLOB NOT NULL
);
"#;
