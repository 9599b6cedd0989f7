//! End-to-end authoring and retrieval through the tool surface.

use e2e::harness::TestDb;
use lore_core::db::Database;
use lore_core::model::EntryType;
use lore_core::store::NewEntry;
use lore_mcp::tools;
use serde_json::json;

#[tokio::test]
async fn test_store_get_update_round_trip() {
    let kb = TestDb::new().await;
    let state = kb.app_state_offline();

    let created = tools::call(
        &state,
        "kb_store",
        Some(json!({
            "short_title": "WAL mode",
            "long_title": "SQLite WAL mode allows concurrent readers",
            "knowledge_details": "Enable with PRAGMA journal_mode=WAL.",
            "entry_type": "lesson_learned",
            "project_ref": "lore",
            "tags": ["sqlite", "concurrency"],
        })),
    )
    .await
    .unwrap();
    assert!(created.starts_with("Created entry kb-00001 (v1)"), "{created}");
    assert!(created.contains("Tags: sqlite, concurrency"));

    let fetched = tools::call(&state, "kb_get", Some(json!({"entry_id": "kb-00001"})))
        .await
        .unwrap();
    assert!(fetched.contains("[kb-00001] lesson_learned | WAL mode"));
    assert!(fetched.contains("Enable with PRAGMA journal_mode=WAL."));

    let updated = tools::call(
        &state,
        "kb_store",
        Some(json!({
            "update_entry_id": "kb-00001",
            "knowledge_details": "Enable WAL; readers no longer block on the writer.",
            "change_reason": "clarified behavior",
        })),
    )
    .await
    .unwrap();
    assert!(updated.starts_with("Updated entry kb-00001 (v2)"), "{updated}");

    // The retrieved entry matches the last write, at version 2
    let entry = kb.store.get_entry("kb-00001").await.unwrap().unwrap();
    assert_eq!(entry.version, 2);
    assert_eq!(
        entry.knowledge_details,
        "Enable WAL; readers no longer block on the writer."
    );
    assert!(entry.updated_at > entry.created_at);

    // Latest version row mirrors the entry
    let versions = kb.store.get_versions("kb-00001").await.unwrap();
    let latest = versions.last().unwrap();
    assert_eq!(latest.version_number, entry.version);
    assert_eq!(latest.knowledge_details, entry.knowledge_details);
    assert_eq!(latest.change_reason.as_deref(), Some("clarified behavior"));
}

#[tokio::test]
async fn test_ids_are_distinct_and_increasing() {
    let kb = TestDb::new().await;
    let ids = kb.seed_numbered(5, EntryType::FactualReference).await;

    for window in ids.windows(2) {
        assert_ne!(window[0], window[1]);
        assert!(window[1] > window[0], "later IDs sort after earlier ones");
    }
    assert_eq!(ids[0], "kb-00001");
    assert_eq!(ids[4], "kb-00005");
}

#[tokio::test]
async fn test_get_not_found_and_inactive() {
    let kb = TestDb::new().await;
    let state = kb.app_state_offline();

    let entry = kb
        .seed_entry(NewEntry {
            short_title: "doomed".into(),
            long_title: "doomed entry".into(),
            knowledge_details: "soon inactive".into(),
            entry_type: EntryType::FactualReference,
            ..Default::default()
        })
        .await;

    tools::call(
        &state,
        "kb_store",
        Some(json!({"deactivate_entry_id": entry.id})),
    )
    .await
    .unwrap();

    let fetched = tools::call(
        &state,
        "kb_get",
        Some(json!({"entry_id": [entry.id, "kb-09999"]})),
    )
    .await
    .unwrap();
    assert!(fetched.contains(&format!("[{}] not found", entry.id)), "{fetched}");
    assert!(fetched.contains("[kb-09999] not found"));

    // Neither counted as accessed
    let after = kb.store.get_entry(&entry.id).await.unwrap().unwrap();
    assert!(after.last_accessed.is_none());
}

#[tokio::test]
async fn test_get_touches_access_and_respects_id_cap() {
    let kb = TestDb::new().await;
    let state = kb.app_state_offline();
    let entry = kb
        .seed_entry(NewEntry {
            short_title: "touched".into(),
            long_title: "touched entry".into(),
            knowledge_details: "gets accessed".into(),
            entry_type: EntryType::Decision,
            ..Default::default()
        })
        .await;
    assert!(entry.last_accessed.is_none());

    tools::call(&state, "kb_get", Some(json!({"entry_id": entry.id})))
        .await
        .unwrap();
    let after = kb.store.get_entry(&entry.id).await.unwrap().unwrap();
    assert!(after.last_accessed.is_some(), "kb_get resets decay");

    let too_many: Vec<String> = (1..=21).map(|i| format!("kb-{i:05}")).collect();
    let err = tools::call(&state, "kb_get", Some(json!({"entry_id": too_many})))
        .await
        .unwrap_err();
    assert!(err.contains("Maximum 20 IDs"), "{err}");
}

#[tokio::test]
async fn test_update_validation_errors() {
    let kb = TestDb::new().await;
    let state = kb.app_state_offline();

    let err = tools::call(
        &state,
        "kb_store",
        Some(json!({"update_entry_id": "kb-00042", "knowledge_details": "x"})),
    )
    .await
    .unwrap_err();
    assert!(err.contains("not found"), "{err}");

    let err = tools::call(&state, "kb_store", Some(json!({"short_title": "only this"})))
        .await
        .unwrap_err();
    assert!(err.contains("missing required fields"), "{err}");

    let err = tools::call(
        &state,
        "kb_store",
        Some(json!({
            "short_title": "t", "long_title": "t", "knowledge_details": "t",
            "entry_type": "prophecy",
        })),
    )
    .await
    .unwrap_err();
    assert!(err.contains("invalid entry_type"), "{err}");
}

#[tokio::test]
async fn test_vector_search_returns_stored_entry_as_top_match() {
    let kb = TestDb::new().await;
    let ids = kb.seed_numbered(3, EntryType::FactualReference).await;

    // Synthetic embeddings: each entry in its own direction
    kb.db.vector_store(&ids[0], &[1.0, 0.0, 0.0, 0.0]).await.unwrap();
    kb.db.vector_store(&ids[1], &[0.0, 1.0, 0.0, 0.0]).await.unwrap();
    kb.db.vector_store(&ids[2], &[0.0, 0.0, 1.0, 0.0]).await.unwrap();
    kb.db.commit().await.unwrap();

    let hits = kb.db.vector_search(&[0.0, 0.95, 0.05, 0.0], 3).await.unwrap();
    assert_eq!(hits[0].0, ids[1], "nearest embedding wins");
    assert!(hits[0].1 < hits[1].1);
}

#[tokio::test]
async fn test_batch_store_creates_and_validates() {
    let kb = TestDb::new().await;
    let state = kb.app_state_offline();

    let output = tools::call(
        &state,
        "kb_store_batch",
        Some(json!({"entries": [
            {"short_title": "a", "long_title": "a long", "knowledge_details": "a details"},
            {"short_title": "b", "long_title": "b long", "knowledge_details": "b details",
             "entry_type": "decision", "tags": ["batch"]},
        ]})),
    )
    .await
    .unwrap();
    assert!(output.contains("Batch: 2 entries created"), "{output}");
    assert!(output.contains("Created kb-00001 (v1)"));
    assert!(output.contains("Created kb-00002 (v1)"));

    let err = tools::call(
        &state,
        "kb_store_batch",
        Some(json!({"entries": [{"short_title": "no details"}]})),
    )
    .await
    .unwrap_err();
    assert!(err.contains("missing required fields"), "{err}");

    let eleven: Vec<serde_json::Value> = (0..11)
        .map(|i| json!({"short_title": format!("t{i}"), "long_title": "l", "knowledge_details": "d"}))
        .collect();
    let err = tools::call(&state, "kb_store_batch", Some(json!({"entries": eleven})))
        .await
        .unwrap_err();
    assert!(err.contains("Maximum 10 entries"), "{err}");
}
