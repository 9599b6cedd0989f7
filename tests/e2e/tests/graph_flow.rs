//! Graph strategies and search hints through the tool surface.

use e2e::harness::TestDb;
use e2e::mocks::ScriptedLlm;
use lore_core::model::EntryType;
use lore_core::store::NewEntry;
use lore_mcp::tools;
use serde_json::json;

/// kb-00001 <- kb-00002 <- kb-00003, built through kb_store hints.
async fn seed_decision_chain(kb: &TestDb) {
    kb.seed_entry(NewEntry {
        short_title: "Use SQLite for storage".into(),
        long_title: "Original storage decision".into(),
        knowledge_details: "We start with SQLite.".into(),
        entry_type: EntryType::Decision,
        ..Default::default()
    })
    .await;
    for (title, supersedes) in [
        ("Move storage to WAL SQLite", "kb-00001"),
        ("Adopt dual backend storage", "kb-00002"),
    ] {
        let mut hints = serde_json::Map::new();
        hints.insert("supersedes".into(), json!(supersedes));
        kb.seed_entry(NewEntry {
            short_title: title.into(),
            long_title: format!("{title} decision"),
            knowledge_details: "storage decision details".into(),
            entry_type: EntryType::Decision,
            hints,
            ..Default::default()
        })
        .await;
    }
}

#[tokio::test]
async fn test_supersedes_chain_is_complete_from_the_middle() {
    let kb = TestDb::new().await;
    seed_decision_chain(&kb).await;

    let chain = lore_core::graph::queries::supersedes_chain(kb.db.as_ref(), "kb-00002")
        .await
        .unwrap();
    assert_eq!(chain, vec!["kb-00001", "kb-00002", "kb-00003"]);
}

#[tokio::test]
async fn test_decision_trace_orders_chain_with_context() {
    let kb = TestDb::new().await;
    seed_decision_chain(&kb).await;
    let state = kb.app_state_offline();

    let output = tools::call(
        &state,
        "kb_ask",
        Some(json!({"question": "storage decision", "strategy": "decision_trace"})),
    )
    .await
    .unwrap();

    let pos_1 = output.find("[kb-00001]").expect("original in output");
    let pos_2 = output.find("[kb-00002]").expect("middle in output");
    let pos_3 = output.find("[kb-00003]").expect("current in output");
    assert!(pos_1 < pos_2 && pos_2 < pos_3, "chain renders oldest first:\n{output}");
    assert!(output.contains("original decision"));
    assert!(output.contains("supersedes kb-00001"));
    assert!(output.contains("current (supersedes kb-00002)"));
}

#[tokio::test]
async fn test_timeline_requires_scope_and_orders_by_creation() {
    let kb = TestDb::new().await;
    let state = kb.app_state_offline();

    let no_scope = tools::call(
        &state,
        "kb_ask",
        Some(json!({"question": "history", "strategy": "timeline"})),
    )
    .await
    .unwrap();
    assert!(no_scope.contains("requires a scope"), "{no_scope}");

    for title in ["first note", "second note"] {
        kb.seed_entry(NewEntry {
            short_title: title.into(),
            long_title: title.into(),
            knowledge_details: title.into(),
            entry_type: EntryType::FactualReference,
            project_ref: Some("timeline-proj".into()),
            ..Default::default()
        })
        .await;
    }

    let output = tools::call(
        &state,
        "kb_ask",
        Some(json!({
            "question": "what happened",
            "strategy": "timeline",
            "scope": "project:timeline-proj",
        })),
    )
    .await
    .unwrap();
    assert!(output.contains("Timeline: project:timeline-proj"));
    assert!(output.contains("created 2"), "has created YYYY-MM-DD context:\n{output}");
    let first = output.find("first note").unwrap();
    let second = output.find("second note").unwrap();
    assert!(first < second);
}

#[tokio::test]
async fn test_related_walks_shared_nodes() {
    let kb = TestDb::new().await;
    let state = kb.app_state_offline();

    for title in ["redis caching", "redis eviction"] {
        let mut hints = serde_json::Map::new();
        hints.insert("tool".into(), json!("redis"));
        kb.seed_entry(NewEntry {
            short_title: title.into(),
            long_title: title.into(),
            knowledge_details: title.into(),
            entry_type: EntryType::PatternConvention,
            hints,
            ..Default::default()
        })
        .await;
    }

    let output = tools::call(
        &state,
        "kb_ask",
        Some(json!({"question": "related", "strategy": "related", "scope": "tool:redis"})),
    )
    .await
    .unwrap();
    assert!(output.contains("Related to: tool:redis"));
    assert!(output.contains("directly connected"), "{output}");
    assert!(output.contains("redis caching") && output.contains("redis eviction"));

    // From one entry, the other is two hops away, via the tool node
    let output = tools::call(
        &state,
        "kb_ask",
        Some(json!({"question": "related", "strategy": "related", "scope": "kb-00001"})),
    )
    .await
    .unwrap();
    assert!(output.contains("connected via tool:redis"), "{output}");
}

#[tokio::test]
async fn test_connection_renders_path_steps() {
    let kb = TestDb::new().await;
    let state = kb.app_state_offline();

    for title in ["producer", "consumer"] {
        let mut hints = serde_json::Map::new();
        hints.insert("tool".into(), json!("kafka"));
        kb.seed_entry(NewEntry {
            short_title: title.into(),
            long_title: title.into(),
            knowledge_details: title.into(),
            entry_type: EntryType::FactualReference,
            hints,
            ..Default::default()
        })
        .await;
    }

    let output = tools::call(
        &state,
        "kb_ask",
        Some(json!({
            "question": "how are these connected",
            "strategy": "connection",
            "scope": "kb-00001",
            "target": "kb-00002",
        })),
    )
    .await
    .unwrap();
    assert!(output.contains("Connection: kb-00001 -> kb-00002"), "{output}");
    assert!(output.contains("1. kb-00001 --[uses_tool]--> tool:kafka"));
    assert!(output.contains("Entries along the path:"));

    let missing = tools::call(
        &state,
        "kb_ask",
        Some(json!({"question": "q", "strategy": "connection", "scope": "kb-00001"})),
    )
    .await
    .unwrap();
    assert!(missing.contains("requires both scope and target"));
}

#[tokio::test]
async fn test_search_appends_graph_hints_when_sparse() {
    let kb = TestDb::new().await;
    let state = kb.app_state_offline();

    // One matching entry tagged security+devops, one neighbor sharing a tag
    kb.seed_entry(NewEntry {
        short_title: "AWS secrets rotation".into(),
        long_title: "Secrets management and AWS key rotation".into(),
        knowledge_details: "How we handle secrets management and AWS rotation.".into(),
        entry_type: EntryType::PatternConvention,
        tags: vec!["security".into(), "devops".into()],
        ..Default::default()
    })
    .await;
    kb.seed_entry(NewEntry {
        short_title: "Firewall baseline".into(),
        long_title: "Default-deny firewall baseline".into(),
        knowledge_details: "Start from default deny.".into(),
        entry_type: EntryType::PatternConvention,
        tags: vec!["security".into()],
        ..Default::default()
    })
    .await;

    let output = tools::call(
        &state,
        "kb_search",
        Some(json!({"query": "secrets management AWS rotation"})),
    )
    .await
    .unwrap();

    assert!(output.contains("[kb-00001]"), "{output}");
    assert!(output.contains("Related entries via graph:"), "{output}");
    assert!(output.contains("via tag:security"), "{output}");
    assert!(output.contains("kb-00002"), "hint references the tag-sharing entry:\n{output}");
}

#[tokio::test]
async fn test_ask_planner_reroutes_to_planned_strategy() {
    let kb = TestDb::new().await;
    seed_decision_chain(&kb).await;

    let llm = ScriptedLlm::new(vec![
        r#"{"strategy": "decision_trace", "scope": null, "target": null,
            "search_query": "storage decision", "reasoning": "asks why a decision evolved"}"#,
    ]);
    let state = kb.app_state_scripted(llm);

    let output = tools::call(
        &state,
        "kb_ask",
        Some(json!({"question": "why did the storage approach change?"})),
    )
    .await
    .unwrap();
    assert!(output.starts_with("[Planned: decision_trace]"), "{output}");
    assert!(output.contains("original decision"));
}

#[tokio::test]
async fn test_ask_rejects_unknown_strategy() {
    let kb = TestDb::new().await;
    let state = kb.app_state_offline();
    let err = tools::call(
        &state,
        "kb_ask",
        Some(json!({"question": "q", "strategy": "clairvoyance"})),
    )
    .await
    .unwrap_err();
    assert!(err.contains("Unknown strategy"), "{err}");
}

#[tokio::test]
async fn test_summarize_falls_back_without_llm() {
    let kb = TestDb::new().await;
    kb.seed_entry(NewEntry {
        short_title: "fallback entry".into(),
        long_title: "fallback entry long".into(),
        knowledge_details: "fallback details".into(),
        entry_type: EntryType::FactualReference,
        ..Default::default()
    })
    .await;
    let state = kb.app_state_offline();

    let output = tools::call(
        &state,
        "kb_summarize",
        Some(json!({"question": "fallback entry"})),
    )
    .await
    .unwrap();
    assert!(output.starts_with("(LLM unavailable - showing raw results)"), "{output}");
    assert!(output.contains("[kb-00001]"));

    let none = tools::call(
        &state,
        "kb_summarize",
        Some(json!({"question": "zzz qqq nothing matches"})),
    )
    .await
    .unwrap();
    assert_eq!(none, "No entries found matching your question.");
}
