//! kb_maintain - administrative maintenance, gated by manager mode.

use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use lore_core::config;
use lore_core::db::{self, Database, DbResult};
use lore_core::sql_params;

use crate::state::AppState;
use crate::tools::store::embed_entry;

const ACTIONS: [&str; 8] = [
    "deactivate",
    "entry_versions",
    "purge_inactive",
    "reactivate",
    "rebuild_embeddings",
    "rebuild_graph",
    "stats",
    "vacuum",
];

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "action": {
                "type": "string",
                "enum": ["stats", "deactivate", "reactivate", "rebuild_embeddings",
                         "rebuild_graph", "purge_inactive", "vacuum", "entry_versions"],
                "description": "Maintenance action to run"
            },
            "entry_id": {
                "type": "string",
                "description": "Required for deactivate, reactivate, entry_versions"
            },
            "days_inactive": {
                "type": "integer",
                "description": "For purge_inactive: minimum days since deactivation",
                "default": 90,
                "minimum": 1
            },
            "force": {
                "type": "boolean",
                "description": "For rebuild_embeddings: re-embed ALL entries, not just missing",
                "default": false
            },
            "confirm": {
                "type": "boolean",
                "description": "Required true for purge_inactive",
                "default": false
            }
        },
        "required": ["action"]
    })
}

#[derive(Debug, Deserialize)]
struct MaintainArgs {
    action: String,
    entry_id: Option<String>,
    days_inactive: Option<i64>,
    force: Option<bool>,
    confirm: Option<bool>,
}

pub async fn execute(state: &AppState, args: Option<Value>) -> Result<String, String> {
    if !config::is_manager_mode() {
        return Err("Error: kb_maintain requires manager mode (set KB_MANAGER=TRUE).".to_string());
    }

    let args: MaintainArgs = super::parse_args(args)?;
    if !ACTIONS.contains(&args.action.as_str()) {
        return Err(format!(
            "Unknown action '{}'. Use: {}",
            args.action,
            ACTIONS.join(", ")
        ));
    }

    let result = match args.action.as_str() {
        "stats" => action_stats(state).await,
        "deactivate" => action_deactivate(state, args.entry_id.as_deref()).await,
        "reactivate" => action_reactivate(state, args.entry_id.as_deref()).await,
        "rebuild_embeddings" => {
            action_rebuild_embeddings(state, args.force.unwrap_or(false)).await
        }
        "rebuild_graph" => action_rebuild_graph(state).await,
        "purge_inactive" => {
            action_purge_inactive(
                state,
                args.days_inactive.unwrap_or(90).max(1),
                args.confirm.unwrap_or(false),
            )
            .await
        }
        "vacuum" => state.db.vacuum().await,
        "entry_versions" => action_entry_versions(state, args.entry_id.as_deref()).await,
        _ => unreachable!("action validated above"),
    };

    result.map_err(|err| format!("Error: {err}"))
}

async fn action_stats(state: &AppState) -> DbResult<String> {
    let stats = db::get_db_stats(state.db.as_ref()).await?;

    let mut lines = vec!["Knowledge Base Statistics\n".to_string()];
    lines.push(format!(
        "Entries: {} total ({} active, {} inactive)",
        stats.total_entries, stats.active_entries, stats.inactive_entries
    ));

    if !stats.by_type.is_empty() {
        lines.push("\nActive entries by type:".to_string());
        for (entry_type, count) in &stats.by_type {
            lines.push(format!("  {entry_type}: {count}"));
        }
    }

    if !stats.by_project.is_empty() {
        lines.push("\nActive entries by project:".to_string());
        for (project, count) in &stats.by_project {
            lines.push(format!("  {project}: {count}"));
        }
    }

    lines.push(format!(
        "\nEmbeddings: {} with, {} without",
        stats.with_embeddings, stats.without_embeddings
    ));

    if !stats.graph_nodes_by_type.is_empty() {
        let total: i64 = stats.graph_nodes_by_type.iter().map(|(_, c)| c).sum();
        lines.push(format!("\nGraph nodes: {total}"));
        for (node_type, count) in &stats.graph_nodes_by_type {
            lines.push(format!("  {node_type}: {count}"));
        }
    }

    if !stats.graph_edges_by_type.is_empty() {
        let total: i64 = stats.graph_edges_by_type.iter().map(|(_, c)| c).sum();
        lines.push(format!("\nGraph edges: {total}"));
        for (edge_type, count) in &stats.graph_edges_by_type {
            lines.push(format!("  {edge_type}: {count}"));
        }
    }

    Ok(lines.join("\n"))
}

async fn action_deactivate(state: &AppState, entry_id: Option<&str>) -> DbResult<String> {
    let Some(entry_id) = entry_id else {
        return Ok("Error: entry_id is required for deactivate action.".to_string());
    };

    let entry = match state.store.deactivate_entry(entry_id).await {
        Ok(entry) => entry,
        Err(err) => return Ok(format!("Error: {err}")),
    };

    state
        .db
        .execute(
            "DELETE FROM graph_edges WHERE source = ?",
            &sql_params![entry_id],
        )
        .await?;
    state.db.commit().await?;

    Ok(format!("Deactivated entry {}: {}", entry.id, entry.short_title))
}

async fn action_reactivate(state: &AppState, entry_id: Option<&str>) -> DbResult<String> {
    let Some(entry_id) = entry_id else {
        return Ok("Error: entry_id is required for reactivate action.".to_string());
    };

    let entry = match state.store.reactivate_entry(entry_id).await {
        Ok(entry) => entry,
        Err(err) => return Ok(format!("Error: {err}")),
    };

    // A reactivated entry rejoins every index: graph edges, enrichment,
    // and its embedding
    if let Err(err) = state.builder().build_for_entry(&entry).await {
        warn!("failed to rebuild graph for {entry_id}: {err}");
    }
    if let Some(enricher) = &state.enricher {
        if let Err(err) = enricher.enrich_entry(&entry).await {
            warn!("failed to enrich graph for {entry_id}: {err}");
        }
    }
    embed_entry(state, &entry).await;

    Ok(format!("Reactivated entry {}: {}", entry.id, entry.short_title))
}

async fn action_rebuild_embeddings(state: &AppState, force: bool) -> DbResult<String> {
    if !state.embedder.is_available().await {
        return Ok("Embedding service is not available. Cannot rebuild embeddings.".to_string());
    }

    let entry_ids = if force {
        db::get_all_active_entry_ids(state.db.as_ref()).await?
    } else {
        match state.store.entries_without_embeddings(10_000).await {
            Ok(ids) => ids,
            Err(err) => return Ok(format!("Error: {err}")),
        }
    };
    if entry_ids.is_empty() {
        return Ok("No entries need embedding.".to_string());
    }

    let mut succeeded = 0;
    let mut failed = 0;
    for entry_id in &entry_ids {
        let Some(entry) = db::get_entry(state.db.as_ref(), entry_id).await? else {
            failed += 1;
            continue;
        };
        match state.embedder.embed(&entry.embedding_text()).await {
            Some(embedding) => {
                state.embedder.store_embedding(entry_id, &embedding).await?;
                if state.store.mark_embedding(entry_id, true).await.is_ok() {
                    succeeded += 1;
                } else {
                    failed += 1;
                }
            }
            None => failed += 1,
        }
    }

    let mode = if force { "all entries" } else { "entries without embeddings" };
    Ok(format!(
        "Rebuild embeddings ({mode}): {} processed, {succeeded} succeeded, {failed} failed",
        entry_ids.len()
    ))
}

async fn action_rebuild_graph(state: &AppState) -> DbResult<String> {
    // Full reconstruction: clear, rebuild deterministically, then enrich
    state.db.execute("DELETE FROM graph_edges", &[]).await?;
    state.db.execute("DELETE FROM graph_nodes", &[]).await?;
    state.db.commit().await?;

    let builder = state.builder();
    let entry_ids = db::get_all_active_entry_ids(state.db.as_ref()).await?;

    let mut entries = Vec::new();
    let mut processed = 0;
    for entry_id in &entry_ids {
        let Some(entry) = db::get_entry(state.db.as_ref(), entry_id).await? else {
            continue;
        };
        match builder.build_for_entry(&entry).await {
            Ok(()) => {
                entries.push(entry);
                processed += 1;
            }
            Err(err) => warn!("failed to build graph for {entry_id}: {err}"),
        }
    }

    let mut enriched = 0;
    if let Some(enricher) = &state.enricher {
        for entry in &entries {
            match enricher.enrich_entry(entry).await {
                Ok(_) => enriched += 1,
                Err(err) => warn!("failed to enrich graph for {}: {err}", entry.id),
            }
        }
    }

    let nodes = state
        .db
        .execute("SELECT COUNT(*) AS cnt FROM graph_nodes", &[])
        .await?
        .into_first()
        .and_then(|row| row.integer("cnt"))
        .unwrap_or(0);
    let edges = state
        .db
        .execute("SELECT COUNT(*) AS cnt FROM graph_edges", &[])
        .await?
        .into_first()
        .and_then(|row| row.integer("cnt"))
        .unwrap_or(0);

    let mut message =
        format!("Graph rebuilt: {processed} entries processed, {nodes} nodes, {edges} edges");
    if enriched > 0 {
        message.push_str(&format!(" ({enriched} enriched via LLM)"));
    }
    Ok(message)
}

async fn action_purge_inactive(
    state: &AppState,
    days_inactive: i64,
    confirm: bool,
) -> DbResult<String> {
    if !confirm {
        return Ok(
            "Error: purge_inactive requires confirm=true. This permanently deletes data."
                .to_string(),
        );
    }

    let cutoff = (Utc::now() - Duration::days(days_inactive)).to_rfc3339();
    let rows = state
        .db
        .execute(
            "SELECT id FROM knowledge_entries WHERE is_active = 0 AND updated_at < ?",
            &sql_params![cutoff],
        )
        .await?;
    let entry_ids: Vec<String> = rows
        .rows
        .iter()
        .filter_map(|row| row.text("id").map(str::to_string))
        .collect();

    if entry_ids.is_empty() {
        return Ok(format!(
            "No inactive entries older than {days_inactive} days to purge."
        ));
    }

    for entry_id in &entry_ids {
        db::delete_entry_cascade(state.db.as_ref(), entry_id).await?;
    }

    Ok(format!(
        "Purged {} inactive entries (older than {days_inactive} days).",
        entry_ids.len()
    ))
}

async fn action_entry_versions(state: &AppState, entry_id: Option<&str>) -> DbResult<String> {
    let Some(entry_id) = entry_id else {
        return Ok("Error: entry_id is required for entry_versions action.".to_string());
    };

    let Some(entry) = db::get_entry(state.db.as_ref(), entry_id).await? else {
        return Ok(format!("Error: Entry {entry_id} not found."));
    };
    let versions = db::get_versions(state.db.as_ref(), entry_id).await?;

    let status = if entry.is_active { "active" } else { "inactive" };
    let mut lines = vec![
        format!("Version history for {entry_id}: {}", entry.short_title),
        format!(
            "Status: {status} | Current version: {} | Confidence: {:.0}%\n",
            entry.version,
            entry.confidence_level * 100.0
        ),
    ];

    if versions.is_empty() {
        lines.push("No version records found.".to_string());
    } else {
        for version in versions {
            let date = version.created_at.format("%Y-%m-%dT%H:%M:%S").to_string();
            let reason = version.change_reason.as_deref().unwrap_or("(no reason)");
            lines.push(format!(
                "  v{} ({date}) - {reason} [{:.0}%]",
                version.version_number,
                version.confidence_level * 100.0
            ));
        }
    }

    Ok(lines.join("\n"))
}
