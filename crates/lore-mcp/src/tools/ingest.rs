//! kb_ingest - pull knowledge out of files on disk.

use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

use lore_core::ingest::{FileAction, FileResult, IngestResult};

use crate::state::AppState;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "path": {
                "type": "string",
                "description": "File, directory, or glob pattern to ingest. Accepts absolute paths, relative paths, ~ paths, and glob patterns (e.g. *.md, docs/**/*.txt)."
            },
            "project_ref": {
                "type": "string",
                "description": "Project tag for extracted entries"
            },
            "dry_run": {
                "type": "boolean",
                "description": "Analyze files without storing entries",
                "default": false
            },
            "recursive": {
                "type": "boolean",
                "description": "Recurse into subdirectories (for directory paths)",
                "default": true
            }
        },
        "required": ["path"]
    })
}

#[derive(Debug, Deserialize)]
struct IngestArgs {
    path: String,
    project_ref: Option<String>,
    dry_run: Option<bool>,
    recursive: Option<bool>,
}

fn is_glob(path: &str) -> bool {
    path.contains(['*', '?', '['])
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(raw)
}

pub async fn execute(state: &AppState, args: Option<Value>) -> Result<String, String> {
    let args: IngestArgs = super::parse_args(args)?;
    let dry_run = args.dry_run.unwrap_or(false);
    let recursive = args.recursive.unwrap_or(true);
    let project_ref = args.project_ref.as_deref();

    let Some(ingester) = state.ingester() else {
        return Err("Error: No LLM available for ingestion. Configure an LLM provider.".to_string());
    };

    // Glob pattern: expand relative to the working directory
    if is_glob(&args.path) {
        let matched: Vec<PathBuf> = glob::glob(&args.path)
            .map_err(|err| format!("Error: invalid pattern: {err}"))?
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .collect();
        if matched.is_empty() {
            return Err(format!("Error: No files matched pattern: {}", args.path));
        }

        let base = std::env::current_dir().ok();
        let mut result = IngestResult::default();
        let mut sorted = matched;
        sorted.sort();
        for file in sorted {
            let file_result = ingester
                .ingest_file(&file, project_ref, base.as_deref(), dry_run)
                .await
                .map_err(|err| format!("Error: {err}"))?;
            result.tally(file_result);
        }
        return Ok(format_ingest_result(&result, dry_run));
    }

    // Single file or directory
    let target = expand_home(&args.path);
    let target = std::fs::canonicalize(&target).unwrap_or(target);

    if !target.exists() {
        return Err(format!("Error: Path does not exist: {}", target.display()));
    }

    if target.is_file() {
        let base = target.parent().map(|p| p.to_path_buf());
        let file_result = ingester
            .ingest_file(&target, project_ref, base.as_deref(), dry_run)
            .await
            .map_err(|err| format!("Error: {err}"))?;
        let prefix = if dry_run { "[DRY RUN] " } else { "" };
        let mut line = format!("{prefix}{}", format_file_result(&file_result));
        if let Some(summary) = &file_result.summary {
            line.push_str(&format!("\n  Summary: {summary}"));
        }
        return Ok(line);
    }

    if target.is_dir() {
        let result = ingester
            .ingest_directory(&target, project_ref, recursive, dry_run)
            .await
            .map_err(|err| format!("Error: {err}"))?;
        return Ok(format_ingest_result(&result, dry_run));
    }

    Err(format!(
        "Error: {} is not a file or directory.",
        target.display()
    ))
}

fn format_file_result(result: &FileResult) -> String {
    let mut line = format!("  {}: {}", result.action.as_str(), result.path);
    if let Some(reason) = &result.reason {
        line.push_str(&format!(" - {reason}"));
    }
    if result.entry_count > 0 {
        line.push_str(&format!(" ({} entries)", result.entry_count));
    }
    if !result.entry_ids.is_empty() {
        line.push_str(&format!(" [{}]", result.entry_ids.join(", ")));
    }
    line
}

fn format_ingest_result(result: &IngestResult, dry_run: bool) -> String {
    let prefix = if dry_run { "[DRY RUN] " } else { "" };
    let mut lines = vec![format!("{prefix}Ingestion complete\n")];
    lines.push(format!(
        "Files: {} total, {} ingested, {} skipped, {} flagged, {} unchanged, {} errors",
        result.total_files,
        result.ingested,
        result.skipped,
        result.flagged,
        result.unchanged,
        result.errors
    ));
    lines.push(format!("Entries: {} created\n", result.entries_created));

    // Per-file detail for everything except skips
    for file_result in &result.file_results {
        if file_result.action != FileAction::Skipped {
            lines.push(format_file_result(file_result));
        }
    }

    let skipped = result
        .file_results
        .iter()
        .filter(|r| r.action == FileAction::Skipped)
        .count();
    if skipped > 0 {
        lines.push(format!(
            "\n  ({skipped} files skipped - unsupported type or deny-list)"
        ));
    }

    lines.join("\n")
}
