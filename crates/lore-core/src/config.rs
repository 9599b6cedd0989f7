//! Environment-variable configuration.
//!
//! One getter per recognized key. Values are read at call time so tests can
//! override them per-process; nothing here is cached.

use std::path::PathBuf;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Database file path from `KB_DB_PATH` (embedded backend).
pub fn db_path() -> PathBuf {
    match std::env::var("KB_DB_PATH") {
        Ok(raw) => expand_home(&raw),
        Err(_) => {
            if let Some(dirs) = directories::ProjectDirs::from("dev", "lore", "lore") {
                dirs.data_dir().join("knowledge.db")
            } else {
                PathBuf::from("knowledge.db")
            }
        }
    }
}

/// Remote database URL from `KB_DB_URL`, when configured.
pub fn db_url() -> Option<String> {
    std::env::var("KB_DB_URL").ok().filter(|s| !s.is_empty())
}

/// Ollama API base URL from `KB_OLLAMA_URL`.
pub fn ollama_url() -> String {
    env_or("KB_OLLAMA_URL", "http://localhost:11434")
}

/// Embedding model name from `KB_EMBEDDING_MODEL`.
pub fn embedding_model() -> String {
    env_or("KB_EMBEDDING_MODEL", "qwen3-embedding:0.6b")
}

/// Embedding vector dimension from `KB_EMBEDDING_DIM`.
pub fn embedding_dim() -> usize {
    env_or("KB_EMBEDDING_DIM", "1024").parse().unwrap_or(1024)
}

/// Embedding call timeout in seconds from `KB_OLLAMA_TIMEOUT`.
pub fn ollama_timeout() -> f64 {
    env_or("KB_OLLAMA_TIMEOUT", "10.0").parse().unwrap_or(10.0)
}

/// Ollama generation model from `KB_LLM_MODEL`.
pub fn llm_model() -> String {
    env_or("KB_LLM_MODEL", "qwen3:4b")
}

/// LLM generation timeout in seconds from `KB_LLM_TIMEOUT`.
pub fn llm_timeout() -> f64 {
    env_or("KB_LLM_TIMEOUT", "120.0").parse().unwrap_or(120.0)
}

/// LLM provider for ingestion/extraction from `KB_EXTRACT_PROVIDER`.
pub fn extract_provider() -> String {
    env_or("KB_EXTRACT_PROVIDER", "ollama")
}

/// LLM provider for query planning and synthesis from `KB_QUERY_PROVIDER`.
pub fn query_provider() -> String {
    env_or("KB_QUERY_PROVIDER", "ollama")
}

/// Anthropic model name from `KB_ANTHROPIC_MODEL`.
pub fn anthropic_model() -> String {
    env_or("KB_ANTHROPIC_MODEL", "claude-opus-5")
}

/// Anthropic call timeout in seconds from `KB_ANTHROPIC_TIMEOUT`.
pub fn anthropic_timeout() -> f64 {
    env_or("KB_ANTHROPIC_TIMEOUT", "60.0").parse().unwrap_or(60.0)
}

/// Maximum ingestable file size in bytes from `KB_INGEST_MAX_FILE_SIZE`.
pub fn ingest_max_file_size() -> u64 {
    env_or("KB_INGEST_MAX_FILE_SIZE", "512000")
        .parse()
        .unwrap_or(512_000)
}

/// Logging level from `KB_LOG_LEVEL`.
pub fn log_level() -> String {
    env_or("KB_LOG_LEVEL", "warn")
}

/// True when `KB_MANAGER=TRUE` enables destructive maintenance tools.
pub fn is_manager_mode() -> bool {
    std::env::var("KB_MANAGER")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(raw)
}
