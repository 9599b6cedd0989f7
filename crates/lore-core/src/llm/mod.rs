//! Pluggable LLM providers.
//!
//! A narrow capability trait with graceful degradation: `generate` returns
//! `None` instead of erroring when the backend is unreachable, and callers
//! skip enrichment / planning / synthesis rather than failing the tool call.

mod anthropic;
mod ollama;
pub mod parse;

pub use anthropic::AnthropicClient;
pub use ollama::OllamaClient;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Shared handle to a provider
pub type Llm = Arc<dyn LlmProvider>;

/// A language model backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Check whether the backend is reachable/configured.
    async fn is_available(&self) -> bool;

    /// Generate text from a prompt. `None` when unavailable or failed.
    async fn generate(&self, prompt: &str, system: Option<&str>) -> Option<String>;
}

/// Build a provider by name. `None` for `none`/empty/unknown names, so a
/// missing provider disables LLM features instead of failing startup.
pub fn create_provider(name: &str) -> Option<Llm> {
    match name.trim().to_ascii_lowercase().as_str() {
        "ollama" => Some(Arc::new(OllamaClient::new()) as Llm),
        "anthropic" => Some(Arc::new(AnthropicClient::new()) as Llm),
        "" | "none" => None,
        other => {
            warn!("unknown LLM provider '{other}' - LLM features disabled");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_names() {
        assert!(create_provider("ollama").is_some());
        assert!(create_provider("Anthropic").is_some());
        assert!(create_provider("none").is_none());
        assert!(create_provider("").is_none());
        assert!(create_provider("gpt-9").is_none());
    }
}
