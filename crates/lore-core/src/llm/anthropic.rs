//! Anthropic LLM client over the Messages API.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

use super::LlmProvider;
use crate::config;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

/// Generates text via the Anthropic Messages API. Requires
/// `ANTHROPIC_API_KEY`; without it the client reports unavailable.
pub struct AnthropicClient {
    http: reqwest::Client,
    model: String,
    timeout: Duration,
    /// Only `Some(true)` is ever cached; failures reset to `None`
    available: Mutex<Option<bool>>,
}

impl AnthropicClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            model: config::anthropic_model(),
            timeout: Duration::from_secs_f64(config::anthropic_timeout()),
            available: Mutex::new(None),
        }
    }

    fn api_key() -> Option<String> {
        std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
    }

    fn cache_availability(&self, value: Option<bool>) {
        if let Ok(mut guard) = self.available.lock() {
            *guard = value;
        }
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for AnthropicClient {
    async fn is_available(&self) -> bool {
        if let Ok(guard) = self.available.lock() {
            if *guard == Some(true) {
                return true;
            }
        }
        // A configured key is assumed usable until a call proves otherwise;
        // the first successful generate() caches availability.
        if Self::api_key().is_none() {
            warn!("ANTHROPIC_API_KEY not set - Anthropic LLM disabled");
            return false;
        }
        true
    }

    async fn generate(&self, prompt: &str, system: Option<&str>) -> Option<String> {
        let api_key = match Self::api_key() {
            Some(key) => key,
            None => {
                warn!("ANTHROPIC_API_KEY not set - Anthropic LLM disabled");
                return None;
            }
        };

        let mut payload = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{"role": "user", "content": prompt}],
        });
        if let Some(system) = system {
            payload["system"] = serde_json::Value::String(system.to_string());
        }

        let response = self
            .http
            .post(API_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        match response {
            Ok(resp) => match resp.json::<serde_json::Value>().await {
                Ok(body) => {
                    let text = body
                        .get("content")
                        .and_then(|c| c.get(0))
                        .and_then(|block| block.get("text"))
                        .and_then(|t| t.as_str())
                        .map(str::to_string);
                    if text.is_some() {
                        self.cache_availability(Some(true));
                    } else {
                        warn!("Anthropic response had no text content");
                        self.cache_availability(None);
                    }
                    text
                }
                Err(err) => {
                    warn!("Anthropic generation failed: {err}");
                    self.cache_availability(None);
                    None
                }
            },
            Err(err) => {
                warn!("Anthropic generation failed: {err}");
                self.cache_availability(None);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unavailable_without_key() {
        // The test environment has no ANTHROPIC_API_KEY
        if AnthropicClient::api_key().is_none() {
            let client = AnthropicClient::new();
            assert!(!client.is_available().await);
            assert!(client.generate("hello", None).await.is_none());
        }
    }
}
