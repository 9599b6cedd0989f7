//! Ollama LLM client.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

use super::LlmProvider;
use crate::config;

/// Generates text via Ollama's `/api/generate` endpoint.
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
    /// Only `Some(true)` is ever cached; failures reset to `None`
    available: Mutex<Option<bool>>,
}

impl OllamaClient {
    /// Client configured from the environment.
    pub fn new() -> Self {
        Self::with_endpoint(
            config::ollama_url(),
            config::llm_model(),
            Duration::from_secs_f64(config::llm_timeout()),
        )
    }

    /// Client against an explicit endpoint (tests).
    pub fn with_endpoint(base_url: String, model: String, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            model,
            timeout,
            available: Mutex::new(None),
        }
    }

    fn cache_availability(&self, value: Option<bool>) {
        if let Ok(mut guard) = self.available.lock() {
            *guard = value;
        }
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for OllamaClient {
    async fn is_available(&self) -> bool {
        if let Ok(guard) = self.available.lock() {
            if *guard == Some(true) {
                return true;
            }
        }
        let probe = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.timeout)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());
        match probe {
            Ok(_) => {
                self.cache_availability(Some(true));
                true
            }
            Err(_) => {
                warn!("Ollama not available - LLM disabled");
                self.cache_availability(None);
                false
            }
        }
    }

    async fn generate(&self, prompt: &str, system: Option<&str>) -> Option<String> {
        if !self.is_available().await {
            return None;
        }
        let mut payload = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });
        if let Some(system) = system {
            payload["system"] = serde_json::Value::String(system.to_string());
        }

        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        match response {
            Ok(resp) => match resp.json::<serde_json::Value>().await {
                Ok(body) => match body.get("response").and_then(|v| v.as_str()) {
                    Some(text) => Some(text.to_string()),
                    None => {
                        warn!("Ollama response had no 'response' field");
                        self.cache_availability(None);
                        None
                    }
                },
                Err(err) => {
                    warn!("LLM generation failed: {err}");
                    self.cache_availability(None);
                    None
                }
            },
            Err(err) => {
                warn!("LLM generation failed: {err}");
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
    async fn test_unreachable_service_returns_none() {
        let client = OllamaClient::with_endpoint(
            "http://127.0.0.1:1".to_string(),
            "test".to_string(),
            Duration::from_millis(200),
        );
        assert!(!client.is_available().await);
        assert!(client.generate("hello", None).await.is_none());
    }
}
