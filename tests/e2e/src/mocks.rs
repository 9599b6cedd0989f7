//! Scripted LLM provider.
//!
//! Responses are served in FIFO order; an exhausted script returns `None`,
//! which exercises the degradation paths. Call counts let tests assert
//! that short-circuits (unchanged ingest, deny-listed files) never reach
//! the model.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use lore_core::llm::LlmProvider;

pub struct ScriptedLlm {
    responses: Mutex<Vec<String>>,
    calls: Mutex<usize>,
    available: bool,
}

impl ScriptedLlm {
    /// Provider that answers with the given responses, in order.
    pub fn new(responses: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(str::to_string).collect()),
            calls: Mutex::new(0),
            available: true,
        })
    }

    /// Provider that reports unavailable and never generates.
    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(Vec::new()),
            calls: Mutex::new(0),
            available: false,
        })
    }

    /// Provider that repeats one response for every call.
    pub fn repeating(response: &str, times: usize) -> Arc<Self> {
        Self::new(vec![response; times])
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn generate(&self, _prompt: &str, _system: Option<&str>) -> Option<String> {
        if !self.available {
            return None;
        }
        *self.calls.lock().unwrap() += 1;
        let mut queue = self.responses.lock().unwrap();
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        }
    }
}
