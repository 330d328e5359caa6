//! LLM client abstraction used by the AI-guided fetcher, the AI/hybrid
//! validator strategies, and LLM-based extraction (§4.4).
//!
//! No teacher module grounds this directly; shaped after the `reqwest`-based
//! HTTP clients elsewhere in the crate, with the retry/backoff idiom from
//! `crawl_engine/orchestrator.rs` applied to model-level retries instead of
//! page fetches.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub mod anthropic_backend;
pub use anthropic_backend::AnthropicBackend;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model is overloaded (503)")]
    Overloaded,
    #[error("rate limited (429)")]
    RateLimited,
    #[error("model not found (404): {0}")]
    NotFound(String),
    #[error("llm returned an unparseable response: {0}")]
    InvalidResponse(String),
    #[error("no llm model available")]
    NoModelAvailable,
    #[error("llm request failed: {0}")]
    Other(String),
}

/// The provider-facing half: makes one call against one named model.
/// Providers (Anthropic, OpenAI, Gemini, ...) implement this; retry and
/// model fallback live above it in `ModelFallbackClient`.
#[async_trait::async_trait]
pub trait RawModelClient: Send + Sync {
    async fn call_model(&self, model: &str, prompt: &str) -> Result<String, LlmError>;
}

/// The caller-facing half: a single `complete` call that hides model
/// selection, retries, and fallback.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

const MAX_ATTEMPTS_PER_MODEL: u32 = 3;

/// §4.4's LLM-call retry/fallback policy: per model, up to 3 attempts with
/// exponential backoff on 503 (2ⁿ·1s) and 429 (2ⁿ·2s); 404 skips
/// immediately to the next model name; any other error propagates without
/// trying further models.
pub struct ModelFallbackClient {
    backend: Arc<dyn RawModelClient>,
    models: Vec<String>,
}

impl ModelFallbackClient {
    #[must_use]
    pub fn new(backend: Arc<dyn RawModelClient>, models: Vec<String>) -> Self {
        Self { backend, models }
    }
}

#[async_trait::async_trait]
impl LlmClient for ModelFallbackClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        if self.models.is_empty() {
            return Err(LlmError::NoModelAvailable);
        }

        let mut last_err = LlmError::NoModelAvailable;
        for model in &self.models {
            for attempt in 0..MAX_ATTEMPTS_PER_MODEL {
                match self.backend.call_model(model, prompt).await {
                    Ok(text) => return Ok(text),
                    Err(LlmError::Overloaded) => {
                        last_err = LlmError::Overloaded;
                        if attempt + 1 < MAX_ATTEMPTS_PER_MODEL {
                            tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                        }
                    }
                    Err(LlmError::RateLimited) => {
                        last_err = LlmError::RateLimited;
                        if attempt + 1 < MAX_ATTEMPTS_PER_MODEL {
                            tokio::time::sleep(Duration::from_secs(2u64.pow(attempt) * 2)).await;
                        }
                    }
                    Err(err @ LlmError::NotFound(_)) => {
                        last_err = err;
                        break;
                    }
                    Err(other) => return Err(other),
                }
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedBackend {
        calls: AtomicU32,
        script: Vec<(String, Result<String, LlmError>)>,
    }

    #[async_trait::async_trait]
    impl RawModelClient for ScriptedBackend {
        async fn call_model(&self, model: &str, _prompt: &str) -> Result<String, LlmError> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let (expected_model, result) = &self.script[i];
            assert_eq!(expected_model, model);
            match result {
                Ok(s) => Ok(s.clone()),
                Err(LlmError::Overloaded) => Err(LlmError::Overloaded),
                Err(LlmError::RateLimited) => Err(LlmError::RateLimited),
                Err(LlmError::NotFound(m)) => Err(LlmError::NotFound(m.clone())),
                Err(LlmError::Other(m)) => Err(LlmError::Other(m.clone())),
                Err(other) => Err(LlmError::Other(other.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn not_found_skips_to_next_model_immediately() {
        let backend = Arc::new(ScriptedBackend {
            calls: AtomicU32::new(0),
            script: vec![
                ("model-a".to_string(), Err(LlmError::NotFound("model-a".to_string()))),
                ("model-b".to_string(), Ok("hello".to_string())),
            ],
        });
        let client = ModelFallbackClient::new(backend, vec!["model-a".to_string(), "model-b".to_string()]);
        let result = client.complete("prompt").await.unwrap();
        assert_eq!(result, "hello");
    }

    #[tokio::test]
    async fn other_error_propagates_without_trying_next_model() {
        let backend = Arc::new(ScriptedBackend {
            calls: AtomicU32::new(0),
            script: vec![("model-a".to_string(), Err(LlmError::Other("boom".to_string())))],
        });
        let client = ModelFallbackClient::new(backend, vec!["model-a".to_string(), "model-b".to_string()]);
        let err = client.complete("prompt").await.unwrap_err();
        assert!(matches!(err, LlmError::Other(_)));
    }

    #[tokio::test]
    async fn overloaded_retries_same_model_up_to_three_times() {
        let backend = Arc::new(ScriptedBackend {
            calls: AtomicU32::new(0),
            script: vec![
                ("model-a".to_string(), Err(LlmError::Overloaded)),
                ("model-a".to_string(), Err(LlmError::Overloaded)),
                ("model-a".to_string(), Ok("recovered".to_string())),
            ],
        });
        let client = ModelFallbackClient::new(backend, vec!["model-a".to_string()]);
        let result = client.complete("prompt").await.unwrap();
        assert_eq!(result, "recovered");
    }

    #[tokio::test]
    async fn empty_model_list_fails_fast() {
        let backend = Arc::new(ScriptedBackend { calls: AtomicU32::new(0), script: vec![] });
        let client = ModelFallbackClient::new(backend, vec![]);
        assert!(matches!(client.complete("x").await.unwrap_err(), LlmError::NoModelAvailable));
    }
}
