//! Anthropic Messages API backend, the concrete `RawModelClient` `main.rs`
//! wires into `ModelFallbackClient`. Built the same way `fetch/http_tier.rs`
//! builds its `reqwest::Client`: one shared client, a fixed timeout.

use std::time::Duration;

use serde_json::{json, Value};

use super::{LlmError, RawModelClient};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_TOKENS: u32 = 4096;

pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
}

impl AnthropicBackend {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, api_key: api_key.into() }
    }
}

#[async_trait::async_trait]
impl RawModelClient for AnthropicBackend {
    async fn call_model(&self, model: &str, prompt: &str) -> Result<String, LlmError> {
        let body = json!({
            "model": model,
            "max_tokens": MAX_TOKENS,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Other(e.to_string()))?;

        match response.status().as_u16() {
            200 => {}
            404 => return Err(LlmError::NotFound(model.to_string())),
            429 => return Err(LlmError::RateLimited),
            503 => return Err(LlmError::Overloaded),
            status => {
                let text = response.text().await.unwrap_or_default();
                return Err(LlmError::Other(format!("status {status}: {text}")));
            }
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        parsed["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LlmError::InvalidResponse("missing content[0].text".to_string()))
    }
}
