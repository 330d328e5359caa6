//! LLM extraction strategy: one instance per provider, sharing a base
//! prompt-building/parsing implementation (§4.4).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use serde_json::Value;

use super::{dedup_and_cap, Entity, EntityType, ExtractionContext, ExtractionResult, ExtractionStrategy, StrategyType};
use crate::llm::LlmClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Gemini,
    OpenAi,
    Anthropic,
}

impl LlmProvider {
    /// Provider-specific content truncation limit, in characters (§4.4).
    fn content_char_limit(self) -> usize {
        match self {
            LlmProvider::Gemini => 8_000,
            LlmProvider::OpenAi => 100_000,
            LlmProvider::Anthropic => 150_000,
        }
    }

    fn label(self) -> &'static str {
        match self {
            LlmProvider::Gemini => "gemini",
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
        }
    }
}

pub struct LlmStrategy {
    provider: LlmProvider,
    client: Arc<dyn LlmClient>,
    max_entities: usize,
}

impl LlmStrategy {
    #[must_use]
    pub fn new(provider: LlmProvider, client: Arc<dyn LlmClient>, max_entities: usize) -> Self {
        Self { provider, client, max_entities }
    }
}

fn build_prompt(ctx: &ExtractionContext, limit: usize) -> String {
    let task = ctx.task_description.as_deref().unwrap_or("extract key entities");
    let entity_types: String = ctx
        .entity_types
        .as_ref()
        .map(|types| types.iter().map(|t| format!("{t:?}")).collect::<Vec<_>>().join(", "))
        .unwrap_or_else(|| "Company, Person, Product, Article, Contact, Pricing".to_string());
    let content: String = ctx.text.chars().take(limit).collect();
    format!(
        "Task: {task}\nURL: {}\nTarget entity types: {entity_types}\n\nContent:\n{content}\n\n\
         Respond with a single JSON object: {{\"summary\": string, \"entities\": [{{\"type\": string, \
         \"data\": object, \"confidence\": number}}]}}.",
        ctx.url,
    )
}

#[derive(Deserialize)]
struct RawEntity {
    #[serde(rename = "type")]
    entity_type: String,
    data: Value,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

#[derive(Deserialize)]
struct RawResponse {
    #[allow(dead_code)]
    summary: Option<String>,
    entities: Vec<RawEntity>,
}

/// Strips markdown code fences and extracts the outermost `{...}` before
/// parsing — LLMs routinely wrap JSON in prose or fenced blocks (§4.4).
fn extract_json_object(raw: &str) -> Option<&str> {
    let stripped = raw.trim().trim_start_matches("```json").trim_start_matches("```").trim_end_matches("```");
    let start = stripped.find('{')?;
    let end = stripped.rfind('}')?;
    Some(&stripped[start..=end])
}

fn parse_response(raw: &str, source: &'static str) -> Result<Vec<Entity>, String> {
    let json_slice = extract_json_object(raw).ok_or_else(|| "no JSON object found in response".to_string())?;
    let parsed: RawResponse = serde_json::from_str(json_slice).map_err(|e| e.to_string())?;
    Ok(parsed
        .entities
        .into_iter()
        .map(|e| Entity::new(EntityType::parse(&e.entity_type), e.data, e.confidence, source))
        .collect())
}

impl ExtractionStrategy for LlmStrategy {
    fn name(&self) -> &'static str {
        self.provider.label()
    }

    fn strategy_type(&self) -> StrategyType {
        StrategyType::Llm
    }

    fn is_available(&self) -> bool {
        true
    }

    fn extract<'a>(
        &'a self,
        ctx: &'a ExtractionContext,
    ) -> Pin<Box<dyn Future<Output = ExtractionResult> + Send + 'a>> {
        Box::pin(async move {
            let start = Instant::now();
            let prompt = build_prompt(ctx, self.provider.content_char_limit());

            match self.client.complete(&prompt).await {
                Ok(raw) => match parse_response(&raw, self.provider.label()) {
                    Ok(entities) => {
                        let entities = dedup_and_cap(entities, self.max_entities);
                        let confidence = if entities.is_empty() {
                            None
                        } else {
                            Some(entities.iter().map(|e| e.confidence).sum::<f64>() / entities.len() as f64)
                        };
                        ExtractionResult {
                            success: true,
                            confidence,
                            entities,
                            strategy: StrategyType::Llm,
                            execution_time_ms: start.elapsed().as_millis() as u64,
                            error: None,
                            metadata: None,
                        }
                    }
                    Err(err) => ExtractionResult {
                        entities: Vec::new(),
                        success: false,
                        confidence: None,
                        strategy: StrategyType::Llm,
                        execution_time_ms: start.elapsed().as_millis() as u64,
                        error: Some(err),
                        metadata: None,
                    },
                },
                Err(err) => ExtractionResult {
                    entities: Vec::new(),
                    success: false,
                    confidence: None,
                    strategy: StrategyType::Llm,
                    execution_time_ms: start.elapsed().as_millis() as u64,
                    error: Some(err.to_string()),
                    metadata: None,
                },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;

    struct StubClient(&'static str);

    #[async_trait::async_trait]
    impl LlmClient for StubClient {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn strips_code_fence_before_parsing() {
        let raw = "```json\n{\"summary\": \"ok\", \"entities\": []}\n```";
        let json_slice = extract_json_object(raw).unwrap();
        assert!(serde_json::from_str::<RawResponse>(json_slice).is_ok());
    }

    #[test]
    fn unknown_entity_type_normalizes_to_custom() {
        let raw = r#"{"summary": "s", "entities": [{"type": "widget", "data": {}, "confidence": 0.9}]}"#;
        let entities = parse_response(raw, "test").unwrap();
        assert_eq!(entities[0].entity_type, EntityType::Custom);
    }

    #[tokio::test]
    async fn extract_reports_success_with_entities() {
        let client: Arc<dyn LlmClient> = Arc::new(StubClient(
            r#"{"summary": "s", "entities": [{"type": "Company", "data": {"name": "Acme"}, "confidence": 1.5}]}"#,
        ));
        let strategy = LlmStrategy::new(LlmProvider::OpenAi, client, 50);
        let ctx = ExtractionContext { text: "Acme Corp is great".to_string(), ..Default::default() };
        let result = strategy.extract(&ctx).await;
        assert!(result.success);
        assert_eq!(result.entities[0].confidence, 1.0); // clamped
    }
}
