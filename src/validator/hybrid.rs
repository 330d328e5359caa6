//! Hybrid strategy: run the heuristic pass first; only escalate to the AI
//! strategy when the heuristic result is ambiguous, then blend the two
//! (§4.5 "hybrid" strategy kind).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::ai::AiValidator;
use super::heuristic::HeuristicValidator;
use super::{score_to_verdict, BinScores, ValidationContext, ValidationResult, ValidationStrategy, DEFAULT_MIN_SCORE};
use crate::llm::LlmClient;

/// Heuristic scores outside this band are treated as decisive; only scores
/// inside it are ambiguous enough to warrant an AI call.
const AMBIGUOUS_LOW: f64 = 0.35;
const AMBIGUOUS_HIGH: f64 = 0.65;

const HEURISTIC_WEIGHT: f64 = 0.4;
const AI_WEIGHT: f64 = 0.6;

pub struct HybridValidator {
    client: Option<Arc<dyn LlmClient>>,
}

impl HybridValidator {
    #[must_use]
    pub fn new(client: Option<Arc<dyn LlmClient>>) -> Self {
        Self { client }
    }
}

impl ValidationStrategy for HybridValidator {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn validate<'a>(
        &'a self,
        ctx: &'a ValidationContext,
    ) -> Pin<Box<dyn Future<Output = ValidationResult> + Send + 'a>> {
        Box::pin(async move { evaluate(self.client.as_ref(), ctx).await })
    }
}

fn blend(heuristic: &ValidationResult, ai: &ValidationResult) -> ValidationResult {
    let overall_score = HEURISTIC_WEIGHT * heuristic.overall_score + AI_WEIGHT * ai.overall_score;
    let bin_scores = BinScores {
        completeness: HEURISTIC_WEIGHT * heuristic.bin_scores.completeness + AI_WEIGHT * ai.bin_scores.completeness,
        relevance: HEURISTIC_WEIGHT * heuristic.bin_scores.relevance + AI_WEIGHT * ai.bin_scores.relevance,
        structure: HEURISTIC_WEIGHT * heuristic.bin_scores.structure + AI_WEIGHT * ai.bin_scores.structure,
        quality: HEURISTIC_WEIGHT * heuristic.bin_scores.quality + AI_WEIGHT * ai.bin_scores.quality,
    };
    let mut rules_checked = heuristic.rules_checked.clone();
    rules_checked.extend(ai.rules_checked.iter().cloned());
    let mut suggested_actions = heuristic.suggested_actions.clone();
    for action in &ai.suggested_actions {
        if !suggested_actions.contains(action) {
            suggested_actions.push(action.clone());
        }
    }
    let (sufficient, needs_interaction) = score_to_verdict(overall_score, DEFAULT_MIN_SCORE);
    ValidationResult {
        sufficient,
        needs_interaction,
        overall_score,
        bin_scores,
        rules_checked,
        suggested_actions,
    }
}

async fn evaluate(client: Option<&Arc<dyn LlmClient>>, ctx: &ValidationContext) -> ValidationResult {
    let heuristic_result = HeuristicValidator::default().validate(ctx).await;

    let ambiguous = (AMBIGUOUS_LOW..=AMBIGUOUS_HIGH).contains(&heuristic_result.overall_score);
    let Some(client) = client.filter(|_| ambiguous) else {
        return heuristic_result;
    };

    let ai_validator = AiValidator::new(Arc::clone(client));
    let ai_result = ai_validator.validate(ctx).await;
    blend(&heuristic_result, &ai_result)
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

    #[tokio::test]
    async fn decisive_heuristic_skips_ai_call() {
        let ctx = ValidationContext::default();
        let result = evaluate(None, &ctx).await;
        assert!(!result.sufficient);
    }

    #[tokio::test]
    async fn ambiguous_heuristic_blends_with_ai() {
        let html = "<html><body><main>".to_string() + &"word ".repeat(15) + "</main></body></html>";
        let ctx = ValidationContext {
            html,
            text: "word ".repeat(15),
            ..Default::default()
        };
        let client: Arc<dyn LlmClient> = Arc::new(StubClient(
            r#"{"sufficient": true, "needs_interaction": false, "score": 1.0, "reason": "ok"}"#,
        ));
        let result = evaluate(Some(&client), &ctx).await;
        assert!(result.rules_checked.contains(&"ai-sufficiency-judgment".to_string()));
    }
}
