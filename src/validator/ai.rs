//! AI strategy: a single LLM sufficiency judgment call (§4.5). Used alone
//! when `CONTENT_VALIDATION_STRATEGY=ai`, and blended with the heuristic
//! pass by `hybrid.rs` when the rule-based score is ambiguous.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::{BinScores, ValidationContext, ValidationResult, ValidationStrategy};
use crate::llm::LlmClient;

pub struct AiValidator {
    client: Arc<dyn LlmClient>,
}

impl AiValidator {
    #[must_use]
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

impl ValidationStrategy for AiValidator {
    fn name(&self) -> &'static str {
        "ai"
    }

    fn validate<'a>(
        &'a self,
        ctx: &'a ValidationContext,
    ) -> Pin<Box<dyn Future<Output = ValidationResult> + Send + 'a>> {
        Box::pin(async move { evaluate(self.client.as_ref(), ctx).await })
    }
}

fn build_prompt(ctx: &ValidationContext) -> String {
    let task = ctx.task_description.as_deref().unwrap_or("extract the main content");
    let snippet: String = ctx.text.chars().take(4000).collect();
    format!(
        "Task: {task}\n\nPage title: {}\n\nPage text:\n{snippet}\n\n\
         Respond with a single JSON object: {{\"sufficient\": bool, \"needs_interaction\": bool, \
         \"score\": number between 0 and 1, \"reason\": string}}. `sufficient` means the text above \
         already satisfies the task without further page interaction.",
        ctx.title,
    )
}

#[derive(serde::Deserialize)]
struct Judgment {
    sufficient: bool,
    needs_interaction: bool,
    score: f64,
    reason: String,
}

async fn evaluate(client: &dyn LlmClient, ctx: &ValidationContext) -> ValidationResult {
    let prompt = build_prompt(ctx);
    let judgment = match client.complete(&prompt).await {
        Ok(raw) => parse_judgment(&raw),
        Err(err) => {
            log::warn!("ai validator: llm call failed: {err}");
            None
        }
    };

    match judgment {
        Some(j) => {
            let score = j.score.clamp(0.0, 1.0);
            ValidationResult {
                sufficient: j.sufficient,
                needs_interaction: j.needs_interaction,
                overall_score: score,
                bin_scores: BinScores {
                    completeness: score,
                    relevance: score,
                    structure: score,
                    quality: score,
                },
                rules_checked: vec!["ai-sufficiency-judgment".to_string()],
                suggested_actions: if j.needs_interaction {
                    vec![j.reason]
                } else {
                    vec![]
                },
            }
        }
        None => ValidationResult {
            sufficient: false,
            needs_interaction: false,
            overall_score: 0.0,
            bin_scores: BinScores::default(),
            rules_checked: vec!["ai-sufficiency-judgment".to_string()],
            suggested_actions: vec!["AI validation unavailable".to_string()],
        },
    }
}

fn parse_judgment(raw: &str) -> Option<Judgment> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    serde_json::from_str(&raw[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_judgment_embedded_in_prose() {
        let raw = r#"Sure, here you go: {"sufficient": true, "needs_interaction": false, "score": 0.9, "reason": "ok"} thanks"#;
        let judgment = parse_judgment(raw).expect("should parse");
        assert!(judgment.sufficient);
        assert_eq!(judgment.score, 0.9);
    }

    #[test]
    fn rejects_malformed_judgment() {
        assert!(parse_judgment("not json at all").is_none());
    }
}
