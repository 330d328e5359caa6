//! Fast heuristic strategy: length and structure rules only, no network or
//! LLM calls. Meant for the hot path where full rule evaluation is too slow
//! (§4.5 "heuristic" strategy kind).

use std::future::Future;
use std::pin::Pin;

use super::rules::{rule_library, RuleCategory};
use super::{score_to_verdict, BinScores, ValidationContext, ValidationResult, ValidationStrategy, DEFAULT_MIN_SCORE};

pub struct HeuristicValidator {
    min_score: f64,
}

impl HeuristicValidator {
    #[must_use]
    pub fn new(min_score: f64) -> Self {
        Self { min_score }
    }
}

impl Default for HeuristicValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SCORE)
    }
}

impl ValidationStrategy for HeuristicValidator {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn validate<'a>(
        &'a self,
        ctx: &'a ValidationContext,
    ) -> Pin<Box<dyn Future<Output = ValidationResult> + Send + 'a>> {
        Box::pin(async move { evaluate(ctx, self.min_score) })
    }
}

fn evaluate(ctx: &ValidationContext, min_score: f64) -> ValidationResult {
    let rules: Vec<_> = rule_library()
        .into_iter()
        .filter(|r| matches!(r.category, RuleCategory::Length | RuleCategory::Structure))
        .collect();

    let mut rules_checked = Vec::new();
    let mut bins: [(f64, f64); 4] = [(0.0, 0.0); 4]; // completeness, relevance, structure, quality (weighted sum, weight sum)
    let mut suggested_actions = Vec::new();

    for rule in &rules {
        let outcome = (rule.evaluate)(ctx);
        rules_checked.push(rule.name.to_string());
        let idx = match rule.category.bin() {
            "completeness" => 0,
            "relevance" => 1,
            "structure" => 2,
            _ => 3,
        };
        bins[idx].0 += outcome.score * rule.weight;
        bins[idx].1 += rule.weight;
        if !outcome.passed && rule.name == "main-content-presence" {
            suggested_actions.push("Use browser to render dynamic content".to_string());
        }
    }

    let bin_score = |i: usize| if bins[i].1 > 0.0 { bins[i].0 / bins[i].1 } else { 1.0 };
    let bin_scores = BinScores {
        completeness: bin_score(0),
        relevance: bin_score(1),
        structure: bin_score(2),
        quality: bin_score(3),
    };

    let overall_score =
        0.30 * bin_scores.completeness + 0.25 * bin_scores.relevance + 0.20 * bin_scores.structure + 0.15 * bin_scores.quality;
    let (sufficient, needs_interaction) = score_to_verdict(overall_score, min_score);

    ValidationResult {
        sufficient,
        needs_interaction,
        overall_score,
        bin_scores,
        rules_checked,
        suggested_actions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rich_document_passes() {
        let ctx = ValidationContext {
            html: "<main><article>".to_string() + &"word ".repeat(200) + "</article></main>",
            text: "word ".repeat(200),
            ..Default::default()
        };
        let result = HeuristicValidator::default().validate(&ctx).await;
        assert!(result.sufficient);
    }

    #[tokio::test]
    async fn empty_document_fails() {
        let ctx = ValidationContext::default();
        let result = HeuristicValidator::default().validate(&ctx).await;
        assert!(!result.sufficient);
        assert!(result.needs_interaction);
    }
}
