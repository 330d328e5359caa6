//! Rule-based strategy: the full 18-rule library, weighted per category and
//! collapsed into the 4 scoring bins (§4.5).

use std::future::Future;
use std::pin::Pin;

use super::rules::{rule_library, Rule, RuleOutcome};
use super::{score_to_verdict, BinScores, ValidationContext, ValidationResult, ValidationStrategy, DEFAULT_MIN_SCORE};

pub struct RuleBasedValidator {
    min_score: f64,
}

impl RuleBasedValidator {
    #[must_use]
    pub fn new(min_score: f64) -> Self {
        Self { min_score }
    }
}

impl Default for RuleBasedValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SCORE)
    }
}

impl ValidationStrategy for RuleBasedValidator {
    fn name(&self) -> &'static str {
        "rule-based"
    }

    fn validate<'a>(
        &'a self,
        ctx: &'a ValidationContext,
    ) -> Pin<Box<dyn Future<Output = ValidationResult> + Send + 'a>> {
        Box::pin(async move { evaluate(ctx, self.min_score) })
    }
}

fn suggestion_for(rule: &Rule, outcome: &RuleOutcome) -> Option<&'static str> {
    if outcome.passed {
        return None;
    }
    match rule.name {
        "empty-data-containers" | "loading-placeholders" | "ajax-indicators" | "interactive-elements" => {
            Some("Use browser to render dynamic content")
        }
        "main-content-presence" | "semantic-html-presence" => Some("Wait for page content to finish loading"),
        "keyword-matching" | "title-relevance" => Some("Navigate to a more specific page"),
        "truncated-content-detection" | "incomplete-table-detection" => Some("Scroll to load additional content"),
        _ => None,
    }
}

pub fn evaluate(ctx: &ValidationContext, min_score: f64) -> ValidationResult {
    let rules = rule_library();

    let mut rules_checked = Vec::with_capacity(rules.len());
    let mut bins: [(f64, f64); 4] = [(0.0, 0.0); 4];
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

        if let Some(suggestion) = suggestion_for(rule, &outcome) {
            if !suggested_actions.contains(&suggestion.to_string()) {
                suggested_actions.push(suggestion.to_string());
            }
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

    fn make_ctx(html: &str, text: &str, task: Option<&str>) -> ValidationContext {
        ValidationContext {
            html: html.to_string(),
            text: text.to_string(),
            task_description: task.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn seed_scenario_select_a_year_needs_interaction() {
        let html = "<html><body><table><tbody></tbody></table></body></html>";
        let ctx = make_ctx(html, "", Some("quarterly revenue by region"));
        let result = RuleBasedValidator::default().validate(&ctx).await;

        assert!(!result.sufficient);
        assert!(result.needs_interaction);
        assert!(result.rules_checked.contains(&"loading-placeholders".to_string()));
        assert!(result.rules_checked.contains(&"empty-data-containers".to_string()));
        assert!(result
            .suggested_actions
            .contains(&"Use browser to render dynamic content".to_string()));
    }

    #[tokio::test]
    async fn rich_relevant_article_is_sufficient() {
        let body = "Rust async runtimes ".repeat(100);
        let html = format!(
            "<html><body><main><article><h1>Rust async runtimes</h1><p>{body}</p></article></main></body></html>"
        );
        let ctx = make_ctx(&html, &body, Some("rust async runtimes"));
        let result = RuleBasedValidator::default().validate(&ctx).await;
        assert!(result.sufficient);
        assert_eq!(result.rules_checked.len(), 18);
    }
}
