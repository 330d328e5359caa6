//! Rule-based extraction strategy: named, prioritized rule sets evaluated
//! against parsed HTML (§4.4).

use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use parking_lot::RwLock;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::{json, Value};

use super::{dedup_and_cap, Entity, EntityType, ExtractionContext, ExtractionResult, ExtractionStrategy, StrategyType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Trim,
    Lowercase,
    ParseNumber,
    ParseDate,
    ParseEmail,
    ParsePhone,
    ParseUrl,
    ExtractDomain,
    RemoveHtml,
}

#[derive(Debug, Clone)]
pub enum Locator {
    Selector(String),
    Xpath(String),
    Regex(String),
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub entity_type: EntityType,
    pub locator: Locator,
    pub attribute: Option<String>,
    pub transform: Option<Transform>,
    pub confidence: f64,
    pub required: bool,
    pub multiple: bool,
}

#[derive(Debug, Clone)]
pub struct RuleSet {
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
    pub rules: Vec<Rule>,
}

static TAG_RE: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

fn apply_transform(value: &str, transform: Transform) -> String {
    match transform {
        Transform::Trim => value.trim().to_string(),
        Transform::Lowercase => value.to_lowercase(),
        Transform::ParseNumber => value.chars().filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-').collect(),
        Transform::ParseDate => value.trim().to_string(),
        Transform::ParseEmail => value.trim().to_string(),
        Transform::ParsePhone => value.chars().filter(|c| c.is_ascii_digit() || *c == '+').collect(),
        Transform::ParseUrl => value.trim().to_string(),
        Transform::ExtractDomain => url::Url::parse(value.trim())
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| value.trim().to_string()),
        Transform::RemoveHtml => TAG_RE.replace_all(value, "").trim().to_string(),
    }
}

/// Routes a scalar value into the entity-type-appropriate data field,
/// e.g. `Contact.email` vs `Contact.phone` chosen by value shape (§4.4).
fn build_data(entity_type: EntityType, rule_name: &str, value: &str) -> Value {
    match entity_type {
        EntityType::Contact => {
            if value.contains('@') {
                json!({"email": value})
            } else if value.chars().filter(|c| c.is_ascii_digit()).count() >= 7 {
                json!({"phone": value})
            } else {
                json!({ rule_name: value })
            }
        }
        _ => json!({ rule_name: value }),
    }
}

fn evaluate_rule(doc: &Html, rule: &Rule) -> Vec<String> {
    match &rule.locator {
        Locator::Selector(sel) => {
            let Ok(selector) = Selector::parse(sel) else { return Vec::new() };
            let mut values: Vec<String> = doc
                .select(&selector)
                .filter_map(|el| match &rule.attribute {
                    Some(attr) => el.value().attr(attr).map(str::to_string),
                    None => Some(el.text().collect::<String>()),
                })
                .map(|v| match rule.transform {
                    Some(t) => apply_transform(&v, t),
                    None => v.trim().to_string(),
                })
                .filter(|v| !v.is_empty())
                .collect();
            if !rule.multiple {
                values.truncate(1);
            }
            values
        }
        // xpath is accepted in the rule shape for parity with the spec but
        // this crate's HTML layer (scraper) only speaks CSS selectors; no
        // xpath engine is wired in, so xpath rules never match.
        Locator::Xpath(_) => Vec::new(),
        Locator::Regex(pattern) => {
            let Ok(re) = Regex::new(pattern) else { return Vec::new() };
            let text = doc.root_element().text().collect::<String>();
            let mut values: Vec<String> = re
                .captures_iter(&text)
                .filter_map(|c| c.get(1).or_else(|| c.get(0)))
                .map(|m| m.as_str().to_string())
                .map(|v| match rule.transform {
                    Some(t) => apply_transform(&v, t),
                    None => v,
                })
                .collect();
            if !rule.multiple {
                values.truncate(1);
            }
            values
        }
    }
}

/// A generic starting rule set (contact + pricing), so a freshly wired
/// `RuleStrategy` has something to match before callers register
/// site-specific rule sets of their own.
#[must_use]
pub fn default_rule_sets() -> Vec<RuleSet> {
    vec![
        RuleSet {
            name: "contact".to_string(),
            priority: 10,
            enabled: true,
            rules: vec![
                Rule {
                    name: "email".to_string(),
                    entity_type: EntityType::Contact,
                    locator: Locator::Selector("a[href^='mailto:']".to_string()),
                    attribute: Some("href".to_string()),
                    transform: Some(Transform::Trim),
                    confidence: 0.8,
                    required: false,
                    multiple: true,
                },
                Rule {
                    name: "phone".to_string(),
                    entity_type: EntityType::Contact,
                    locator: Locator::Selector("a[href^='tel:']".to_string()),
                    attribute: Some("href".to_string()),
                    transform: Some(Transform::ParsePhone),
                    confidence: 0.75,
                    required: false,
                    multiple: true,
                },
            ],
        },
        RuleSet {
            name: "pricing".to_string(),
            priority: 5,
            enabled: true,
            rules: vec![Rule {
                name: "price".to_string(),
                entity_type: EntityType::Pricing,
                locator: Locator::Regex(r"\$\s?([\d,]+(?:\.\d{2})?)".to_string()),
                attribute: None,
                transform: Some(Transform::ParseNumber),
                confidence: 0.6,
                required: false,
                multiple: true,
            }],
        },
    ]
}

pub struct RuleStrategy {
    rule_sets: RwLock<Vec<RuleSet>>,
    strict_mode: bool,
    max_entities: usize,
}

impl RuleStrategy {
    #[must_use]
    pub fn new(rule_sets: Vec<RuleSet>, strict_mode: bool, max_entities: usize) -> Self {
        Self { rule_sets: RwLock::new(rule_sets), strict_mode, max_entities }
    }

    pub fn add_rule_set(&self, rule_set: RuleSet) {
        self.rule_sets.write().push(rule_set);
    }
}

impl ExtractionStrategy for RuleStrategy {
    fn name(&self) -> &'static str {
        "rule-based"
    }

    fn strategy_type(&self) -> StrategyType {
        StrategyType::RuleBased
    }

    fn is_available(&self) -> bool {
        !self.rule_sets.read().is_empty()
    }

    fn extract<'a>(
        &'a self,
        ctx: &'a ExtractionContext,
    ) -> Pin<Box<dyn Future<Output = ExtractionResult> + Send + 'a>> {
        Box::pin(async move {
            let start = Instant::now();
            let doc = Html::parse_document(&ctx.html);

            let mut rule_sets: Vec<RuleSet> = self.rule_sets.read().iter().filter(|rs| rs.enabled).cloned().collect();
            rule_sets.sort_by(|a, b| b.priority.cmp(&a.priority));

            let mut entities = Vec::new();
            let mut missing_required = Vec::new();

            for rule_set in &rule_sets {
                for rule in &rule_set.rules {
                    if let Some(filter) = &ctx.entity_types {
                        if !filter.contains(&rule.entity_type) {
                            continue;
                        }
                    }
                    let values = evaluate_rule(&doc, rule);
                    if values.is_empty() && rule.required {
                        missing_required.push(rule.name.clone());
                        continue;
                    }
                    for value in values {
                        let data = build_data(rule.entity_type, &rule.name, &value);
                        entities.push(Entity::new(rule.entity_type, data, rule.confidence, &rule_set.name));
                    }
                }
            }

            if self.strict_mode && !missing_required.is_empty() {
                return ExtractionResult {
                    entities: Vec::new(),
                    success: false,
                    confidence: None,
                    strategy: StrategyType::RuleBased,
                    execution_time_ms: start.elapsed().as_millis() as u64,
                    error: Some(format!("required rules produced no value: {}", missing_required.join(", "))),
                    metadata: None,
                };
            }

            let entities = dedup_and_cap(entities, self.max_entities);
            let confidence = if entities.is_empty() {
                None
            } else {
                Some(entities.iter().map(|e| e.confidence).sum::<f64>() / entities.len() as f64)
            };

            ExtractionResult {
                success: !entities.is_empty(),
                confidence,
                entities,
                strategy: StrategyType::RuleBased,
                execution_time_ms: start.elapsed().as_millis() as u64,
                error: None,
                metadata: None,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact_rule_set() -> RuleSet {
        RuleSet {
            name: "contact-rules".to_string(),
            priority: 10,
            enabled: true,
            rules: vec![Rule {
                name: "contact-email".to_string(),
                entity_type: EntityType::Contact,
                locator: Locator::Selector("a.email".to_string()),
                attribute: Some("href".to_string()),
                transform: Some(Transform::Trim),
                confidence: 0.8,
                required: false,
                multiple: true,
            }],
        }
    }

    #[tokio::test]
    async fn extracts_email_and_routes_into_contact_email_field() {
        let strategy = RuleStrategy::new(vec![contact_rule_set()], false, 50);
        let ctx = ExtractionContext {
            html: r#"<a class="email" href="jane@example.com ">Jane</a>"#.to_string(),
            ..Default::default()
        };
        let result = strategy.extract(&ctx).await;
        assert!(result.success);
        assert_eq!(result.entities[0].data, json!({"email": "jane@example.com"}));
    }

    #[tokio::test]
    async fn strict_mode_fails_when_required_rule_is_empty() {
        let mut rule_set = contact_rule_set();
        rule_set.rules[0].required = true;
        let strategy = RuleStrategy::new(vec![rule_set], true, 50);
        let ctx = ExtractionContext { html: "<div></div>".to_string(), ..Default::default() };
        let result = strategy.extract(&ctx).await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[test]
    fn extract_domain_transform_pulls_host() {
        assert_eq!(apply_transform("https://example.com/page", Transform::ExtractDomain), "example.com");
    }
}
