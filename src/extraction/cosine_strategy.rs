//! Cosine-similarity extraction strategy: TF-IDF relevance scoring against
//! the task description, then pattern extraction from whichever slice of
//! the content scored as relevant (§4.4).

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use serde_json::json;

use super::{dedup_and_cap, Entity, EntityType, ExtractionContext, ExtractionResult, ExtractionStrategy, StrategyType};

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.3;
const TOP_SENTENCES: usize = 10;

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is",
        "it", "its", "of", "on", "that", "the", "to", "was", "were", "will", "with", "this",
        "but", "or", "not", "have", "had", "they", "their",
    ]
    .into_iter()
    .collect()
});

fn tokenize(text: &str) -> Vec<String> {
    let stemmer = Stemmer::create(Algorithm::English);
    text.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(w.as_str()))
        .map(|w| stemmer.stem(&w).into_owned())
        .collect()
}

fn term_frequencies(tokens: &[String]) -> HashMap<&str, f64> {
    let mut counts: HashMap<&str, f64> = HashMap::new();
    for t in tokens {
        *counts.entry(t.as_str()).or_insert(0.0) += 1.0;
    }
    let total = tokens.len().max(1) as f64;
    for v in counts.values_mut() {
        *v /= total;
    }
    counts
}

/// TF-IDF cosine similarity between `content` and `task` over the
/// two-document corpus the pair forms.
fn cosine_similarity(content: &str, task: &str) -> f64 {
    let content_tokens = tokenize(content);
    let task_tokens = tokenize(task);
    if content_tokens.is_empty() || task_tokens.is_empty() {
        return 0.0;
    }

    let content_tf = term_frequencies(&content_tokens);
    let task_tf = term_frequencies(&task_tokens);

    let vocabulary: HashSet<&str> = content_tf.keys().chain(task_tf.keys()).copied().collect();

    let idf = |term: &str| -> f64 {
        let doc_count = [&content_tf, &task_tf].iter().filter(|m| m.contains_key(term)).count();
        (2.0 / doc_count.max(1) as f64).ln() + 1.0
    };

    let mut dot = 0.0;
    let mut content_norm = 0.0;
    let mut task_norm = 0.0;
    for term in &vocabulary {
        let weight_idf = idf(term);
        let c = content_tf.get(term).copied().unwrap_or(0.0) * weight_idf;
        let t = task_tf.get(term).copied().unwrap_or(0.0) * weight_idf;
        dot += c * t;
        content_norm += c * c;
        task_norm += t * t;
    }

    if content_norm == 0.0 || task_norm == 0.0 {
        return 0.0;
    }
    dot / (content_norm.sqrt() * task_norm.sqrt())
}

fn split_sentences(text: &str) -> Vec<&str> {
    text.split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").expect("valid regex"));
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+?\d[\d\-\. \(\)]{7,}\d").expect("valid regex"));
static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s<>\x22']+").expect("valid regex"));
static PRICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\$|€|£|¥)\s?\d+(?:[.,]\d+)?|\d+(?:[.,]\d+)?\s?(?:USD|EUR|GBP|JPY)").expect("valid regex"));
static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{4}-\d{2}-\d{2}\b|\b\d{1,2}/\d{1,2}/\d{2,4}\b|\b(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\s+\d{1,2},?\s+\d{4}\b")
        .expect("valid regex")
});
static COMPANY_CANDIDATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][a-zA-Z]+(?:\s+[A-Z][a-zA-Z]+){0,2}(?:\s+(?:Inc|LLC|Ltd|Corp|Co)\.?)?)\b").expect("valid regex"));

fn pattern_extract(text: &str) -> Vec<Entity> {
    let mut entities = Vec::new();
    for m in EMAIL_RE.find_iter(text) {
        entities.push(Entity::new(EntityType::Contact, json!({"email": m.as_str()}), 0.7, "cosine"));
    }
    for m in PHONE_RE.find_iter(text) {
        entities.push(Entity::new(EntityType::Contact, json!({"phone": m.as_str()}), 0.5, "cosine"));
    }
    for m in URL_RE.find_iter(text) {
        entities.push(Entity::new(EntityType::Custom, json!({"url": m.as_str()}), 0.6, "cosine"));
    }
    for m in PRICE_RE.find_iter(text) {
        entities.push(Entity::new(EntityType::Pricing, json!({"price": m.as_str()}), 0.6, "cosine"));
    }
    for m in DATE_RE.find_iter(text) {
        entities.push(Entity::new(EntityType::Custom, json!({"date": m.as_str()}), 0.5, "cosine"));
    }
    for cap in COMPANY_CANDIDATE_RE.captures_iter(text) {
        if let Some(m) = cap.get(1) {
            if m.as_str().split_whitespace().count() >= 1 && m.as_str().len() > 2 {
                entities.push(Entity::new(EntityType::Company, json!({"name": m.as_str()}), 0.3, "cosine"));
            }
        }
    }
    entities
}

pub struct CosineStrategy {
    threshold: f64,
    max_entities: usize,
}

impl CosineStrategy {
    #[must_use]
    pub fn new(threshold: f64, max_entities: usize) -> Self {
        Self { threshold, max_entities }
    }
}

impl Default for CosineStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD, 50)
    }
}

impl ExtractionStrategy for CosineStrategy {
    fn name(&self) -> &'static str {
        "cosine-similarity"
    }

    fn strategy_type(&self) -> StrategyType {
        StrategyType::Cosine
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
            let task = ctx.task_description.as_deref().unwrap_or("");

            let overall_similarity = cosine_similarity(&ctx.text, task);

            let entities = if overall_similarity >= self.threshold {
                pattern_extract(&ctx.text)
            } else {
                let mut scored: Vec<(f64, &str)> = split_sentences(&ctx.text)
                    .into_iter()
                    .map(|s| (cosine_similarity(s, task), s))
                    .filter(|(score, _)| *score >= self.threshold)
                    .collect();
                scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
                scored
                    .into_iter()
                    .take(TOP_SENTENCES)
                    .flat_map(|(_, sentence)| pattern_extract(sentence))
                    .collect()
            };

            let entities = dedup_and_cap(entities, self.max_entities);
            let confidence = if entities.is_empty() { None } else { Some(overall_similarity.clamp(0.0, 1.0)) };

            ExtractionResult {
                success: !entities.is_empty(),
                confidence,
                entities,
                strategy: StrategyType::Cosine,
                execution_time_ms: start.elapsed().as_millis() as u64,
                error: None,
                metadata: Some(json!({"overall_similarity": overall_similarity})),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_has_similarity_one() {
        let sim = cosine_similarity("rust async runtime scheduling", "rust async runtime scheduling");
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unrelated_text_has_low_similarity() {
        let sim = cosine_similarity("quarterly revenue report figures", "tasty pizza recipe dough");
        assert!(sim < 0.1);
    }

    #[test]
    fn pattern_extract_finds_email_and_price() {
        let entities = pattern_extract("Contact jane@example.com, price $19.99");
        assert!(entities.iter().any(|e| e.entity_type == EntityType::Contact));
        assert!(entities.iter().any(|e| e.entity_type == EntityType::Pricing));
    }

    #[tokio::test]
    async fn high_relevance_extracts_from_full_content() {
        let strategy = CosineStrategy::new(0.01, 50);
        let ctx = ExtractionContext {
            text: "Rust async runtimes. Contact jane@example.com for details.".to_string(),
            task_description: Some("rust async runtimes".to_string()),
            ..Default::default()
        };
        let result = strategy.extract(&ctx).await;
        assert!(result.success);
    }
}
