//! Content-quality validator (§4.5).
//!
//! No direct teacher module grounds this one: `crawl_engine/content_validator.rs`
//! is a single HTTP-status check with everything else stripped out (its own
//! comment says the heuristic checks were removed for false positives). The
//! `{is_valid, reason, confidence}`-shaped `Result` survives as this
//! module's `ValidationResult` convention; the rule library itself is built
//! directly from the spec's named rules and weights.

pub mod ai;
pub mod heuristic;
pub mod hybrid;
pub mod rule_based;
pub mod rules;

use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::cache::CacheManager;

#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    pub html: String,
    pub text: String,
    pub markdown: String,
    pub url: String,
    pub task_description: Option<String>,
    pub title: String,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BinScores {
    pub completeness: f64,
    pub relevance: f64,
    pub structure: f64,
    pub quality: f64,
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub sufficient: bool,
    pub needs_interaction: bool,
    pub overall_score: f64,
    pub bin_scores: BinScores,
    pub rules_checked: Vec<String>,
    pub suggested_actions: Vec<String>,
}

pub trait ValidationStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate<'a>(
        &'a self,
        ctx: &'a ValidationContext,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ValidationResult> + Send + 'a>>;
}

/// `sha256(html:task:url):strategy`, the validator cache key shape (§6).
pub fn cache_key(ctx: &ValidationContext, strategy: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ctx.html.as_bytes());
    hasher.update(b":");
    hasher.update(ctx.task_description.as_deref().unwrap_or("").as_bytes());
    hasher.update(b":");
    hasher.update(ctx.url.as_bytes());
    let digest = hasher.finalize();
    format!("validation:{}:{strategy}", hex::encode(digest))
}

pub const VALIDATION_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Default for `CONTENT_VALIDATION_MIN_SCORE` (§6).
pub const DEFAULT_MIN_SCORE: f64 = 0.5;

/// `needs_interaction` is fixed at < 0.4 regardless of the configured
/// sufficiency threshold (§4.5).
const NEEDS_INTERACTION_CEILING: f64 = 0.4;

/// `sufficient ⇔ overall >= min_score`; `needs_interaction ⇔ overall < 0.4`.
pub fn score_to_verdict(overall_score: f64, min_score: f64) -> (bool, bool) {
    (overall_score >= min_score, overall_score < NEEDS_INTERACTION_CEILING)
}

/// Run `strategy`, consulting/populating `cache` when `cache_enabled`.
/// Caching is opaque to the strategy trait itself, matching the spec's
/// framing of caching as an orchestration concern, not a strategy concern.
pub async fn validate_with_cache(
    strategy: &dyn ValidationStrategy,
    ctx: &ValidationContext,
    cache: Option<&CacheManager>,
    cache_enabled: bool,
) -> ValidationResult {
    let key = cache_key(ctx, strategy.name());

    if cache_enabled {
        if let Some(cache) = cache {
            let hit = cache.get(&key).await;
            if hit.from_cache {
                if let Some(result) = hit.data.and_then(|v| serde_json::from_value(v).ok()) {
                    return result;
                }
            }
        }
    }

    let result = strategy.validate(ctx).await;

    if cache_enabled {
        if let Some(cache) = cache {
            if let Ok(value) = serde_json::to_value(&result) {
                cache.set(&key, value, Some(VALIDATION_CACHE_TTL)).await;
            }
        }
    }

    result
}

impl serde::Serialize for ValidationResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("ValidationResult", 6)?;
        s.serialize_field("sufficient", &self.sufficient)?;
        s.serialize_field("needs_interaction", &self.needs_interaction)?;
        s.serialize_field("overall_score", &self.overall_score)?;
        s.serialize_field(
            "bin_scores",
            &(
                self.bin_scores.completeness,
                self.bin_scores.relevance,
                self.bin_scores.structure,
                self.bin_scores.quality,
            ),
        )?;
        s.serialize_field("rules_checked", &self.rules_checked)?;
        s.serialize_field("suggested_actions", &self.suggested_actions)?;
        s.end()
    }
}

impl<'de> serde::Deserialize<'de> for ValidationResult {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(serde::Deserialize)]
        struct Raw {
            sufficient: bool,
            needs_interaction: bool,
            overall_score: f64,
            bin_scores: (f64, f64, f64, f64),
            rules_checked: Vec<String>,
            suggested_actions: Vec<String>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(ValidationResult {
            sufficient: raw.sufficient,
            needs_interaction: raw.needs_interaction,
            overall_score: raw.overall_score,
            bin_scores: BinScores {
                completeness: raw.bin_scores.0,
                relevance: raw.bin_scores.1,
                structure: raw.bin_scores.2,
                quality: raw.bin_scores.3,
            },
            rules_checked: raw.rules_checked,
            suggested_actions: raw.suggested_actions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_matches_contract_shape() {
        let ctx = ValidationContext {
            html: "<html></html>".to_string(),
            url: "https://example.com".to_string(),
            task_description: Some("find prices".to_string()),
            ..Default::default()
        };
        let key = cache_key(&ctx, "hybrid");
        assert!(key.starts_with("validation:"));
        assert!(key.ends_with(":hybrid"));
    }

    #[test]
    fn result_round_trips_through_json() {
        let result = ValidationResult {
            sufficient: true,
            needs_interaction: false,
            overall_score: 0.75,
            bin_scores: BinScores {
                completeness: 0.8,
                relevance: 0.7,
                structure: 0.6,
                quality: 0.9,
            },
            rules_checked: vec!["minimum-content-length".to_string()],
            suggested_actions: vec![],
        };
        let value = serde_json::to_value(&result).unwrap();
        let back: ValidationResult = serde_json::from_value(value).unwrap();
        assert_eq!(back.overall_score, 0.75);
        assert_eq!(back.rules_checked, vec!["minimum-content-length".to_string()]);
    }
}
