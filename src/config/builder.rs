//! Typestate builder for `AppConfig`, plus environment-variable loading (§6
//! of the external-interfaces contract).
//!
//! Grounded in `config/builder.rs`'s `CrawlConfigBuilder<State>`: a
//! zero-sized state parameter gates which methods are available. Unlike the
//! teacher's builder (which gates on *presence* of required fields —
//! `storage_dir`, `start_url`), every `AppConfig` field already has a
//! default, so the gate here is *validation*: `build()` is only callable
//! after `validate()` has checked the numeric ranges the components rely on.

use std::env;
use std::marker::PhantomData;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use super::types::{AppConfig, CacheMode, ProxyRotationStrategy, ValidationStrategyKind};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

fn env_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                name,
                value: raw,
                reason: "could not parse",
            }),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            name,
            value: String::from("<non-unicode>"),
            reason: "not valid unicode",
        }),
    }
}

fn env_bool(name: &'static str) -> Result<Option<bool>, ConfigError> {
    match env::var(name) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                name,
                value: raw,
                reason: "expected a boolean",
            }),
        },
        Err(env::VarError::NotPresent) => Ok(None),
        Err(_) => Err(ConfigError::InvalidValue {
            name,
            value: String::from("<non-unicode>"),
            reason: "not valid unicode",
        }),
    }
}

fn env_duration_ms(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    Ok(env_var::<u64>(name)?.map(Duration::from_millis))
}

fn env_csv(name: &'static str) -> Option<Vec<String>> {
    env::var(name).ok().map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
}

/// Marker: builder has not yet passed `validate()`.
pub struct Unvalidated;
/// Marker: builder has passed `validate()`; `build()` is available.
pub struct Validated;

pub struct ConfigBuilder<State = Unvalidated> {
    config: AppConfig,
    _phantom: PhantomData<State>,
}

impl Default for ConfigBuilder<Unvalidated> {
    fn default() -> Self {
        Self {
            config: AppConfig::default(),
            _phantom: PhantomData,
        }
    }
}

impl ConfigBuilder<Unvalidated> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the numeric ranges every downstream component relies on.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` naming the first offending field.
    pub fn validate(self) -> Result<ConfigBuilder<Validated>, ConfigError> {
        let c = &self.config;
        let checks: &[(bool, &'static str, &'static str)] = &[
            (c.max_concurrent_scrapes > 0, "MAX_CONCURRENT_SCRAPES", "must be > 0"),
            (c.min_content_length > 0, "MIN_CONTENT_LENGTH", "must be > 0"),
            (
                (0.0..=100.0).contains(&c.circuit_breaker_error_threshold),
                "CIRCUIT_BREAKER_ERROR_THRESHOLD",
                "must be a percentage in [0, 100]",
            ),
            (
                (0.0..=1.0).contains(&c.cosine_similarity_threshold),
                "COSINE_SIMILARITY_THRESHOLD",
                "must be in [0, 1]",
            ),
            (
                (0.0..=1.0).contains(&c.rule_based_default_confidence),
                "RULE_BASED_DEFAULT_CONFIDENCE",
                "must be in [0, 1]",
            ),
            (
                (0.0..=1.0).contains(&c.content_validation_min_score),
                "CONTENT_VALIDATION_MIN_SCORE",
                "must be in [0, 1]",
            ),
            (c.rate_limit_max_requests > 0, "RATE_LIMIT_MAX_REQUESTS", "must be > 0"),
            (
                !c.rate_limit_window.is_zero(),
                "RATE_LIMIT_WINDOW_MS",
                "must be > 0",
            ),
        ];
        if let Some((_, name, reason)) = checks.iter().find(|(ok, _, _)| !ok) {
            return Err(ConfigError::InvalidValue {
                name,
                value: String::new(),
                reason,
            });
        }
        Ok(ConfigBuilder {
            config: self.config,
            _phantom: PhantomData,
        })
    }
}

impl ConfigBuilder<Validated> {
    #[must_use]
    pub fn build(self) -> AppConfig {
        self.config
    }
}

/// Setters with no ordering dependency are available in any builder state,
/// mirroring `CrawlConfigBuilder<State>`'s `compression_threshold_bytes`
/// and `max_page_retries` methods.
impl<State> ConfigBuilder<State> {
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    #[must_use]
    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.config.redis_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn cache_mode(mut self, mode: CacheMode) -> Self {
        self.config.cache_mode = mode;
        self
    }

    #[must_use]
    pub fn max_concurrent_scrapes(mut self, n: usize) -> Self {
        self.config.max_concurrent_scrapes = n;
        self
    }

    #[must_use]
    pub fn proxy_rotation_strategy(mut self, strategy: ProxyRotationStrategy) -> Self {
        self.config.proxy_rotation_strategy = strategy;
        self
    }

    #[must_use]
    pub fn content_validation_strategy(mut self, strategy: ValidationStrategyKind) -> Self {
        self.config.content_validation_strategy = strategy;
        self
    }
}

fn parse_cache_mode(raw: &str) -> Result<CacheMode, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "enabled" => Ok(CacheMode::Enabled),
        "disabled" => Ok(CacheMode::Disabled),
        "readonly" | "read_only" | "read-only" => Ok(CacheMode::ReadOnly),
        "bypass" => Ok(CacheMode::Bypass),
        _ => Err(ConfigError::InvalidValue {
            name: "CACHE_MODE",
            value: raw.to_string(),
            reason: "expected enabled|disabled|readonly|bypass",
        }),
    }
}

fn parse_proxy_rotation_strategy(raw: &str) -> Result<ProxyRotationStrategy, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "roundrobin" | "round_robin" | "round-robin" => Ok(ProxyRotationStrategy::RoundRobin),
        "random" => Ok(ProxyRotationStrategy::Random),
        "weighted" => Ok(ProxyRotationStrategy::Weighted),
        "leastused" | "least_used" | "least-used" => Ok(ProxyRotationStrategy::LeastUsed),
        _ => Err(ConfigError::InvalidValue {
            name: "PROXY_ROTATION_STRATEGY",
            value: raw.to_string(),
            reason: "expected round_robin|random|weighted|least_used",
        }),
    }
}

fn parse_validation_strategy(raw: &str) -> Result<ValidationStrategyKind, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "heuristic" => Ok(ValidationStrategyKind::Heuristic),
        "rulebased" | "rule_based" | "rule-based" => Ok(ValidationStrategyKind::RuleBased),
        "ai" => Ok(ValidationStrategyKind::Ai),
        "hybrid" => Ok(ValidationStrategyKind::Hybrid),
        _ => Err(ConfigError::InvalidValue {
            name: "CONTENT_VALIDATION_STRATEGY",
            value: raw.to_string(),
            reason: "expected heuristic|rule_based|ai|hybrid",
        }),
    }
}

/// Load configuration from the process environment, applying the §6
/// defaults for anything unset.
///
/// # Errors
/// Returns `ConfigError::InvalidValue` for the first malformed variable
/// encountered, or a failed range check from `validate()`.
pub fn from_env() -> Result<AppConfig, ConfigError> {
    let mut builder = ConfigBuilder::new();
    let d = AppConfig::default();

    if let Some(port) = env_var::<u16>("PORT")? {
        builder = builder.port(port);
    }
    if let Ok(node_env) = env::var("NODE_ENV") {
        builder.config.node_env = node_env;
    }

    builder.config.mongodb_uri = env::var("MONGODB_URI").ok();

    if let Ok(redis_url) = env::var("REDIS_URL") {
        builder = builder.redis_url(redis_url);
    }
    builder.config.redis_password = env::var("REDIS_PASSWORD").ok();
    builder.config.redis_db = env_var::<i64>("REDIS_DB")?.unwrap_or(d.redis_db);
    builder.config.cache_enabled = env_bool("CACHE_ENABLED")?.unwrap_or(d.cache_enabled);
    builder.config.cache_ttl =
        env_duration_ms("CACHE_TTL")?.unwrap_or(d.cache_ttl);
    if let Ok(raw) = env::var("CACHE_MODE") {
        builder = builder.cache_mode(parse_cache_mode(&raw)?);
    }

    if let Some(n) = env_var::<usize>("MAX_CONCURRENT_SCRAPES")? {
        builder = builder.max_concurrent_scrapes(n);
    }

    builder.config.scrape_timeout =
        env_duration_ms("SCRAPE_TIMEOUT")?.unwrap_or(d.scrape_timeout);
    builder.config.http_timeout = env_duration_ms("HTTP_TIMEOUT")?.unwrap_or(d.http_timeout);
    builder.config.jina_timeout = env_duration_ms("JINA_TIMEOUT")?.unwrap_or(d.jina_timeout);
    builder.config.playwright_timeout =
        env_duration_ms("PLAYWRIGHT_TIMEOUT")?.unwrap_or(d.playwright_timeout);
    builder.config.ai_agent_timeout =
        env_duration_ms("AI_AGENT_TIMEOUT")?.unwrap_or(d.ai_agent_timeout);

    builder.config.min_content_length =
        env_var::<usize>("MIN_CONTENT_LENGTH")?.unwrap_or(d.min_content_length);

    builder.config.user_agent = env::var("USER_AGENT").ok();
    builder.config.rotate_user_agents =
        env_bool("ROTATE_USER_AGENTS")?.unwrap_or(d.rotate_user_agents);

    if let Some(urls) = env_csv("PROXY_URLS") {
        builder.config.proxy_urls = urls;
    }
    builder.config.proxy_url = env::var("PROXY_URL").ok();
    builder.config.proxy_health_check_interval =
        env_duration_ms("PROXY_HEALTH_CHECK_INTERVAL")?.unwrap_or(d.proxy_health_check_interval);
    builder.config.proxy_health_check_timeout =
        env_duration_ms("PROXY_HEALTH_CHECK_TIMEOUT")?.unwrap_or(d.proxy_health_check_timeout);
    if let Ok(raw) = env::var("PROXY_ROTATION_STRATEGY") {
        builder = builder.proxy_rotation_strategy(parse_proxy_rotation_strategy(&raw)?);
    }

    builder.config.rate_limit_window =
        env_duration_ms("RATE_LIMIT_WINDOW_MS")?.unwrap_or(d.rate_limit_window);
    builder.config.rate_limit_max_requests =
        env_var::<u32>("RATE_LIMIT_MAX_REQUESTS")?.unwrap_or(d.rate_limit_max_requests);
    builder.config.rate_limit_enabled =
        env_bool("RATE_LIMIT_ENABLED")?.unwrap_or(d.rate_limit_enabled);

    builder.config.circuit_breaker_timeout =
        env_duration_ms("CIRCUIT_BREAKER_TIMEOUT")?.unwrap_or(d.circuit_breaker_timeout);
    builder.config.circuit_breaker_error_threshold =
        env_var::<f64>("CIRCUIT_BREAKER_ERROR_THRESHOLD")?
            .unwrap_or(d.circuit_breaker_error_threshold);
    builder.config.circuit_breaker_reset_timeout =
        env_duration_ms("CIRCUIT_BREAKER_RESET_TIMEOUT")?.unwrap_or(d.circuit_breaker_reset_timeout);
    builder.config.circuit_breaker_min_requests =
        env_var::<u32>("CIRCUIT_BREAKER_MIN_REQUESTS")?.unwrap_or(d.circuit_breaker_min_requests);

    builder.config.cosine_similarity_threshold =
        env_var::<f64>("COSINE_SIMILARITY_THRESHOLD")?.unwrap_or(d.cosine_similarity_threshold);
    builder.config.cosine_similarity_max_entities = env_var::<usize>("COSINE_SIMILARITY_MAX_ENTITIES")?
        .unwrap_or(d.cosine_similarity_max_entities);
    builder.config.cosine_similarity_min_segment_length =
        env_var::<usize>("COSINE_SIMILARITY_MIN_SEGMENT_LENGTH")?
            .unwrap_or(d.cosine_similarity_min_segment_length);
    builder.config.rule_based_default_confidence = env_var::<f64>("RULE_BASED_DEFAULT_CONFIDENCE")?
        .unwrap_or(d.rule_based_default_confidence);
    builder.config.rule_based_strict_mode =
        env_bool("RULE_BASED_STRICT_MODE")?.unwrap_or(d.rule_based_strict_mode);

    if let Ok(raw) = env::var("CONTENT_VALIDATION_STRATEGY") {
        builder = builder.content_validation_strategy(parse_validation_strategy(&raw)?);
    }
    builder.config.content_validation_min_score = env_var::<f64>("CONTENT_VALIDATION_MIN_SCORE")?
        .unwrap_or(d.content_validation_min_score);
    builder.config.content_validation_min_length =
        env_var::<usize>("CONTENT_VALIDATION_MIN_LENGTH")?.unwrap_or(d.content_validation_min_length);
    builder.config.content_validation_cache_enabled =
        env_bool("CONTENT_VALIDATION_CACHE_ENABLED")?.unwrap_or(d.content_validation_cache_enabled);

    builder.config.ai_agent_max_pages =
        env_var::<usize>("AI_AGENT_MAX_PAGES")?.unwrap_or(d.ai_agent_max_pages);
    builder.config.ai_agent_max_depth =
        env_var::<u8>("AI_AGENT_MAX_DEPTH")?.unwrap_or(d.ai_agent_max_depth);
    builder.config.ai_agent_max_ajax_endpoints = env_var::<usize>("AI_AGENT_MAX_AJAX_ENDPOINTS")?
        .unwrap_or(d.ai_agent_max_ajax_endpoints);
    builder.config.ai_agent_follow_external_links = env_bool("AI_AGENT_FOLLOW_EXTERNAL_LINKS")?
        .unwrap_or(d.ai_agent_follow_external_links);
    builder.config.ai_agent_delay_between_requests =
        env_duration_ms("AI_AGENT_DELAY_BETWEEN_REQUESTS")?
            .unwrap_or(d.ai_agent_delay_between_requests);

    Ok(builder.validate()?.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = ConfigBuilder::new().validate().expect("defaults must validate").build();
        assert_eq!(config.port, 3000);
        assert!(config.max_concurrent_scrapes > 0);
    }

    #[test]
    fn rejects_zero_concurrency() {
        let err = ConfigBuilder::new()
            .max_concurrent_scrapes(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "MAX_CONCURRENT_SCRAPES", .. }));
    }

    #[test]
    fn parses_cache_mode() {
        assert_eq!(parse_cache_mode("ReadOnly").unwrap(), CacheMode::ReadOnly);
        assert!(parse_cache_mode("bogus").is_err());
    }

    #[test]
    fn parses_proxy_rotation_strategy() {
        assert_eq!(
            parse_proxy_rotation_strategy("least_used").unwrap(),
            ProxyRotationStrategy::LeastUsed
        );
    }

    #[test]
    fn env_csv_splits_and_trims() {
        // SAFETY: test runs single-threaded within this process's test binary.
        unsafe {
            env::set_var("SCRAPEWEAVE_TEST_CSV", "a, b ,c");
        }
        assert_eq!(
            env_csv("SCRAPEWEAVE_TEST_CSV"),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
        unsafe {
            env::remove_var("SCRAPEWEAVE_TEST_CSV");
        }
    }
}
