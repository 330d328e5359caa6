//! `AppConfig`: the process-wide configuration record (§6 environment table).
//!
//! Every field corresponds to one recognized environment variable. Defaults
//! mirror the values named in the spec's component sections (e.g. breaker
//! `error_threshold_percentage`, validator `MIN_SCORE`).

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Enabled,
    Disabled,
    ReadOnly,
    Bypass,
}

impl Default for CacheMode {
    fn default() -> Self {
        Self::Enabled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyRotationStrategy {
    RoundRobin,
    Random,
    Weighted,
    LeastUsed,
}

impl Default for ProxyRotationStrategy {
    fn default() -> Self {
        Self::RoundRobin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStrategyKind {
    Heuristic,
    RuleBased,
    Ai,
    Hybrid,
}

impl Default for ValidationStrategyKind {
    fn default() -> Self {
        Self::Hybrid
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // -- server --
    pub port: u16,
    pub node_env: String,

    // -- job store --
    pub mongodb_uri: Option<String>,

    // -- cache backend --
    pub redis_url: Option<String>,
    pub redis_password: Option<String>,
    pub redis_db: i64,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub cache_mode: CacheMode,

    // -- orchestrator --
    pub max_concurrent_scrapes: usize,
    pub retry_backoff_base: Duration,
    pub max_retries: u32,

    // -- per-tier timeouts --
    pub scrape_timeout: Duration,
    pub http_timeout: Duration,
    pub jina_timeout: Duration,
    pub playwright_timeout: Duration,
    pub ai_agent_timeout: Duration,

    // -- cascade --
    pub min_content_length: usize,

    // -- HTTP fingerprint policy --
    pub user_agent: Option<String>,
    pub rotate_user_agents: bool,

    // -- proxy pool --
    pub proxy_urls: Vec<String>,
    pub proxy_url: Option<String>,
    pub proxy_health_check_interval: Duration,
    pub proxy_health_check_timeout: Duration,
    pub proxy_rotation_strategy: ProxyRotationStrategy,

    // -- rate limiter defaults --
    pub rate_limit_window: Duration,
    pub rate_limit_max_requests: u32,
    pub rate_limit_enabled: bool,

    // -- circuit breaker defaults --
    pub circuit_breaker_timeout: Duration,
    pub circuit_breaker_error_threshold: f64,
    pub circuit_breaker_reset_timeout: Duration,
    pub circuit_breaker_min_requests: u32,

    // -- extraction tuning --
    pub cosine_similarity_threshold: f64,
    pub cosine_similarity_max_entities: usize,
    pub cosine_similarity_min_segment_length: usize,
    pub rule_based_default_confidence: f64,
    pub rule_based_strict_mode: bool,

    // -- validator tuning --
    pub content_validation_strategy: ValidationStrategyKind,
    pub content_validation_min_score: f64,
    pub content_validation_min_length: usize,
    pub content_validation_cache_enabled: bool,

    // -- AI-agent crawler tuning --
    pub ai_agent_max_pages: usize,
    pub ai_agent_max_depth: u8,
    pub ai_agent_max_ajax_endpoints: usize,
    pub ai_agent_follow_external_links: bool,
    pub ai_agent_delay_between_requests: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            node_env: "development".to_string(),

            mongodb_uri: None,

            redis_url: None,
            redis_password: None,
            redis_db: 0,
            cache_enabled: true,
            cache_ttl: Duration::from_secs(3600),
            cache_mode: CacheMode::Enabled,

            max_concurrent_scrapes: 10,
            retry_backoff_base: Duration::from_millis(500),
            max_retries: 3,

            scrape_timeout: Duration::from_secs(60),
            http_timeout: Duration::from_secs(10),
            jina_timeout: Duration::from_secs(15),
            playwright_timeout: Duration::from_secs(15),
            ai_agent_timeout: Duration::from_secs(5),

            min_content_length: 100,

            user_agent: None,
            rotate_user_agents: true,

            proxy_urls: Vec::new(),
            proxy_url: None,
            proxy_health_check_interval: Duration::from_secs(60),
            proxy_health_check_timeout: Duration::from_secs(5),
            proxy_rotation_strategy: ProxyRotationStrategy::RoundRobin,

            rate_limit_window: Duration::from_millis(60_000),
            rate_limit_max_requests: 100,
            rate_limit_enabled: true,

            circuit_breaker_timeout: Duration::from_secs(10),
            circuit_breaker_error_threshold: 50.0,
            circuit_breaker_reset_timeout: Duration::from_secs(30),
            circuit_breaker_min_requests: 5,

            cosine_similarity_threshold: 0.3,
            cosine_similarity_max_entities: 50,
            cosine_similarity_min_segment_length: 20,
            rule_based_default_confidence: 0.7,
            rule_based_strict_mode: false,

            content_validation_strategy: ValidationStrategyKind::Hybrid,
            content_validation_min_score: 0.5,
            content_validation_min_length: 500,
            content_validation_cache_enabled: true,

            ai_agent_max_pages: 50,
            ai_agent_max_depth: 3,
            ai_agent_max_ajax_endpoints: 20,
            ai_agent_follow_external_links: false,
            ai_agent_delay_between_requests: Duration::from_millis(0),
        }
    }
}
