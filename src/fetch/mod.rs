//! Cascading multi-tier fetcher (§4.2).
//!
//! Grounded on `crawl_engine/orchestrator.rs` + `page_processor.rs` for the
//! per-tier lifecycle shape (rate limit check -> circuit breaker check ->
//! fetch -> record success/failure -> publish event) and
//! `crawl_engine/page_enhancer.rs` for browser stealth setup, generalized
//! from "one crawl page" to "one fetch of one tier, any tier".

pub mod ai_agent_tier;
pub mod browser;
pub mod fingerprints;
pub mod headless_tier;
pub mod http_tier;
pub mod reader_tier;
pub mod smart_tier;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreaker;
use crate::errors::{ScrapeError, ScrapeResult};
use crate::proxy::ProxyPool;
use crate::rate_limiter::{RateLimitConfig, RateLimiter};

/// The text length floor below which a tier's output is not "useful
/// content" (§4.2.1 / §4.1 step 5).
pub const MIN_TEXT_LENGTH: usize = 100;
const MIN_HTML_BYTES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScraperType {
    Http,
    Reader,
    Headless,
    Smart,
    AiAgent,
    Auto,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub task_description: Option<String>,
    pub capture_screenshots: bool,
    pub proxy: bool,
    pub block_resources: bool,
    pub extra_headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub html: String,
    pub markdown: String,
    pub text: String,
    pub final_url: String,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub page_title: Option<String>,
    pub page_description: Option<String>,
    pub screenshots: Vec<Vec<u8>>,
    pub request_count: u32,
}

impl FetchResult {
    /// `is_valid_content` (§4.1 step 2 / §4.2.1): text long enough, or HTML
    /// bulky enough that it's plausibly a real page even with sparse text.
    #[must_use]
    pub fn is_valid_content(&self) -> bool {
        self.text.trim().len() >= MIN_TEXT_LENGTH || self.html.len() >= MIN_HTML_BYTES
    }
}

/// Per-call progress sink; the orchestrator's real implementation forwards
/// into the broadcast event bus (`events.rs`). Fetchers only ever call this,
/// never construct a bus.
pub type ProgressEmitter = Arc<dyn Fn(String) + Send + Sync>;

pub fn noop_emitter() -> ProgressEmitter {
    Arc::new(|_| {})
}

/// Shared infrastructure every tier may consult. Cheap to clone (all fields
/// are `Arc`s or plain data).
#[derive(Clone)]
pub struct FetchContext {
    pub circuit_breaker: Arc<CircuitBreaker>,
    pub rate_limiter: Arc<RateLimiter>,
    pub rate_limit: RateLimitConfig,
    pub proxy_pool: Option<Arc<ProxyPool>>,
    pub reader_api_base: Option<String>,
}

pub trait Fetcher: Send + Sync {
    fn scraper_type(&self) -> ScraperType;

    fn fetch<'a>(
        &'a self,
        url: &'a str,
        job_id: &'a str,
        opts: &'a FetchOptions,
        emit: ProgressEmitter,
    ) -> Pin<Box<dyn Future<Output = ScrapeResult<Option<FetchResult>>> + Send + 'a>>;
}

/// Apply the rate limiter and circuit breaker for `host` before a tier is
/// allowed to run a request. Mirrors `page_processor.rs::process_single_page`'s
/// check-then-proceed ordering.
pub async fn guard_host(ctx: &FetchContext, host: &str) -> ScrapeResult<()> {
    let decision = ctx.rate_limiter.check_limit(host, ctx.rate_limit);
    if !decision.allowed {
        if let Some(retry_after) = decision.retry_after {
            tokio::time::sleep(retry_after).await;
        }
    }
    if !ctx.circuit_breaker.should_attempt(host) {
        return Err(ScrapeError::CircuitOpen(host.to_string()));
    }
    Ok(())
}

pub fn host_of(url: &str) -> ScrapeResult<String> {
    crate::circuit_breaker::extract_host(url).map_err(ScrapeError::InvalidInput)
}

/// §4.1 step 2: the `Auto` cascade. Tries each tier in order, stopping at
/// the first one that both succeeds and produces valid content.
pub async fn run_cascade(
    tiers: &[Arc<dyn Fetcher>],
    url: &str,
    job_id: &str,
    opts: &FetchOptions,
    emit: ProgressEmitter,
) -> ScrapeResult<Option<(ScraperType, FetchResult)>> {
    for tier in tiers {
        emit(format!("trying tier {:?}", tier.scraper_type()));
        match tier.fetch(url, job_id, opts, emit.clone()).await {
            Ok(Some(result)) if result.is_valid_content() => {
                return Ok(Some((tier.scraper_type(), result)));
            }
            Ok(Some(_)) | Ok(None) => continue,
            Err(ScrapeError::CircuitOpen(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

/// Human-like jitter before a fetch (§4.1 step 3).
pub async fn jitter() {
    use rand::Rng;
    let ms = rand::rng().random_range(50..=350);
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Derive `scraper_used` from a result per §4.1 step 4.
#[must_use]
pub fn infer_scraper_used(result: &FetchResult, tier: ScraperType) -> ScraperType {
    if tier != ScraperType::Auto {
        return tier;
    }
    if !result.screenshots.is_empty() {
        ScraperType::Headless
    } else {
        ScraperType::Http
    }
}
