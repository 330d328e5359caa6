//! Scrape orchestrator (§4.1): job lifecycle, tier selection, retry,
//! concurrency.
//!
//! The concurrency/retry/event shape is `crawl_engine/orchestrator.rs`
//! generalized from "pages within one crawl session" to "independent scrape
//! jobs across the process": a `tokio::sync::Semaphore` bounds how many
//! jobs execute at once, `calculate_retry_backoff` is the same
//! exponential-with-jitter-and-cap formula keyed off `AppConfig`'s
//! `retry_backoff_base`/`max_retries` instead of the teacher's hardcoded
//! page-retry constants, and failure-kind multipliers are carried from
//! `crawl_engine/crawl_types.rs::FailureKind`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Semaphore;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::config::AppConfig;
use crate::errors::{ScrapeError, ScrapeResult};
use crate::events::{ActionEvent, EventBus};
use crate::extraction::{ExtractionContext, ExtractionRegistry, StrategyType};
use crate::fetch::ai_agent_tier::AiAgentTier;
use crate::fetch::headless_tier::HeadlessTier;
use crate::fetch::http_tier::HttpTier;
use crate::fetch::reader_tier::ReaderTier;
use crate::fetch::smart_tier::SmartTier;
use crate::fetch::{run_cascade, FetchContext, FetchOptions, Fetcher, FetchResult, ScraperType};
use crate::job::{Job, JobOptions, JobRepository, JobStatus};
use crate::llm::LlmClient;
use crate::proxy::{ProxyPool, ProxyPoolConfig};
use crate::rate_limiter::{RateLimitConfig, RateLimiter};

/// Drives the job-level retry backoff multiplier (§12 supplemented
/// feature), mirroring `crawl_engine/crawl_types.rs::FailureKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Network,
    RateLimited,
    CircuitOpen,
    Unknown,
}

impl FailureKind {
    fn delay_multiplier(self) -> f64 {
        match self {
            Self::Network => 1.0,
            Self::RateLimited => 2.0,
            Self::CircuitOpen => 3.0,
            Self::Unknown => 1.0,
        }
    }

    fn classify(err: &ScrapeError) -> Self {
        match err {
            ScrapeError::RateLimited(_) | ScrapeError::Overloaded(_) => Self::RateLimited,
            ScrapeError::CircuitOpen(_) => Self::CircuitOpen,
            ScrapeError::Timeout(_) | ScrapeError::DownstreamUnavailable(_) => Self::Network,
            _ => Self::Unknown,
        }
    }
}

const JITTER_PERCENT: f64 = 0.2;
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Exponential backoff with ±20% jitter and a 30s cap, scaled per
/// `failure_kind`. `attempt` is 0-based (first retry is `attempt == 0`).
fn calculate_retry_backoff(base: Duration, attempt: u32, failure_kind: FailureKind) -> Duration {
    let exp_delay_ms = (base.as_millis() as u64).saturating_mul(1u64 << attempt.min(5));
    let adjusted_ms = (exp_delay_ms as f64 * failure_kind.delay_multiplier()) as u64;
    let jitter = rand::rng().random_range(-JITTER_PERCENT..=JITTER_PERCENT);
    let jittered_ms = (adjusted_ms as f64 * (1.0 + jitter)).max(0.0) as u64;
    Duration::from_millis(jittered_ms).min(MAX_BACKOFF)
}

/// Everything a running job needs that isn't job-specific state: tiers,
/// repository, extraction, LLM, events. Cheap to clone (all fields are
/// `Arc`s).
#[derive(Clone)]
pub struct ScrapeOrchestrator {
    repo: Arc<dyn JobRepository>,
    tiers: HashMap<ScraperType, Arc<dyn Fetcher>>,
    cascade_order: Vec<ScraperType>,
    extraction: Arc<ExtractionRegistry>,
    llm: Option<Arc<dyn LlmClient>>,
    events: Arc<EventBus>,
    concurrency: Arc<Semaphore>,
    retry_backoff_base: Duration,
    max_retries: u32,
    min_content_length: usize,
}

impl ScrapeOrchestrator {
    #[must_use]
    pub fn new(
        config: &AppConfig,
        repo: Arc<dyn JobRepository>,
        extraction: Arc<ExtractionRegistry>,
        llm: Option<Arc<dyn LlmClient>>,
        events: Arc<EventBus>,
    ) -> Self {
        let circuit_breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            timeout: config.circuit_breaker_timeout,
            error_threshold_percentage: config.circuit_breaker_error_threshold,
            reset_timeout: config.circuit_breaker_reset_timeout,
            minimum_requests: u64::from(config.circuit_breaker_min_requests),
        }));
        let rate_limiter = Arc::new(RateLimiter::new());
        let rate_limit = RateLimitConfig { window: config.rate_limit_window, max_requests: config.rate_limit_max_requests };
        let proxy_pool = if config.proxy_urls.is_empty() {
            None
        } else {
            Some(Arc::new(ProxyPool::from_urls(
                &config.proxy_urls,
                ProxyPoolConfig { rotation_strategy: config.proxy_rotation_strategy, ..Default::default() },
            )))
        };

        let reader_base = std::env::var("READER_API_BASE").unwrap_or_else(|_| "https://r.jina.ai".to_string());
        let fetch_ctx = FetchContext {
            circuit_breaker,
            rate_limiter,
            rate_limit,
            proxy_pool,
            reader_api_base: Some(reader_base.clone()),
        };

        let mut tiers: HashMap<ScraperType, Arc<dyn Fetcher>> = HashMap::new();
        tiers.insert(ScraperType::Http, Arc::new(HttpTier::new(fetch_ctx.clone())));
        tiers.insert(ScraperType::Reader, Arc::new(ReaderTier::new(fetch_ctx.clone(), reader_base)));
        tiers.insert(ScraperType::Headless, Arc::new(HeadlessTier::new(fetch_ctx.clone())));
        tiers.insert(ScraperType::Smart, Arc::new(SmartTier::new(fetch_ctx.clone(), llm.clone())));
        tiers.insert(
            ScraperType::AiAgent,
            Arc::new(AiAgentTier::new(fetch_ctx.clone(), crate::crawl::CrawlConfig::from(config), llm.clone())),
        );

        Self {
            repo,
            tiers,
            cascade_order: vec![ScraperType::Http, ScraperType::Reader, ScraperType::Headless],
            extraction,
            llm,
            events,
            concurrency: Arc::new(Semaphore::new(config.max_concurrent_scrapes.max(1))),
            retry_backoff_base: config.retry_backoff_base,
            max_retries: config.max_retries,
            min_content_length: config.min_content_length,
        }
    }

    /// §4.1 `create_job`: persists `Queued`, spawns execution, returns
    /// immediately. `scraper_type` of `None` means `Auto` — the cascade also
    /// stands in for the spec's retired `Cheerio` single-tier name, since
    /// both are static-HTML-only fetches with no distinct implementation here.
    pub async fn create_job(
        &self,
        url: String,
        task_description: Option<String>,
        scraper_type: ScraperType,
        options: JobOptions,
    ) -> ScrapeResult<Job> {
        if url::Url::parse(&url).is_err() {
            return Err(ScrapeError::InvalidInput(url));
        }
        let job = Job::new(url, task_description, scraper_type, options);
        let job = self.repo.create(job).await?;

        let this = self.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move {
            this.run_with_retry(job_id).await;
        });

        Ok(job)
    }

    pub async fn get_job(&self, id: &str) -> ScrapeResult<Option<Job>> {
        self.repo.get(id).await
    }

    pub async fn list_jobs(&self, user_id: Option<&str>) -> ScrapeResult<Vec<Job>> {
        self.repo.list(user_id).await
    }

    pub async fn delete_job(&self, id: &str) -> ScrapeResult<bool> {
        self.repo.delete(id).await
    }

    /// Cancellable only from `Queued`/`Running`; otherwise the job is
    /// returned unchanged rather than erroring, per §4.1.
    pub async fn cancel_job(&self, id: &str) -> ScrapeResult<Job> {
        let Some(mut job) = self.repo.get(id).await? else {
            return Err(ScrapeError::NotFound(id.to_string()));
        };
        if job.status.is_terminal() {
            return Ok(job);
        }
        job.transition(JobStatus::Cancelled)?;
        self.events.publish_action(id, ActionEvent::Cancelled);
        self.repo.update(job).await
    }

    /// §4.1 `scrape_and_answer`: reuses a recent completed job for the same
    /// URL+session unless `force_refresh`, else creates one.
    pub async fn scrape_and_answer(
        &self,
        url: String,
        question: Option<String>,
        session_id: Option<String>,
        options: JobOptions,
    ) -> ScrapeResult<Job> {
        if !options.force_refresh {
            if let Some(recent) = self
                .repo
                .find_recent_completed(&url, session_id.as_deref(), chrono::Duration::minutes(5))
                .await?
            {
                return Ok(recent);
            }
        }
        let mut job = Job::new(url, question, ScraperType::Auto, options);
        job.session_id = session_id;
        let job = self.repo.create(job).await?;
        let this = self.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move {
            this.run_with_retry(job_id).await;
        });
        Ok(job)
    }

    /// §4.1 `chat_with_job`: appends to `chat_history` via the LLM client
    /// using the job's stored text as context.
    pub async fn chat_with_job(&self, id: &str, message: String) -> ScrapeResult<Job> {
        let Some(mut job) = self.repo.get(id).await? else {
            return Err(ScrapeError::NotFound(id.to_string()));
        };
        if job.payload.text.is_empty() && job.payload.markdown.is_empty() {
            return Err(ScrapeError::NoContent(id.to_string()));
        }
        let Some(llm) = &self.llm else {
            return Err(ScrapeError::DownstreamUnavailable("no llm client configured".to_string()));
        };

        job.chat_history.push(crate::job::ChatMessage { role: "user".to_string(), content: message.clone(), at: chrono::Utc::now() });

        let context: String = job.payload.text.chars().take(8000).collect();
        let prompt = format!("Context:\n{context}\n\nQuestion: {message}\n\nAnswer concisely using only the context above.");
        let reply = llm
            .complete(&prompt)
            .await
            .map_err(|e| ScrapeError::DownstreamUnavailable(format!("chat completion failed: {e}")))?;

        job.chat_history.push(crate::job::ChatMessage { role: "assistant".to_string(), content: reply, at: chrono::Utc::now() });
        self.repo.update(job).await
    }

    /// Wraps `execute_once` in exponential backoff retry up to `max_retries`.
    /// Status transitions inside `execute_once` are idempotent, so a retried
    /// attempt after a partial failure never double-stamps `completed`.
    async fn run_with_retry(&self, job_id: String) {
        let _permit = self.concurrency.acquire().await;
        let mut retries = 0u32;

        loop {
            match self.execute_once(&job_id).await {
                Ok(()) => return,
                Err(err) => {
                    if retries >= self.max_retries {
                        self.finish_failed(&job_id, &err).await;
                        return;
                    }
                    if self.was_cancelled(&job_id).await {
                        return;
                    }
                    let delay = calculate_retry_backoff(self.retry_backoff_base, retries, FailureKind::classify(&err));
                    self.events.publish_action(&job_id, ActionEvent::Message { text: format!("retrying after {delay:?}: {err}") });
                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
            }
        }
    }

    async fn was_cancelled(&self, job_id: &str) -> bool {
        matches!(self.repo.get(job_id).await, Ok(Some(job)) if job.status == JobStatus::Cancelled)
    }

    async fn finish_failed(&self, job_id: &str, err: &ScrapeError) {
        if let Ok(Some(mut job)) = self.repo.get(job_id).await {
            if job.status.is_terminal() {
                return;
            }
            let _ = job.transition(JobStatus::Failed);
            job.ai_processing.get_or_insert_with(Default::default).error = Some(err.to_string());
            self.events.publish_action(job_id, ActionEvent::Failed { reason: err.to_string() });
            let _ = self.repo.update(job).await;
        }
    }

    /// §4.1's 7-step execution algorithm, for one attempt.
    async fn execute_once(&self, job_id: &str) -> ScrapeResult<()> {
        let Some(mut job) = self.repo.get(job_id).await? else {
            return Err(ScrapeError::NotFound(job_id.to_string()));
        };
        if job.status == JobStatus::Cancelled {
            return Ok(());
        }

        // Step 1.
        self.events.publish_action(job_id, ActionEvent::Starting);
        job.transition(JobStatus::Running)?;
        job = self.repo.update(job).await?;
        self.events.publish_action(job_id, ActionEvent::StatusChanged { from: JobStatus::Queued, to: JobStatus::Running });

        let emit = self.events.emitter_for(job_id.to_string());
        let opts = FetchOptions {
            task_description: job.task_description.clone(),
            capture_screenshots: job.options.capture_screenshots,
            proxy: job.options.use_proxy,
            block_resources: job.options.block_resources,
            extra_headers: Vec::new(),
            cookies: job.options.auth_cookies.clone(),
        };

        // Step 2 + 3 (jitter happens inside each tier's fetch via guard_host
        // + this top-level jitter before the cascade/single-tier call).
        crate::fetch::jitter().await;

        let (used_tier, fetch_result) = match job.scraper_type {
            ScraperType::Auto => {
                let cascade: Vec<Arc<dyn Fetcher>> =
                    self.cascade_order.iter().filter_map(|t| self.tiers.get(t).cloned()).collect();
                match run_cascade(&cascade, &job.url, job_id, &opts, emit.clone()).await? {
                    Some((tier, result)) => (tier, result),
                    None => {
                        let url = job.url.clone();
                        return self.fail_with(&mut job, ScrapeError::EmptyContent(url)).await;
                    }
                }
            }
            single => {
                let Some(tier) = self.tiers.get(&single) else {
                    return Err(ScrapeError::InvalidInput(format!("unsupported scraper type {single:?}")));
                };
                match tier.fetch(&job.url, job_id, &opts, emit.clone()).await? {
                    Some(result) if result.is_valid_content() => (single, result),
                    _ => {
                        let url = job.url.clone();
                        return self.fail_with(&mut job, ScrapeError::EmptyContent(url)).await;
                    }
                }
            }
        };

        // Step 4.
        self.record_payload(&mut job, used_tier, &fetch_result);
        self.events.publish_action(job_id, ActionEvent::FetchSucceeded { tier: format!("{used_tier:?}") });

        // Step 5.
        if fetch_result.text.trim().len() < self.min_content_length && fetch_result.html.len() < self.min_content_length {
            let url = job.url.clone();
            return self.fail_with(&mut job, ScrapeError::EmptyContent(url)).await;
        }

        // Step 6: gated on an LLM client being configured, since the
        // registered `Llm` extraction strategy needs one even though the
        // registry (not the orchestrator) holds the actual client handle.
        if let Some(task) = job.task_description.clone().filter(|_| self.llm.is_some()) {
            self.events.publish_action(job_id, ActionEvent::Extracting);
            let ctx = ExtractionContext {
                html: fetch_result.html.clone(),
                markdown: fetch_result.markdown.clone(),
                text: fetch_result.text.clone(),
                url: fetch_result.final_url.clone(),
                task_description: Some(task.clone()),
                entity_types: None,
            };
            let result = self
                .extraction
                .extract_with_fallback(&ctx, &[StrategyType::Llm, StrategyType::RuleBased, StrategyType::Cosine])
                .await;
            job.extracted_entities = result.entities;
            job.ai_processing = Some(crate::job::AiProcessing {
                model: None,
                prompt: Some(task),
                response: result.error.clone(),
                success: result.success,
                error: result.error,
            });
        }

        // Step 7.
        job.transition(JobStatus::Completed)?;
        self.repo.update(job).await?;
        self.events.publish_action(job_id, ActionEvent::StatusChanged { from: JobStatus::Running, to: JobStatus::Completed });
        self.events.publish_action(job_id, ActionEvent::Completed);
        Ok(())
    }

    fn record_payload(&self, job: &mut Job, tier: ScraperType, result: &FetchResult) {
        job.payload.html = result.html.clone();
        job.payload.markdown = result.markdown.clone();
        job.payload.text = result.text.clone();
        job.payload.screenshots = result.screenshots.clone();
        job.metadata.final_url = Some(result.final_url.clone());
        job.metadata.status_code = result.status_code;
        job.metadata.content_type = result.content_type.clone();
        job.metadata.page_title = result.page_title.clone();
        job.metadata.request_count = result.request_count;
        job.metadata.bytes = result.html.len() as u64 + result.text.len() as u64;
        job.metadata.scraper_used = Some(crate::fetch::infer_scraper_used(result, tier));
    }

    /// Marks `job` `Failed`, persists it, and returns `err` so the caller
    /// can just `return self.fail_with(...).await` from inside a match arm.
    async fn fail_with<T>(&self, job: &mut Job, err: ScrapeError) -> ScrapeResult<T> {
        job.transition(JobStatus::Failed)?;
        self.events.publish_action(&job.id, ActionEvent::Failed { reason: err.to_string() });
        self.repo.update(job.clone()).await?;
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_respects_cap_and_grows_with_attempt() {
        let base = Duration::from_millis(500);
        let first = calculate_retry_backoff(base, 0, FailureKind::Unknown);
        let later = calculate_retry_backoff(base, 10, FailureKind::Unknown);
        assert!(first <= MAX_BACKOFF);
        assert!(later <= MAX_BACKOFF);
    }

    #[test]
    fn rate_limited_failures_back_off_harder_than_network() {
        let base = Duration::from_millis(100);
        // Compare multipliers directly since jitter makes single draws flaky.
        assert!(FailureKind::RateLimited.delay_multiplier() > FailureKind::Network.delay_multiplier());
        let _ = base;
    }
}
