//! Crate-wide error taxonomy
//!
//! Fetchers and extraction/validation strategies use soft-failure
//! conventions internally (`Option` / `success: bool`, see
//! `fetch::FetchResult` and `extraction::ExtractionResult`). `ScrapeError`
//! is the boundary type: the orchestrator converts internal failures into
//! one of these variants when a job transitions to `Failed`, and the HTTP
//! adapter maps them to status codes.

use thiserror::Error;

/// Crate-wide error taxonomy (spec §7).
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// URL parse failure, empty input, or unsupported scraper type.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// All fetchers returned too-little content.
    #[error("empty content: {0}")]
    EmptyContent(String),

    /// A downstream dependency (Redis, LLM API, browser, proxy pool) is
    /// unavailable. Recoverable by fallback where possible.
    #[error("downstream unavailable: {0}")]
    DownstreamUnavailable(String),

    /// 429/503 from a downstream after retries exhausted.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// 503-class overload from a downstream after retries exhausted.
    #[error("overloaded: {0}")]
    Overloaded(String),

    /// The circuit breaker for this host is open.
    #[error("circuit open for host: {0}")]
    CircuitOpen(String),

    /// A per-tier timeout expired.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Attempted an illegal job status transition (e.g. cancel on a
    /// terminal job).
    #[error("illegal transition: {0}")]
    IllegalTransition(String),

    /// Job id not found in the repository.
    #[error("job not found: {0}")]
    NotFound(String),

    /// Chat/summarize requested on a job with no stored content.
    #[error("no content available for job {0}")]
    NoContent(String),
}

impl From<anyhow::Error> for ScrapeError {
    fn from(err: anyhow::Error) -> Self {
        Self::DownstreamUnavailable(format!("{err:#}"))
    }
}

pub type ScrapeResult<T> = Result<T, ScrapeError>;
