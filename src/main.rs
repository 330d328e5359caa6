//! Thin HTTP adapter (§10.5): wires `AppConfig`, the extraction registry,
//! an optional LLM client, a job repository, and the scrape orchestrator
//! behind an axum router.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::trace::TraceLayer;

use scrapeweave::config::AppConfig;
use scrapeweave::events::{EventBus, ProgressEvent};
use scrapeweave::extraction::cosine_strategy::CosineStrategy;
use scrapeweave::extraction::llm_strategy::{LlmProvider, LlmStrategy};
use scrapeweave::extraction::rule_strategy::{default_rule_sets, RuleStrategy};
use scrapeweave::extraction::ExtractionRegistry;
use scrapeweave::job::memory_repository::InMemoryJobRepository;
use scrapeweave::job::sqlite_repository::SqliteJobRepository;
use scrapeweave::job::{Job, JobOptions, JobRepository};
use scrapeweave::llm::{AnthropicBackend, LlmClient, ModelFallbackClient};
use scrapeweave::{ScrapeError, ScrapeOrchestrator, ScraperType};

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<ScrapeOrchestrator>,
    events: Arc<EventBus>,
}

fn error_status(err: &ScrapeError) -> StatusCode {
    match err {
        ScrapeError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ScrapeError::NotFound(_) => StatusCode::NOT_FOUND,
        ScrapeError::NoContent(_) => StatusCode::CONFLICT,
        ScrapeError::IllegalTransition(_) => StatusCode::CONFLICT,
        ScrapeError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        ScrapeError::CircuitOpen(_) | ScrapeError::Overloaded(_) | ScrapeError::Timeout(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ScrapeError::EmptyContent(_) | ScrapeError::DownstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Local wrapper so this crate can impl the foreign `IntoResponse` trait —
/// `ScrapeError` itself lives in the library crate, and axum's trait can't
/// be implemented for it directly here (orphan rule).
struct ApiError(ScrapeError);

impl From<ScrapeError> for ApiError {
    fn from(err: ScrapeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = error_status(&self.0);
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct CreateJobRequest {
    url: String,
    task_description: Option<String>,
    scraper_type: Option<ScraperType>,
    #[serde(default)]
    options: JobOptions,
}

async fn create_job(State(state): State<AppState>, Json(req): Json<CreateJobRequest>) -> Result<Json<Job>, ApiError> {
    let scraper_type = req.scraper_type.unwrap_or(ScraperType::Auto);
    let job = state.orchestrator.create_job(req.url, req.task_description, scraper_type, req.options).await?;
    Ok(Json(job))
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Job>, ApiError> {
    match state.orchestrator.get_job(&id).await? {
        Some(job) => Ok(Json(job)),
        None => Err(ScrapeError::NotFound(id).into()),
    }
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    user_id: Option<String>,
}

async fn list_jobs(State(state): State<AppState>, Query(q): Query<ListJobsQuery>) -> Result<Json<Vec<Job>>, ApiError> {
    let jobs = state.orchestrator.list_jobs(q.user_id.as_deref()).await?;
    Ok(Json(jobs))
}

async fn delete_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    if state.orchestrator.delete_job(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ScrapeError::NotFound(id).into())
    }
}

async fn cancel_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Job>, ApiError> {
    let job = state.orchestrator.cancel_job(&id).await?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
}

async fn chat_with_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<Job>, ApiError> {
    let job = state.orchestrator.chat_with_job(&id, req.message).await?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
struct ScrapeAndAnswerRequest {
    url: String,
    question: Option<String>,
    session_id: Option<String>,
    #[serde(default)]
    options: JobOptions,
}

async fn scrape_and_answer(
    State(state): State<AppState>,
    Json(req): Json<ScrapeAndAnswerRequest>,
) -> Result<Json<Job>, ApiError> {
    let job = state
        .orchestrator
        .scrape_and_answer(req.url, req.question, req.session_id, req.options)
        .await?;
    Ok(Json(job))
}

async fn job_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let stream = BroadcastStream::new(state.events.subscribe())
        .filter_map(move |item| item.ok())
        .filter(move |event: &ProgressEvent| event.job_id == id)
        .map(|event| Event::default().json_data(&event).unwrap_or_else(|_| Event::default()))
        .map(Ok);
    Sse::new(stream)
}

fn build_extraction_registry(config: &AppConfig, llm: Option<Arc<dyn LlmClient>>) -> Arc<ExtractionRegistry> {
    let registry = ExtractionRegistry::new();

    let rule_strategy = RuleStrategy::new(
        default_rule_sets(),
        config.rule_based_strict_mode,
        config.cosine_similarity_max_entities,
    );
    registry.register(Box::new(rule_strategy), true);

    let cosine_strategy = CosineStrategy::new(config.cosine_similarity_threshold, config.cosine_similarity_max_entities);
    registry.register(Box::new(cosine_strategy), false);

    if let Some(client) = llm {
        let llm_strategy = LlmStrategy::new(LlmProvider::Anthropic, client, config.cosine_similarity_max_entities);
        registry.register(Box::new(llm_strategy), false);
    }

    Arc::new(registry)
}

fn build_llm_client() -> Option<Arc<dyn LlmClient>> {
    let api_key = std::env::var("ANTHROPIC_API_KEY").ok()?;
    let models = std::env::var("ANTHROPIC_MODELS")
        .map(|raw| raw.split(',').map(str::trim).map(str::to_string).collect())
        .unwrap_or_else(|_| vec!["claude-3-5-sonnet-latest".to_string(), "claude-3-haiku-latest".to_string()]);
    let backend = Arc::new(AnthropicBackend::new(api_key));
    Some(Arc::new(ModelFallbackClient::new(backend, models)))
}

async fn build_job_repository() -> anyhow::Result<Arc<dyn JobRepository>> {
    match std::env::var("JOB_DB_PATH") {
        Ok(path) => Ok(Arc::new(SqliteJobRepository::connect(path).await?)),
        Err(_) => Ok(Arc::new(InMemoryJobRepository::new())),
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/jobs", post(create_job).get(list_jobs))
        .route("/jobs/{id}", get(get_job).delete(delete_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/jobs/{id}/chat", post(chat_with_job))
        .route("/jobs/{id}/events", get(job_events))
        .route("/scrape-and-answer", post(scrape_and_answer))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = scrapeweave::config::from_env()?;
    let port = config.port;

    let llm = build_llm_client();
    let extraction = build_extraction_registry(&config, llm.clone());
    let repo = build_job_repository().await?;
    let events = Arc::new(EventBus::default());

    let orchestrator = Arc::new(ScrapeOrchestrator::new(&config, repo, extraction, llm, events.clone()));
    let state = AppState { orchestrator, events };

    let router = build_router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "scrapeweave listening");
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn router_builds_without_panicking() {
        let config = AppConfig::default();
        let extraction = build_extraction_registry(&config, None);
        let repo: Arc<dyn JobRepository> = Arc::new(InMemoryJobRepository::new());
        let events = Arc::new(EventBus::default());
        let orchestrator = Arc::new(ScrapeOrchestrator::new(&config, repo, extraction, None, events.clone()));
        let _router = build_router(AppState { orchestrator, events });
    }

    #[test]
    fn error_status_maps_not_found_to_404() {
        assert_eq!(error_status(&ScrapeError::NotFound("x".to_string())), StatusCode::NOT_FOUND);
    }

    #[test]
    fn build_llm_client_returns_none_without_api_key() {
        // SAFETY: test-only, single-threaded within this process's test harness.
        unsafe { std::env::remove_var("ANTHROPIC_API_KEY") };
        assert!(build_llm_client().is_none());
    }
}
