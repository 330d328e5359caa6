//! Job data model and repository abstraction (§3 Data model: Job).
//!
//! The repository trait is the "persistence schema is an abstract
//! repository with a narrow interface" out-of-scope boundary (§1): the
//! orchestrator only ever talks to `dyn JobRepository`.

pub mod memory_repository;
pub mod sqlite_repository;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extraction::Entity;
use crate::fetch::ScraperType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// §4.1's status machine: `Queued -> Running -> (Completed | Failed | Cancelled)`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Queued, Self::Cancelled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOptions {
    pub scraper_type: Option<ScraperType>,
    pub use_proxy: bool,
    pub block_resources: bool,
    pub capture_screenshots: bool,
    pub auth_cookies: Vec<(String, String)>,
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobMetadata {
    pub final_url: Option<String>,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub page_title: Option<String>,
    pub duration_ms: Option<u64>,
    pub request_count: u32,
    pub bytes: u64,
    pub retries: u32,
    pub scraper_used: Option<ScraperType>,
    pub from_cache: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiProcessing {
    pub model: Option<String>,
    pub prompt: Option<String>,
    pub response: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPayload {
    pub html: String,
    pub markdown: String,
    pub text: String,
    pub screenshots: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub url: String,
    pub task_description: Option<String>,
    pub status: JobStatus,
    pub scraper_type: ScraperType,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub options: JobOptions,
    pub payload: JobPayload,
    pub extracted_entities: Vec<Entity>,
    pub metadata: JobMetadata,
    pub ai_processing: Option<AiProcessing>,
    pub chat_history: Vec<ChatMessage>,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
}

impl Job {
    #[must_use]
    pub fn new(url: String, task_description: Option<String>, scraper_type: ScraperType, options: JobOptions) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url,
            task_description,
            status: JobStatus::Queued,
            scraper_type,
            user_id: None,
            session_id: None,
            options,
            payload: JobPayload::default(),
            extracted_entities: Vec::new(),
            metadata: JobMetadata::default(),
            ai_processing: None,
            chat_history: Vec::new(),
            created: Utc::now(),
            started: None,
            completed: None,
        }
    }

    /// Transition to `next`, stamping `started`/`completed` as the status
    /// machine requires. Idempotent: re-entering the same terminal status is
    /// a no-op rather than re-stamping `completed`.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), crate::errors::ScrapeError> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(crate::errors::ScrapeError::IllegalTransition(format!(
                "{:?} -> {:?}",
                self.status, next
            )));
        }
        if next == JobStatus::Running {
            self.started = Some(Utc::now());
        }
        if next.is_terminal() {
            self.completed = Some(Utc::now());
        }
        self.status = next;
        Ok(())
    }
}

#[async_trait::async_trait]
pub trait JobRepository: Send + Sync {
    async fn create(&self, job: Job) -> Result<Job, crate::errors::ScrapeError>;
    async fn get(&self, id: &str) -> Result<Option<Job>, crate::errors::ScrapeError>;
    async fn update(&self, job: Job) -> Result<Job, crate::errors::ScrapeError>;
    async fn delete(&self, id: &str) -> Result<bool, crate::errors::ScrapeError>;
    async fn list(&self, user_id: Option<&str>) -> Result<Vec<Job>, crate::errors::ScrapeError>;
    /// Most recent completed job for `url`+`session_id` within `within`,
    /// used by `scrape_and_answer`'s reuse-recent-job rule (§4.1).
    async fn find_recent_completed(
        &self,
        url: &str,
        session_id: Option<&str>,
        within: chrono::Duration,
    ) -> Result<Option<Job>, crate::errors::ScrapeError>;
}

pub fn entity_to_json(entity: &crate::extraction::Entity) -> Value {
    serde_json::to_value(entity).unwrap_or(Value::Null)
}
