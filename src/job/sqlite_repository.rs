//! SQLite-backed `JobRepository` (§3 Job persistence).
//!
//! Connection/schema setup is lifted directly from `link_index/mod.rs`'s
//! WAL-mode SQLite idiom. The job itself is stored as a JSON blob (its
//! shape is still evolving field-by-field across strategies/extraction
//! versions) alongside indexed columns for the lookups the repository
//! contract actually needs: id, url, session, status, created.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::{Job, JobRepository, JobStatus};
use crate::errors::ScrapeError;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    session_id TEXT,
    user_id TEXT,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    completed_at INTEGER,
    body TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_session_url ON jobs(session_id, url);
CREATE INDEX IF NOT EXISTS idx_jobs_user ON jobs(user_id);
"#;

#[derive(Clone)]
pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub async fn connect(db_path: impl AsRef<Path>) -> Result<Self, ScrapeError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| ScrapeError::DownstreamUnavailable(format!("sqlite connect: {e}")))?;

        sqlx::query(SCHEMA_SQL)
            .execute(&pool)
            .await
            .map_err(|e| ScrapeError::DownstreamUnavailable(format!("sqlite schema: {e}")))?;

        Ok(Self { pool })
    }

    fn encode(job: &Job) -> Result<String, ScrapeError> {
        serde_json::to_string(job).map_err(|e| ScrapeError::DownstreamUnavailable(format!("job encode: {e}")))
    }

    fn decode(body: &str) -> Result<Job, ScrapeError> {
        serde_json::from_str(body).map_err(|e| ScrapeError::DownstreamUnavailable(format!("job decode: {e}")))
    }

    fn status_str(status: JobStatus) -> &'static str {
        match status {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

#[async_trait::async_trait]
impl JobRepository for SqliteJobRepository {
    async fn create(&self, job: Job) -> Result<Job, ScrapeError> {
        let body = Self::encode(&job)?;
        sqlx::query(
            "INSERT INTO jobs (id, url, session_id, user_id, status, created_at, completed_at, body) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(&job.url)
        .bind(&job.session_id)
        .bind(&job.user_id)
        .bind(Self::status_str(job.status))
        .bind(job.created.timestamp())
        .bind(job.completed.map(|c| c.timestamp()))
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(|e| ScrapeError::DownstreamUnavailable(format!("sqlite insert: {e}")))?;
        Ok(job)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, ScrapeError> {
        let row = sqlx::query("SELECT body FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ScrapeError::DownstreamUnavailable(format!("sqlite select: {e}")))?;
        match row {
            Some(row) => {
                let body: String = row.try_get("body").map_err(|e| ScrapeError::DownstreamUnavailable(e.to_string()))?;
                Ok(Some(Self::decode(&body)?))
            }
            None => Ok(None),
        }
    }

    async fn update(&self, job: Job) -> Result<Job, ScrapeError> {
        let body = Self::encode(&job)?;
        let result = sqlx::query(
            "UPDATE jobs SET url = ?, session_id = ?, user_id = ?, status = ?, completed_at = ?, body = ? \
             WHERE id = ?",
        )
        .bind(&job.url)
        .bind(&job.session_id)
        .bind(&job.user_id)
        .bind(Self::status_str(job.status))
        .bind(job.completed.map(|c| c.timestamp()))
        .bind(&body)
        .bind(&job.id)
        .execute(&self.pool)
        .await
        .map_err(|e| ScrapeError::DownstreamUnavailable(format!("sqlite update: {e}")))?;
        if result.rows_affected() == 0 {
            return Err(ScrapeError::NotFound(job.id));
        }
        Ok(job)
    }

    async fn delete(&self, id: &str) -> Result<bool, ScrapeError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| ScrapeError::DownstreamUnavailable(format!("sqlite delete: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, user_id: Option<&str>) -> Result<Vec<Job>, ScrapeError> {
        let rows = match user_id {
            Some(uid) => {
                sqlx::query("SELECT body FROM jobs WHERE user_id = ? ORDER BY created_at DESC")
                    .bind(uid)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT body FROM jobs ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| ScrapeError::DownstreamUnavailable(format!("sqlite list: {e}")))?;

        rows.iter()
            .map(|row| {
                let body: String = row.try_get("body").map_err(|e| ScrapeError::DownstreamUnavailable(e.to_string()))?;
                Self::decode(&body)
            })
            .collect()
    }

    async fn find_recent_completed(
        &self,
        url: &str,
        session_id: Option<&str>,
        within: chrono::Duration,
    ) -> Result<Option<Job>, ScrapeError> {
        let cutoff: DateTime<Utc> = Utc::now() - within;
        let row = sqlx::query(
            "SELECT body FROM jobs WHERE url = ? AND session_id IS ? AND status = 'completed' \
             AND completed_at >= ? ORDER BY completed_at DESC LIMIT 1",
        )
        .bind(url)
        .bind(session_id)
        .bind(cutoff.timestamp())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ScrapeError::DownstreamUnavailable(format!("sqlite recent-completed: {e}")))?;
        match row {
            Some(row) => {
                let body: String = row.try_get("body").map_err(|e| ScrapeError::DownstreamUnavailable(e.to_string()))?;
                Ok(Some(Self::decode(&body)?))
            }
            None => Ok(None),
        }
    }
}
