//! In-memory `JobRepository`, for tests and single-process deployments
//! without a configured job store. Grounded on the `DashMap`-registry idiom
//! used throughout `circuit_breaker.rs`/`rate_limiter.rs`/`proxy/mod.rs`.

use dashmap::DashMap;

use super::{Job, JobRepository, JobStatus};
use crate::errors::ScrapeError;

#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: DashMap<String, Job>,
}

impl InMemoryJobRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, job: Job) -> Result<Job, ScrapeError> {
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, ScrapeError> {
        Ok(self.jobs.get(id).map(|r| r.clone()))
    }

    async fn update(&self, job: Job) -> Result<Job, ScrapeError> {
        if !self.jobs.contains_key(&job.id) {
            return Err(ScrapeError::NotFound(job.id));
        }
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn delete(&self, id: &str) -> Result<bool, ScrapeError> {
        Ok(self.jobs.remove(id).is_some())
    }

    async fn list(&self, user_id: Option<&str>) -> Result<Vec<Job>, ScrapeError> {
        let mut jobs: Vec<Job> = match user_id {
            Some(uid) => self.jobs.iter().filter(|e| e.user_id.as_deref() == Some(uid)).map(|e| e.clone()).collect(),
            None => self.jobs.iter().map(|e| e.clone()).collect(),
        };
        jobs.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(jobs)
    }

    async fn find_recent_completed(
        &self,
        url: &str,
        session_id: Option<&str>,
        within: chrono::Duration,
    ) -> Result<Option<Job>, ScrapeError> {
        let cutoff = chrono::Utc::now() - within;
        let mut candidates: Vec<Job> = self
            .jobs
            .iter()
            .filter(|e| {
                e.status == JobStatus::Completed
                    && e.url == url
                    && e.session_id.as_deref() == session_id
                    && e.completed.is_some_and(|c| c >= cutoff)
            })
            .map(|e| e.clone())
            .collect();
        candidates.sort_by(|a, b| b.completed.cmp(&a.completed));
        Ok(candidates.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::ScraperType;
    use crate::job::{Job, JobOptions};

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let repo = InMemoryJobRepository::new();
        let job = Job::new("https://example.com".to_string(), None, ScraperType::Auto, JobOptions::default());
        let id = job.id.clone();
        repo.create(job).await.unwrap();
        let fetched = repo.get(&id).await.unwrap();
        assert!(fetched.is_some());
    }

    #[tokio::test]
    async fn update_missing_job_returns_not_found() {
        let repo = InMemoryJobRepository::new();
        let job = Job::new("https://example.com".to_string(), None, ScraperType::Auto, JobOptions::default());
        let result = repo.update(job).await;
        assert!(matches!(result, Err(ScrapeError::NotFound(_))));
    }

    #[tokio::test]
    async fn find_recent_completed_respects_url_and_session() {
        let repo = InMemoryJobRepository::new();
        let mut job = Job::new("https://example.com".to_string(), None, ScraperType::Auto, JobOptions::default());
        job.session_id = Some("s1".to_string());
        job.transition(JobStatus::Running).unwrap();
        job.transition(JobStatus::Completed).unwrap();
        repo.create(job).await.unwrap();

        let found = repo
            .find_recent_completed("https://example.com", Some("s1"), chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert!(found.is_some());

        let not_found = repo
            .find_recent_completed("https://example.com", Some("other-session"), chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert!(not_found.is_none());
    }
}
