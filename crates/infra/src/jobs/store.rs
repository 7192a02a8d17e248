//! Job storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use scoreline_jobs::{Job, JobCommand, JobError, JobId, JobStatus, Transition};

/// Job store abstraction.
///
/// `transition` and `claim_next` are the atomic units of the job lifecycle:
/// the command is validated against the stored record and the result is
/// persisted under the same lock. A rejected command persists nothing.
pub trait JobStore: Send + Sync {
    /// Insert a freshly created job.
    fn insert(&self, job: Job) -> Result<(), JobStoreError>;

    /// Insert or overwrite a job record.
    fn save(&self, job: Job) -> Result<(), JobStoreError>;

    /// Get a job by ID.
    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Apply `command` to the stored job and persist the outcome.
    fn transition(
        &self,
        job_id: JobId,
        command: &JobCommand,
        at: DateTime<Utc>,
    ) -> Result<Transition, JobStoreError>;

    /// Like [`JobStore::transition`], but only while the stored job is still
    /// on the attempt identified by `retry_count`.
    ///
    /// A job reopened after it was claimed carries a higher `retry_count`;
    /// commands from the earlier attempt then fail with
    /// [`JobStoreError::StaleAttempt`].
    fn transition_attempt(
        &self,
        job_id: JobId,
        retry_count: u32,
        command: &JobCommand,
        at: DateTime<Utc>,
    ) -> Result<Transition, JobStoreError>;

    /// Claim the next ready job and move it to `Processing`.
    /// Returns None if no jobs are available.
    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Transition>, JobStoreError>;

    /// List jobs matching `filter`, oldest first.
    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError>;

    /// Get job statistics.
    fn stats(&self) -> Result<JobStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error(transparent)]
    Transition(#[from] JobError),
    #[error("job {job_id} moved from attempt {claimed} to {current}")]
    StaleAttempt {
        job_id: JobId,
        claimed: u32,
        current: u32,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Listing filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<String>,
    pub correlation_id: Option<String>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.status.is_none_or(|s| job.status() == s)
            && self.job_type.as_deref().is_none_or(|t| job.job_type() == t)
            && self
                .correlation_id
                .as_deref()
                .is_none_or(|c| job.correlation_id() == Some(c))
    }
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub retrying: usize,
    pub cancelled: usize,
}

impl JobStats {
    fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Retrying => self.retrying += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed + self.retrying + self.cancelled
    }
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn poisoned() -> JobStoreError {
    JobStoreError::Storage("job store lock poisoned".to_string())
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        let id = job.id_typed();
        if jobs.contains_key(&id) {
            return Err(JobStoreError::AlreadyExists(id));
        }
        jobs.insert(id, job);
        Ok(())
    }

    fn save(&self, job: Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        jobs.insert(job.id_typed(), job);
        Ok(())
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        Ok(jobs.get(&job_id).cloned())
    }

    fn transition(
        &self,
        job_id: JobId,
        command: &JobCommand,
        at: DateTime<Utc>,
    ) -> Result<Transition, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        let current = jobs.get(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        let transition = current.execute(command, at)?;
        jobs.insert(job_id, transition.job.clone());
        Ok(transition)
    }

    fn transition_attempt(
        &self,
        job_id: JobId,
        retry_count: u32,
        command: &JobCommand,
        at: DateTime<Utc>,
    ) -> Result<Transition, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        let current = jobs.get(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        if current.retry_count() != retry_count {
            return Err(JobStoreError::StaleAttempt {
                job_id,
                claimed: retry_count,
                current: current.retry_count(),
            });
        }
        let transition = current.execute(command, at)?;
        jobs.insert(job_id, transition.job.clone());
        Ok(transition)
    }

    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Transition>, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;

        // Oldest due job first: retries are due at their scheduled time.
        let next = jobs
            .values()
            .filter(|j| j.is_ready(now))
            .min_by_key(|j| (j.scheduled_at().unwrap_or(j.created_at()), j.created_at(), j.id_typed()))
            .map(Job::id_typed);

        let Some(job_id) = next else {
            return Ok(None);
        };
        let Some(job) = jobs.get(&job_id) else {
            return Ok(None);
        };

        let transition = job.mark_processing(now)?;
        jobs.insert(job_id, transition.job.clone());
        Ok(Some(transition))
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        let mut result: Vec<Job> = jobs.values().filter(|j| filter.matches(j)).cloned().collect();

        result.sort_by_key(|j| (j.created_at(), j.id_typed()));
        if let Some(limit) = filter.limit {
            result.truncate(limit);
        }
        Ok(result)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        let mut stats = JobStats::default();
        for job in jobs.values() {
            stats.record(job.status());
        }
        Ok(stats)
    }
}
