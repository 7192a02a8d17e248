//! Dispatcher: the seam between job producers and the worker pool.
//!
//! In-process the job store doubles as the queue, so dispatching a job means
//! persisting it in a claimable state; a broker-backed transport would
//! implement the same trait.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use scoreline_core::Clock;
use scoreline_jobs::{Job, JobId, JobStatus, NewJob, RetryPolicy};

use super::events::JobEventPublisher;
use super::store::{JobStore, JobStoreError};

/// Reference to a scheduled job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    pub job_id: JobId,
    pub job_type: String,
    pub correlation_id: Option<String>,
}

impl JobHandle {
    fn of(job: &Job) -> Self {
        Self {
            job_id: job.id_typed(),
            job_type: job.job_type().to_string(),
            correlation_id: job.correlation_id().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error("job {job_id} cannot be dispatched while {status}")]
    NotDispatchable { job_id: JobId, status: JobStatus },
    #[error("job payload could not be encoded: {0}")]
    InvalidPayload(String),
}

pub trait Dispatcher: Send + Sync {
    /// Create and schedule a job.
    fn submit(&self, job: NewJob) -> Result<JobHandle, DispatchError>;

    /// Create and schedule a job with default options.
    fn enqueue(
        &self,
        job_type: &str,
        payload: serde_json::Value,
    ) -> Result<JobHandle, DispatchError> {
        self.submit(NewJob::new(job_type, payload))
    }

    /// Hand an existing job record back to the execution environment.
    fn dispatch(&self, job: &Job) -> Result<JobHandle, DispatchError>;
}

/// Dispatcher backed directly by a [`JobStore`].
pub struct StoreDispatcher {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    publisher: JobEventPublisher,
    default_policy: RetryPolicy,
}

impl StoreDispatcher {
    pub fn new(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>, publisher: JobEventPublisher) -> Self {
        Self {
            store,
            clock,
            publisher,
            default_policy: RetryPolicy::default(),
        }
    }

    /// Policy applied to submitted jobs that do not carry their own.
    pub fn with_default_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_policy = policy;
        self
    }
}

impl Dispatcher for StoreDispatcher {
    fn submit(&self, mut job: NewJob) -> Result<JobHandle, DispatchError> {
        if job.retry_policy.is_none() {
            job.retry_policy = Some(self.default_policy.clone());
        }

        let created = Job::create(job, self.clock.now());
        self.store.insert(created.job.clone())?;
        self.publisher.publish(&created.job, &created.events);

        debug!(
            job_id = %created.job.id_typed(),
            job_type = created.job.job_type(),
            max_retries = created.job.max_retries(),
            correlation_id = created.job.correlation_id().unwrap_or("-"),
            "job enqueued"
        );
        Ok(JobHandle::of(&created.job))
    }

    fn dispatch(&self, job: &Job) -> Result<JobHandle, DispatchError> {
        if !job.status().is_claimable() {
            return Err(DispatchError::NotDispatchable {
                job_id: job.id_typed(),
                status: job.status(),
            });
        }

        self.store.save(job.clone())?;
        debug!(job_id = %job.id_typed(), job_type = job.job_type(), "job dispatched");
        Ok(JobHandle::of(job))
    }
}
