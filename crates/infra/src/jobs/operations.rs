//! Operator surface over the job lifecycle.

use std::sync::Arc;

use tracing::info;

use scoreline_core::Clock;
use scoreline_jobs::{Job, JobCommand, JobError, JobId, JobStatus};

use super::dispatcher::{DispatchError, Dispatcher};
use super::events::JobEventPublisher;
use super::store::{JobFilter, JobStats, JobStore, JobStoreError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationsError {
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// List, inspect, cancel and reopen jobs.
pub struct JobOperations {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<dyn Dispatcher>,
    clock: Arc<dyn Clock>,
    publisher: JobEventPublisher,
}

impl JobOperations {
    pub fn new(
        store: Arc<dyn JobStore>,
        dispatcher: Arc<dyn Dispatcher>,
        clock: Arc<dyn Clock>,
        publisher: JobEventPublisher,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            publisher,
        }
    }

    pub fn get(&self, job_id: JobId) -> Result<Job, OperationsError> {
        self.store
            .get(job_id)?
            .ok_or(OperationsError::Store(JobStoreError::NotFound(job_id)))
    }

    pub fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, OperationsError> {
        Ok(self.store.list(filter)?)
    }

    pub fn stats(&self) -> Result<JobStats, OperationsError> {
        Ok(self.store.stats()?)
    }

    /// Jobs whose automatic retries are exhausted, with their last error.
    pub fn failures(&self) -> Result<Vec<JobError>, OperationsError> {
        let failed = self
            .store
            .list(&JobFilter::all().with_status(JobStatus::Failed))?;
        Ok(failed.iter().filter_map(Job::failure_report).collect())
    }

    /// Cancel a pending, running or retrying job.
    ///
    /// A running job is not interrupted; the executor discards its outcome.
    pub fn cancel(&self, job_id: JobId) -> Result<Job, OperationsError> {
        let transition = self
            .store
            .transition(job_id, &JobCommand::Cancel, self.clock.now())?;
        self.publisher.publish(&transition.job, &transition.events);

        info!(job_id = %job_id, job_type = transition.job.job_type(), "job cancelled");
        Ok(transition.job)
    }

    /// Reopen a failed or cancelled job and hand it back to the workers.
    ///
    /// Not bounded by `max_retries`; shares `retry_count` with automatic
    /// retries.
    pub fn retry(&self, job_id: JobId) -> Result<Job, OperationsError> {
        let transition = self
            .store
            .transition(job_id, &JobCommand::Retry, self.clock.now())?;
        self.publisher.publish(&transition.job, &transition.events);
        self.dispatcher.dispatch(&transition.job)?;

        info!(
            job_id = %job_id,
            job_type = transition.job.job_type(),
            retry_count = transition.job.retry_count(),
            "job retried by operator"
        );
        Ok(transition.job)
    }
}
