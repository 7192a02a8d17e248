//! The job record and its state machine.
//!
//! ```text
//! Pending ──► Processing ──► Completed
//!    ▲            │
//!    │            ├─(retries left)──► Retrying ──► Processing
//!    │            └─(exhausted)─────► Failed
//!    │
//!    └──── retry ◄── Failed | Cancelled ◄── cancel ◄── Pending | Processing | Retrying
//! ```
//!
//! Transitions never mutate in place: [`Job::decide`] validates a command and
//! returns the events it would produce, [`Job::apply`] folds one event into
//! state, and [`Job::execute`] combines both on a copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scoreline_core::UserId;
use scoreline_events::Event;

use crate::error::JobError;
use crate::retry::{Backoff, RetryPolicy};
use crate::types::{JobId, JobStatus};

/// Request to create a job.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub job_type: String,
    pub payload: serde_json::Value,
    /// `None` leaves the choice to whoever submits the job.
    pub retry_policy: Option<RetryPolicy>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_by_user_id: Option<UserId>,
    pub correlation_id: Option<String>,
}

impl NewJob {
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            retry_policy: None,
            scheduled_at: None,
            created_by_user_id: None,
            correlation_id: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry_policy
            .get_or_insert_with(RetryPolicy::default)
            .max_retries = max_retries;
        self
    }

    /// Hold the job until `at`.
    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn created_by(mut self, user_id: UserId) -> Self {
        self.created_by_user_id = Some(user_id);
        self
    }

    pub fn correlated_with(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// A retryable, state-tracked unit of asynchronous work.
///
/// `payload` and `result` are opaque here; they are interpreted by the handler
/// registered for `job_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    id: JobId,
    job_type: String,
    status: JobStatus,
    payload: serde_json::Value,
    result: Option<serde_json::Value>,
    error: Option<String>,
    retry_count: u32,
    max_retries: u32,
    backoff: Backoff,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    scheduled_at: Option<DateTime<Utc>>,
    created_by_user_id: Option<UserId>,
    correlation_id: Option<String>,
}

/// Commands accepted by the job state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum JobCommand {
    MarkProcessing,
    MarkCompleted { result: serde_json::Value },
    MarkFailed { error: String },
    Cancel,
    Retry,
}

impl JobCommand {
    pub fn name(&self) -> &'static str {
        match self {
            JobCommand::MarkProcessing => "mark_processing",
            JobCommand::MarkCompleted { .. } => "mark_completed",
            JobCommand::MarkFailed { .. } => "mark_failed",
            JobCommand::Cancel => "cancel",
            JobCommand::Retry => "retry",
        }
    }
}

/// Event: JobCreated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCreated {
    pub job_id: JobId,
    pub job_type: String,
    pub max_retries: u32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_by_user_id: Option<UserId>,
    pub correlation_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: JobStatusChanged.
///
/// `retry_count` is the count after the transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusChanged {
    pub job_id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
    pub retry_count: u32,
    pub result: Option<serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: JobFailed (automatic retries exhausted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailed {
    pub job_id: JobId,
    pub error: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: JobRetrying (another automatic attempt is scheduled).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRetrying {
    pub job_id: JobId,
    pub error: String,
    pub retry_count: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobEvent {
    Created(JobCreated),
    StatusChanged(JobStatusChanged),
    Failed(JobFailed),
    Retrying(JobRetrying),
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Created(e) => e.job_id,
            JobEvent::StatusChanged(e) => e.job_id,
            JobEvent::Failed(e) => e.job_id,
            JobEvent::Retrying(e) => e.job_id,
        }
    }
}

impl Event for JobEvent {
    fn event_type(&self) -> &'static str {
        match self {
            JobEvent::Created(_) => "jobs.job.created",
            JobEvent::StatusChanged(_) => "jobs.job.status_changed",
            JobEvent::Failed(_) => "jobs.job.failed",
            JobEvent::Retrying(_) => "jobs.job.retrying",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            JobEvent::Created(e) => e.occurred_at,
            JobEvent::StatusChanged(e) => e.occurred_at,
            JobEvent::Failed(e) => e.occurred_at,
            JobEvent::Retrying(e) => e.occurred_at,
        }
    }
}

/// New state plus the events that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub job: Job,
    pub events: Vec<JobEvent>,
}

impl Job {
    /// Create a job in `Pending`.
    pub fn create(request: NewJob, at: DateTime<Utc>) -> Transition {
        Self::create_with_id(JobId::new(), request, at)
    }

    /// Create a job with a caller-chosen id (deterministic tests, imports).
    pub fn create_with_id(id: JobId, request: NewJob, at: DateTime<Utc>) -> Transition {
        let NewJob {
            job_type,
            payload,
            retry_policy,
            scheduled_at,
            created_by_user_id,
            correlation_id,
        } = request;
        let retry_policy = retry_policy.unwrap_or_default();

        let job = Self {
            id,
            job_type,
            status: JobStatus::Pending,
            payload,
            result: None,
            error: None,
            retry_count: 0,
            max_retries: retry_policy.max_retries,
            backoff: retry_policy.backoff,
            created_at: at,
            started_at: None,
            completed_at: None,
            scheduled_at,
            created_by_user_id,
            correlation_id,
        };

        let created = JobEvent::Created(JobCreated {
            job_id: job.id,
            job_type: job.job_type.clone(),
            max_retries: job.max_retries,
            scheduled_at: job.scheduled_at,
            created_by_user_id: job.created_by_user_id,
            correlation_id: job.correlation_id.clone(),
            occurred_at: at,
        });

        Transition {
            job,
            events: vec![created],
        }
    }

    pub fn id_typed(&self) -> JobId {
        self.id
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_at
    }

    pub fn created_by_user_id(&self) -> Option<UserId> {
        self.created_by_user_id
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Claimable and not held back by a schedule.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.scheduled_at.is_none_or(|at| at <= now)
    }

    /// Operator-facing report for a job whose automatic retries are exhausted.
    pub fn failure_report(&self) -> Option<JobError> {
        if self.status != JobStatus::Failed {
            return None;
        }
        Some(JobError::MaxRetriesExceeded {
            job_id: self.id,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            last_error: self.error.clone().unwrap_or_default(),
        })
    }

    /// Validate `command` against the current status and return the events it
    /// produces. Does not mutate.
    pub fn decide(&self, command: &JobCommand, at: DateTime<Utc>) -> Result<Vec<JobEvent>, JobError> {
        match command {
            JobCommand::MarkProcessing => {
                self.ensure(command, self.status.is_claimable())?;
                Ok(vec![self.status_changed(JobStatus::Processing, self.retry_count, None, at)])
            }
            JobCommand::MarkCompleted { result } => {
                self.ensure(command, self.status == JobStatus::Processing)?;
                Ok(vec![self.status_changed(
                    JobStatus::Completed,
                    self.retry_count,
                    Some(result.clone()),
                    at,
                )])
            }
            JobCommand::MarkFailed { error } => {
                self.ensure(command, self.status == JobStatus::Processing)?;
                let retry_count = self.retry_count.saturating_add(1);

                if retry_count >= self.max_retries {
                    Ok(vec![
                        self.status_changed(JobStatus::Failed, retry_count, None, at),
                        JobEvent::Failed(JobFailed {
                            job_id: self.id,
                            error: error.clone(),
                            retry_count,
                            max_retries: self.max_retries,
                            occurred_at: at,
                        }),
                    ])
                } else {
                    let delay = self.backoff.delay_for_attempt(retry_count);
                    let next_attempt_at =
                        at + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                    Ok(vec![
                        self.status_changed(JobStatus::Retrying, retry_count, None, at),
                        JobEvent::Retrying(JobRetrying {
                            job_id: self.id,
                            error: error.clone(),
                            retry_count,
                            next_attempt_at,
                            occurred_at: at,
                        }),
                    ])
                }
            }
            JobCommand::Cancel => {
                self.ensure(command, self.status.is_cancellable())?;
                Ok(vec![self.status_changed(JobStatus::Cancelled, self.retry_count, None, at)])
            }
            JobCommand::Retry => {
                self.ensure(command, self.status.is_manually_retriable())?;
                // Shares the automatic counter and ignores max_retries.
                Ok(vec![self.status_changed(
                    JobStatus::Pending,
                    self.retry_count.saturating_add(1),
                    None,
                    at,
                )])
            }
        }
    }

    /// Evolve state from a single event.
    pub fn apply(&mut self, event: &JobEvent) {
        match event {
            JobEvent::Created(_) => {}
            JobEvent::StatusChanged(e) => {
                self.status = e.to;
                self.retry_count = e.retry_count;
                match e.to {
                    JobStatus::Processing => self.started_at = Some(e.occurred_at),
                    JobStatus::Completed => {
                        self.completed_at = Some(e.occurred_at);
                        self.result = e.result.clone();
                    }
                    JobStatus::Failed | JobStatus::Cancelled => {
                        self.completed_at = Some(e.occurred_at);
                    }
                    JobStatus::Pending => {
                        self.error = None;
                        self.completed_at = None;
                        self.scheduled_at = None;
                    }
                    JobStatus::Retrying => {}
                }
            }
            JobEvent::Failed(e) => self.error = Some(e.error.clone()),
            JobEvent::Retrying(e) => {
                self.error = Some(e.error.clone());
                self.scheduled_at = Some(e.next_attempt_at);
            }
        }
    }

    /// Decide + apply on a copy.
    pub fn execute(&self, command: &JobCommand, at: DateTime<Utc>) -> Result<Transition, JobError> {
        let events = self.decide(command, at)?;
        let mut job = self.clone();
        for event in &events {
            job.apply(event);
        }
        Ok(Transition { job, events })
    }

    pub fn mark_processing(&self, at: DateTime<Utc>) -> Result<Transition, JobError> {
        self.execute(&JobCommand::MarkProcessing, at)
    }

    pub fn mark_completed(
        &self,
        result: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<Transition, JobError> {
        self.execute(&JobCommand::MarkCompleted { result }, at)
    }

    pub fn mark_failed(
        &self,
        error: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<Transition, JobError> {
        self.execute(&JobCommand::MarkFailed { error: error.into() }, at)
    }

    pub fn cancel(&self, at: DateTime<Utc>) -> Result<Transition, JobError> {
        self.execute(&JobCommand::Cancel, at)
    }

    pub fn retry(&self, at: DateTime<Utc>) -> Result<Transition, JobError> {
        self.execute(&JobCommand::Retry, at)
    }

    fn ensure(&self, command: &JobCommand, allowed: bool) -> Result<(), JobError> {
        if allowed {
            Ok(())
        } else {
            Err(JobError::InvalidStateTransition {
                job_id: self.id,
                from: self.status,
                action: command.name(),
            })
        }
    }

    fn status_changed(
        &self,
        to: JobStatus,
        retry_count: u32,
        result: Option<serde_json::Value>,
        at: DateTime<Utc>,
    ) -> JobEvent {
        JobEvent::StatusChanged(JobStatusChanged {
            job_id: self.id,
            from: self.status,
            to,
            retry_count,
            result,
            occurred_at: at,
        })
    }
}
