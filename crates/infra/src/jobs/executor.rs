//! Job executor: handler registry plus a pool of polling worker threads.

use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use scoreline_core::Clock;
use scoreline_jobs::{Job, JobCommand, JobError, JobId, JobStatus};

use super::events::JobEventPublisher;
use super::store::{JobStore, JobStoreError};

/// Work performed for one job type.
///
/// Handlers must be idempotent: a job may run again after a failure, a
/// redelivery or a manual retry.
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;

    fn handle(&self, job: &Job) -> anyhow::Result<serde_json::Value>;
}

/// Job executor configuration.
#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// How often an idle worker polls for new jobs
    pub poll_interval: Duration,
    /// Number of worker threads
    pub workers: usize,
    /// Name for logging and thread names
    pub name: String,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            workers: 4,
            name: "job-executor".to_string(),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// What happened to a claimed job.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed(JobId),
    /// Failed with attempts left; due again at `next_attempt_at`.
    Retrying {
        job_id: JobId,
        retry_count: u32,
        next_attempt_at: Option<DateTime<Utc>>,
    },
    /// Automatic retries exhausted.
    Failed(JobError),
    /// Cancelled while the handler ran; its outcome was discarded.
    CancelledDuringExecution(JobId),
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub jobs_failed: u64,
    pub jobs_discarded: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// Runs claimed jobs through their registered handler and records the
/// outcome as a state-machine transition.
pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    clock: Arc<dyn Clock>,
    publisher: JobEventPublisher,
    stats: Mutex<ExecutorStats>,
    started: Instant,
}

impl JobExecutor {
    pub fn new(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>, publisher: JobEventPublisher) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
            clock,
            publisher,
            stats: Mutex::new(ExecutorStats::default()),
            started: Instant::now(),
        }
    }

    /// Register a handler under its job type; a later registration replaces
    /// an earlier one.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.job_type(), handler);
    }

    pub fn with_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn handles(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    pub fn stats(&self) -> ExecutorStats {
        let mut stats = self.lock_stats().clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }

    /// Claim and run one ready job. `Ok(None)` means nothing was ready.
    pub fn execute_next(&self) -> Result<Option<ExecutionOutcome>, JobStoreError> {
        let Some(claim) = self.store.claim_next(self.clock.now())? else {
            return Ok(None);
        };
        self.publisher.publish(&claim.job, &claim.events);

        let job = claim.job;
        debug!(
            job_id = %job.id_typed(),
            job_type = job.job_type(),
            retry_count = job.retry_count(),
            "claimed job"
        );

        self.lock_stats().current_running += 1;
        let result = self.run_handler(&job);
        let outcome = self.record(&job, result);

        let mut stats = self.lock_stats();
        stats.current_running = stats.current_running.saturating_sub(1);
        stats.jobs_processed += 1;
        match &outcome {
            Ok(ExecutionOutcome::Completed(_)) => stats.jobs_succeeded += 1,
            Ok(ExecutionOutcome::Retrying { .. }) => stats.jobs_retried += 1,
            Ok(ExecutionOutcome::Failed(_)) | Err(_) => stats.jobs_failed += 1,
            Ok(ExecutionOutcome::CancelledDuringExecution(_)) => stats.jobs_discarded += 1,
        }

        outcome.map(Some)
    }

    /// Spawn `config.workers` threads polling this executor until shutdown.
    pub fn spawn(self: Arc<Self>, config: JobExecutorConfig) -> io::Result<JobExecutorHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handle = JobExecutorHandle {
            shutdown: shutdown.clone(),
            workers: Vec::with_capacity(config.workers),
            executor: self.clone(),
        };

        for index in 0..config.workers.max(1) {
            let executor = self.clone();
            let shutdown = shutdown.clone();
            let config = config.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{index}", config.name))
                .spawn(move || worker_loop(&executor, &config, &shutdown));

            match spawned {
                Ok(join) => handle.workers.push(join),
                Err(e) => {
                    handle.stop();
                    return Err(e);
                }
            }
        }

        info!(executor = %config.name, workers = handle.workers.len(), "job executor started");
        Ok(handle)
    }

    fn run_handler(&self, job: &Job) -> anyhow::Result<serde_json::Value> {
        let handler = self
            .handlers
            .get(job.job_type())
            .ok_or_else(|| anyhow!("no handler registered for job type {}", job.job_type()))?;

        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(job))) {
            Ok(result) => result,
            Err(_) => Err(anyhow!("handler for {} panicked", job.job_type())),
        }
    }

    fn record(
        &self,
        job: &Job,
        result: anyhow::Result<serde_json::Value>,
    ) -> Result<ExecutionOutcome, JobStoreError> {
        let job_id = job.id_typed();
        let (command, failure) = match result {
            Ok(value) => (JobCommand::MarkCompleted { result: value }, None),
            Err(e) => {
                let error = format!("{e:#}");
                (JobCommand::MarkFailed { error: error.clone() }, Some(error))
            }
        };

        let transition = match self.store.transition_attempt(
            job_id,
            job.retry_count(),
            &command,
            self.clock.now(),
        ) {
            Ok(transition) => transition,
            Err(JobStoreError::StaleAttempt { current, .. }) => {
                warn!(
                    job_id = %job_id,
                    job_type = job.job_type(),
                    action = command.name(),
                    claimed_attempt = job.retry_count(),
                    current_attempt = current,
                    "job was reopened while running; outcome discarded"
                );
                return Ok(ExecutionOutcome::CancelledDuringExecution(job_id));
            }
            Err(JobStoreError::Transition(JobError::InvalidStateTransition {
                from: JobStatus::Cancelled,
                ..
            })) => {
                warn!(
                    job_id = %job_id,
                    job_type = job.job_type(),
                    action = command.name(),
                    "job was cancelled while running; outcome discarded"
                );
                return Ok(ExecutionOutcome::CancelledDuringExecution(job_id));
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "failed to record job outcome");
                return Err(e);
            }
        };
        self.publisher.publish(&transition.job, &transition.events);

        let updated = transition.job;
        Ok(match updated.status() {
            JobStatus::Completed => {
                debug!(job_id = %job_id, job_type = updated.job_type(), "job completed");
                ExecutionOutcome::Completed(job_id)
            }
            JobStatus::Retrying => {
                warn!(
                    job_id = %job_id,
                    job_type = updated.job_type(),
                    retry_count = updated.retry_count(),
                    max_retries = updated.max_retries(),
                    error = failure.as_deref().unwrap_or("-"),
                    "job failed, retry scheduled"
                );
                ExecutionOutcome::Retrying {
                    job_id,
                    retry_count: updated.retry_count(),
                    next_attempt_at: updated.scheduled_at(),
                }
            }
            _ => match updated.failure_report() {
                Some(report) => {
                    error!(job_id = %job_id, job_type = updated.job_type(), error = %report, "job failed");
                    ExecutionOutcome::Failed(report)
                }
                None => {
                    return Err(JobStoreError::Storage(format!(
                        "job {job_id} recorded in unexpected status {}",
                        updated.status()
                    )));
                }
            },
        })
    }

    fn lock_stats(&self) -> MutexGuard<'_, ExecutorStats> {
        match self.stats.lock() {
            Ok(stats) => stats,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut job_types: Vec<_> = self.handlers.keys().collect();
        job_types.sort();
        f.debug_struct("JobExecutor")
            .field("job_types", &job_types)
            .finish_non_exhaustive()
    }
}

/// Handle to control a running worker pool.
#[derive(Debug)]
pub struct JobExecutorHandle {
    shutdown: Arc<AtomicBool>,
    workers: Vec<thread::JoinHandle<()>>,
    executor: Arc<JobExecutor>,
}

impl JobExecutorHandle {
    /// Request graceful shutdown and wait for in-flight jobs to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    /// Get current executor statistics.
    pub fn stats(&self) -> ExecutorStats {
        self.executor.stats()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("job worker thread panicked");
            }
        }
    }
}

fn worker_loop(executor: &JobExecutor, config: &JobExecutorConfig, shutdown: &AtomicBool) {
    let worker = thread::current().name().unwrap_or("job-worker").to_string();
    debug!(executor = %config.name, worker = %worker, "job worker started");

    while !shutdown.load(Ordering::SeqCst) {
        match executor.execute_next() {
            Ok(Some(_)) => {}
            Ok(None) => thread::sleep(config.poll_interval),
            Err(e) => {
                error!(executor = %config.name, worker = %worker, error = %e, "job execution failed");
                thread::sleep(config.poll_interval);
            }
        }
    }

    debug!(executor = %config.name, worker = %worker, "job worker stopped");
}
