//! Publishing of job transition events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use scoreline_events::{EventEnvelope, EventSink, NullEventSink};
use scoreline_jobs::{Job, JobEvent};

pub const JOB_STREAM: &str = "job";

/// Wraps job events in envelopes and hands them to a sink.
///
/// Publishing is a side effect of a persisted transition, never a
/// precondition: sinks cannot fail the caller.
#[derive(Clone)]
pub struct JobEventPublisher {
    sink: Arc<dyn EventSink<JobEvent>>,
    sequence: Arc<AtomicU64>,
}

impl JobEventPublisher {
    pub fn new(sink: Arc<dyn EventSink<JobEvent>>) -> Self {
        Self {
            sink,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NullEventSink))
    }

    pub fn publish(&self, job: &Job, events: &[JobEvent]) {
        for event in events {
            if let JobEvent::StatusChanged(change) = event {
                debug!(
                    job_id = %change.job_id,
                    job_type = job.job_type(),
                    from = %change.from,
                    to = %change.to,
                    retry_count = change.retry_count,
                    correlation_id = job.correlation_id().unwrap_or("-"),
                    "job status changed"
                );
            }

            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
            self.sink.publish(EventEnvelope::new(
                job.id_typed().0,
                JOB_STREAM,
                sequence,
                job.correlation_id().map(str::to_string),
                event.clone(),
            ));
        }
    }
}

impl std::fmt::Debug for JobEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEventPublisher")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
