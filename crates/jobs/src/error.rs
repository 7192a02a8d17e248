use thiserror::Error;

use crate::types::{JobId, JobStatus};

/// Job state machine errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The requested transition is not legal from the job's current status.
    /// Nothing is persisted when this is returned.
    #[error("invalid state transition for job {job_id}: cannot {action} from {from}")]
    InvalidStateTransition {
        job_id: JobId,
        from: JobStatus,
        action: &'static str,
    },

    /// Automatic retries are exhausted; the job sits in `Failed` until an
    /// operator reopens it.
    #[error("job {job_id} exceeded max retries ({retry_count}/{max_retries}): {last_error}")]
    MaxRetriesExceeded {
        job_id: JobId,
        retry_count: u32,
        max_retries: u32,
        last_error: String,
    },
}
