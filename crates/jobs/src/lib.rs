//! Retryable units of asynchronous work.
//!
//! ## Design
//!
//! - A [`Job`] is only ever changed through guarded transitions
//! - Transitions are pure: `decide` returns events, `apply` evolves state
//! - Completed / Failed / Cancelled are soft-terminal; Failed and Cancelled
//!   can be reopened by an operator
//! - Automatic retries back off according to the job's [`Backoff`]
//!
//! ## Components
//!
//! - `Job`, `NewJob`: the record and its creation request
//! - `JobCommand`, `JobEvent`: transition inputs and outputs
//! - `RetryPolicy`, `Backoff`: how many automatic attempts, and how far apart

pub mod error;
pub mod job;
pub mod retry;
pub mod types;

pub use error::JobError;
pub use job::{
    Job, JobCommand, JobCreated, JobEvent, JobFailed, JobRetrying, JobStatusChanged, NewJob,
    Transition,
};
pub use retry::{Backoff, BackoffStrategy, RetryPolicy, DEFAULT_MAX_RETRIES};
pub use types::{JobId, JobStatus};
