//! Job runtime: storage, dispatch, execution and the operator surface.
//!
//! The state machine itself lives in `scoreline-jobs`; this module persists
//! its transitions and drives them.
//!
//! - `JobStore`: persistence with atomic transitions and claiming
//! - `Dispatcher`: creates jobs and hands existing ones back to the workers
//! - `JobExecutor`: worker pool running registered `JobHandler`s
//! - `JobOperations`: list / cancel / retry for operators

pub mod dispatcher;
pub mod events;
pub mod executor;
pub mod operations;
pub mod store;

pub use dispatcher::{DispatchError, Dispatcher, JobHandle, StoreDispatcher};
pub use events::JobEventPublisher;
pub use executor::{
    ExecutionOutcome, ExecutorStats, JobExecutor, JobExecutorConfig, JobExecutorHandle, JobHandler,
};
pub use operations::{JobOperations, OperationsError};
pub use store::{InMemoryJobStore, JobFilter, JobStats, JobStore, JobStoreError};
