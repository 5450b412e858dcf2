//! Bulk email jobs: the job model, status storage, terminal notifications and
//! the runner that drives a job from `queued` to a terminal state.
//!
//! ## Components
//!
//! - `Job`: recipient list, ordered outcomes and lifecycle state
//! - `JobStatusStore`: latest snapshot per job plus the per-job run lease
//!   (in-memory, or Redis with the `redis` feature)
//! - `StatusNotifier`: best-effort push of terminal events
//! - `BulkEmailRunner`: submission and background execution

pub mod notifier;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod runner;
pub mod store;
pub mod types;

pub use notifier::{BusStatusNotifier, InMemoryStatusNotifier, NotifyError, StatusNotifier};
#[cfg(feature = "redis")]
pub use redis_store::RedisJobStatusStore;
pub use runner::{BulkEmailRunner, DEFAULT_LEASE_TTL, ResumeError, SubmitError};
pub use store::{InMemoryJobStatusStore, JobStatusStore, JobStoreError};
pub use types::{
    BackoffStrategy, GenerationMode, Initiator, Job, JobRequest, RecipientOutcome, RecipientSelection,
    RetryPolicy, SelectionError,
};
