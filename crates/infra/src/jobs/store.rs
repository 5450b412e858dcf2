//! Job Status Store: durable, externally readable job snapshots.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use forgecrm_core::{JobId, UserId};

use super::types::Job;

/// Snapshot store keyed by job id.
///
/// - `put` replaces the whole snapshot atomically; readers never observe a
///   partially written outcome list.
/// - A terminal snapshot is final: later `put`s for that id fail with
///   [`JobStoreError::TerminalOverwrite`].
#[async_trait]
pub trait JobStatusStore: Send + Sync {
    async fn put(&self, job: &Job) -> Result<(), JobStoreError>;

    async fn get(&self, job_id: JobId) -> Result<Job, JobStoreError>;

    /// Most recent jobs first.
    async fn list_for_user(&self, user_id: UserId, limit: usize) -> Result<Vec<Job>, JobStoreError>;

    /// Take or renew the exclusive run lease on a job.
    ///
    /// Returns `false` while another owner holds an unexpired lease. The
    /// current holder calling again extends its lease by `ttl`.
    async fn try_claim(&self, job_id: JobId, owner: &str, ttl: Duration) -> Result<bool, JobStoreError>;

    /// Drop the lease if `owner` still holds it.
    async fn release(&self, job_id: JobId, owner: &str) -> Result<(), JobStoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {0} is terminal and cannot be overwritten")]
    TerminalOverwrite(JobId),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[async_trait]
impl<S> JobStatusStore for Arc<S>
where
    S: JobStatusStore + ?Sized,
{
    async fn put(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).put(job).await
    }

    async fn get(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        (**self).get(job_id).await
    }

    async fn list_for_user(&self, user_id: UserId, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        (**self).list_for_user(user_id, limit).await
    }

    async fn try_claim(&self, job_id: JobId, owner: &str, ttl: Duration) -> Result<bool, JobStoreError> {
        (**self).try_claim(job_id, owner, ttl).await
    }

    async fn release(&self, job_id: JobId, owner: &str) -> Result<(), JobStoreError> {
        (**self).release(job_id, owner).await
    }
}

#[derive(Debug, Clone)]
struct Lease {
    owner: String,
    expires_at: Instant,
}

/// In-memory store for tests/dev (single process only).
#[derive(Debug, Default)]
pub struct InMemoryJobStatusStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    leases: Mutex<HashMap<JobId, Lease>>,
}

impl InMemoryJobStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.jobs.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStatusStore for InMemoryJobStatusStore {
    async fn put(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))?;
        if jobs.get(&job.id).is_some_and(Job::is_terminal) {
            return Err(JobStoreError::TerminalOverwrite(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))?;
        jobs.get(&job_id).cloned().ok_or(JobStoreError::NotFound(job_id))
    }

    async fn list_for_user(&self, user_id: UserId, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))?;
        let mut mine: Vec<Job> = jobs.values().filter(|j| j.user_id() == user_id).cloned().collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.as_uuid().cmp(a.id.as_uuid())));
        mine.truncate(limit);
        Ok(mine)
    }

    async fn try_claim(&self, job_id: JobId, owner: &str, ttl: Duration) -> Result<bool, JobStoreError> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))?;
        let now = Instant::now();
        if let Some(held) = leases.get(&job_id) {
            if held.owner != owner && held.expires_at > now {
                return Ok(false);
            }
        }
        leases.insert(
            job_id,
            Lease {
                owner: owner.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release(&self, job_id: JobId, owner: &str) -> Result<(), JobStoreError> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))?;
        if leases.get(&job_id).is_some_and(|held| held.owner == owner) {
            leases.remove(&job_id);
        }
        Ok(())
    }
}
