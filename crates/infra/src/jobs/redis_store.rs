//! Redis-backed Job Status Store (optional).
//!
//! Lets a worker process and a request-serving process share job snapshots.
//! Records expire after the configured TTL; a per-user sorted set indexes job
//! ids by creation time for listing.

use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use redis::aio::MultiplexedConnection;
use tracing::{debug, instrument};

use forgecrm_core::{JobId, UserId};

use super::store::{JobStatusStore, JobStoreError};
use super::types::Job;

const KEY_PREFIX: &str = "forgecrm:bulk_email";

/// Refuses to replace a terminal snapshot; writes record + index otherwise.
const GUARDED_PUT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current then
  local ok, decoded = pcall(cjson.decode, current)
  if ok and (decoded.status == 'finished' or decoded.status == 'failed' or decoded.status == 'completed-with-errors') then
    return 0
  end
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[4])
redis.call('EXPIRE', KEYS[2], ARGV[2])
return 1
"#;

/// Set the lease when free or already ours; `PX` bounds it either way.
const CLAIM_LEASE: &str = r#"
local holder = redis.call('GET', KEYS[1])
if holder == false or holder == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
  return 1
end
return 0
"#;

const RELEASE_LEASE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

pub fn job_key(job_id: JobId) -> String {
    format!("{KEY_PREFIX}:job:{job_id}")
}

pub fn user_index_key(user_id: UserId) -> String {
    format!("{KEY_PREFIX}:jobs:{user_id}")
}

pub fn lease_key(job_id: JobId) -> String {
    format!("{KEY_PREFIX}:lease:{job_id}")
}

#[derive(Clone)]
pub struct RedisJobStatusStore {
    conn: MultiplexedConnection,
    ttl: Duration,
    put_script: Script,
    claim_script: Script,
    release_script: Script,
}

impl RedisJobStatusStore {
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Self, JobStoreError> {
        let client = redis::Client::open(redis_url).map_err(storage)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(storage)?;
        Ok(Self {
            conn,
            ttl,
            put_script: Script::new(GUARDED_PUT),
            claim_script: Script::new(CLAIM_LEASE),
            release_script: Script::new(RELEASE_LEASE),
        })
    }
}

fn storage(e: redis::RedisError) -> JobStoreError {
    JobStoreError::Storage(e.to_string())
}

fn decode(raw: &str) -> Result<Job, JobStoreError> {
    serde_json::from_str(raw).map_err(|e| JobStoreError::Serialization(e.to_string()))
}

#[async_trait]
impl JobStatusStore for RedisJobStatusStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, status = %job.status))]
    async fn put(&self, job: &Job) -> Result<(), JobStoreError> {
        let payload =
            serde_json::to_string(job).map_err(|e| JobStoreError::Serialization(e.to_string()))?;
        let mut conn = self.conn.clone();

        let written: i64 = self
            .put_script
            .key(job_key(job.id))
            .key(user_index_key(job.user_id()))
            .arg(payload)
            .arg(self.ttl.as_secs().max(1))
            .arg(job.created_at.timestamp_millis())
            .arg(job.id.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(storage)?;

        if written == 0 {
            return Err(JobStoreError::TerminalOverwrite(job.id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(job_key(job_id))
            .query_async(&mut conn)
            .await
            .map_err(storage)?;
        match raw {
            Some(raw) => decode(&raw),
            None => Err(JobStoreError::NotFound(job_id)),
        }
    }

    #[instrument(skip(self))]
    async fn list_for_user(&self, user_id: UserId, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let ids: Vec<String> = redis::cmd("ZREVRANGE")
            .arg(user_index_key(user_id))
            .arg(0)
            .arg(limit as isize - 1)
            .query_async(&mut conn)
            .await
            .map_err(storage)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| format!("{KEY_PREFIX}:job:{id}")).collect();
        let raws: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(storage)?;

        let expired = raws.iter().filter(|r| r.is_none()).count();
        if expired > 0 {
            debug!(expired, "skipping expired job records in user index");
        }
        raws.into_iter().flatten().map(|raw| decode(&raw)).collect()
    }

    #[instrument(skip(self))]
    async fn try_claim(&self, job_id: JobId, owner: &str, ttl: Duration) -> Result<bool, JobStoreError> {
        let mut conn = self.conn.clone();
        let claimed: i64 = self
            .claim_script
            .key(lease_key(job_id))
            .arg(owner)
            .arg(ttl.as_millis().max(1) as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(storage)?;
        Ok(claimed == 1)
    }

    #[instrument(skip(self))]
    async fn release(&self, job_id: JobId, owner: &str) -> Result<(), JobStoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .release_script
            .key(lease_key(job_id))
            .arg(owner)
            .invoke_async(&mut conn)
            .await
            .map_err(storage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::{GenerationMode, Initiator, JobRequest, RecipientOutcome, RecipientSelection};
    use forgecrm_core::{JobState, RecipientId};

    #[test]
    fn keys_are_namespaced() {
        let job = JobId::new();
        let user = UserId::new();
        assert_eq!(job_key(job), format!("forgecrm:bulk_email:job:{job}"));
        assert_eq!(user_index_key(user), format!("forgecrm:bulk_email:jobs:{user}"));
        assert_eq!(lease_key(job), format!("forgecrm:bulk_email:lease:{job}"));
    }

    async fn live_store() -> RedisJobStatusStore {
        let url = std::env::var("FORGECRM_TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        RedisJobStatusStore::connect(&url, Duration::from_secs(60))
            .await
            .expect("redis reachable")
    }

    fn job() -> Job {
        let ids = vec![RecipientId::new("A").unwrap()];
        let request = JobRequest {
            selection: RecipientSelection::Explicit(ids.clone()),
            template_ref: "welcome".to_string(),
            test_mode: false,
            generation: GenerationMode::Template,
            initiator: Initiator::new(UserId::new()),
        };
        Job::queued(JobId::new(), &request, ids)
    }

    #[tokio::test]
    #[ignore = "needs a running redis (FORGECRM_TEST_REDIS_URL)"]
    async fn terminal_snapshots_are_final_in_redis() {
        let store = live_store().await;
        let mut job = job();
        store.put(&job).await.unwrap();
        job.mark_running().unwrap();
        store.put(&job).await.unwrap();

        job.record_outcome(RecipientOutcome::failed(RecipientId::new("A").unwrap(), "bounced"))
            .unwrap();
        job.settle().unwrap();
        store.put(&job).await.unwrap();
        assert_eq!(job.status, JobState::Failed);

        let mut tampered = job.clone();
        tampered.status = JobState::Running;
        assert_eq!(store.put(&tampered).await.unwrap_err(), JobStoreError::TerminalOverwrite(job.id));
        assert_eq!(store.get(job.id).await.unwrap(), job);
        assert_eq!(store.list_for_user(job.user_id(), 5).await.unwrap(), vec![job]);
    }

    #[tokio::test]
    #[ignore = "needs a running redis (FORGECRM_TEST_REDIS_URL)"]
    async fn run_lease_is_exclusive_in_redis() {
        let store = live_store().await;
        let job_id = JobId::new();
        let ttl = Duration::from_secs(30);

        assert!(store.try_claim(job_id, "worker-a", ttl).await.unwrap());
        assert!(!store.try_claim(job_id, "worker-b", ttl).await.unwrap());
        assert!(store.try_claim(job_id, "worker-a", ttl).await.unwrap());

        store.release(job_id, "worker-b").await.unwrap();
        assert!(!store.try_claim(job_id, "worker-b", ttl).await.unwrap());

        store.release(job_id, "worker-a").await.unwrap();
        assert!(store.try_claim(job_id, "worker-b", Duration::from_millis(50)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(store.try_claim(job_id, "worker-a", ttl).await.unwrap());
        store.release(job_id, "worker-a").await.unwrap();
    }
}
