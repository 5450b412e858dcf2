//! Terminal lifecycle event for bulk jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgecrm_core::{JobId, JobState, UserId};

/// Topic name used on realtime channels (SSE event name, pub/sub routing).
pub const JOB_FINISHED_TOPIC: &str = "bulk_email.job_finished";

/// Pushed once when a job reaches a terminal state.
///
/// Scoped to the initiating user: transports deliver it only to that user's
/// live sessions. It carries counts, not outcomes; clients fetch the
/// authoritative snapshot from the status store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTerminalEvent {
    pub job_id: JobId,
    pub user_id: UserId,
    pub status: JobState,
    pub successful_count: usize,
    pub failed_count: usize,
    pub occurred_at: DateTime<Utc>,
}

impl JobTerminalEvent {
    pub fn new(
        job_id: JobId,
        user_id: UserId,
        status: JobState,
        successful_count: usize,
        failed_count: usize,
    ) -> Self {
        Self {
            job_id,
            user_id,
            status,
            successful_count,
            failed_count,
            occurred_at: Utc::now(),
        }
    }

    /// True when the event is addressed to `user_id`.
    pub fn is_for(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }
}
