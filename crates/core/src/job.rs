//! Job lifecycle vocabulary shared by the runner, the store and the client.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a bulk job.
///
/// `queued → running → {finished | failed | completed-with-errors}`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    /// Accepted, recipient list resolved, nothing processed yet
    Queued,
    /// The first recipient has started processing
    Running,
    /// Every recipient was sent
    Finished,
    /// Aborted before completion, or every recipient failed
    Failed,
    /// Every recipient attempted, some failed
    CompletedWithErrors,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Finished | JobState::Failed | JobState::CompletedWithErrors
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Finished => "finished",
            JobState::Failed => "failed",
            JobState::CompletedWithErrors => "completed-with-errors",
        }
    }

    /// Terminal state for a job whose every recipient was attempted.
    pub fn settle(sent: usize, failed: usize) -> Self {
        match (sent, failed) {
            (_, 0) => JobState::Finished,
            (0, _) => JobState::Failed,
            _ => JobState::CompletedWithErrors,
        }
    }
}

impl core::fmt::Display for JobState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one attempted recipient.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Sent,
    Failed,
}
