use std::fmt::Write as _;

use forgecrm_core::{JobId, JobState, OutcomeStatus};

use crate::api::{JobStatus, OutcomeView};

/// Final view of a job, built from its first terminal snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub job_id: JobId,
    pub status: JobState,
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub test_mode: bool,
    pub failure: Option<String>,
    pub outcomes: Vec<OutcomeView>,
}

impl From<JobStatus> for JobSummary {
    fn from(status: JobStatus) -> Self {
        let sent = status
            .outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Sent)
            .count();
        let failed = status.outcomes.len() - sent;
        Self {
            job_id: status.job_id,
            status: status.status,
            total: status.total,
            sent,
            failed,
            test_mode: status.test_mode,
            failure: status.failure,
            outcomes: status.outcomes,
        }
    }
}

impl JobSummary {
    pub fn failed_outcomes(&self) -> impl Iterator<Item = &OutcomeView> {
        self.outcomes.iter().filter(|o| o.status == OutcomeStatus::Failed)
    }

    /// Human-readable summary: counts first, then one line per failure.
    pub fn render(&self) -> String {
        let mut out = format!(
            "Bulk email job {} {}: {} sent, {} failed of {}",
            self.job_id, self.status, self.sent, self.failed, self.total
        );
        if self.test_mode {
            out.push_str(" (test mode)");
        }
        if let Some(failure) = &self.failure {
            let _ = write!(out, "\n  job aborted: {failure}");
        }
        for outcome in self.failed_outcomes() {
            let _ = write!(
                out,
                "\n  - {}: {}",
                outcome.recipient_id,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
        out
    }
}
