use serde::Deserialize;

use forgecrm_infra::jobs::{GenerationMode, Job, JobRequest, RecipientSelection, SelectionError};

use crate::context::SessionContext;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(default)]
    pub recipient_ids: Option<Vec<String>>,
    #[serde(default)]
    pub filter: Option<serde_json::Value>,
    pub template_ref: String,
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default)]
    pub confirm_unfiltered: bool,
    #[serde(default)]
    pub generation: GenerationMode,
}

impl SubmitJobRequest {
    pub fn into_job_request(self, session: &SessionContext) -> Result<JobRequest, SelectionError> {
        let selection = RecipientSelection::from_parts(self.recipient_ids, self.filter, self.confirm_unfiltered)?;
        Ok(JobRequest {
            selection,
            template_ref: self.template_ref.trim().to_string(),
            test_mode: self.test_mode,
            generation: self.generation,
            initiator: session.initiator(),
        })
    }
}

/// Single-lead content preview; nothing is sent.
#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub recipient_id: String,
    #[serde(default)]
    pub template_ref: String,
    #[serde(default)]
    pub generation: GenerationMode,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

// -------------------------
// Response mapping
// -------------------------

pub fn job_to_json(job: &Job) -> serde_json::Value {
    serde_json::json!({
        "job_id": job.id.to_string(),
        "status": job.status,
        "total": job.total,
        "progress": job.progress,
        "test_mode": job.test_mode,
        "template_ref": job.template_ref,
        "mode": job.generation.label(),
        "successful_count": job.sent_count(),
        "failed_count": job.failed_count(),
        "failure": job.failure,
        "created_at": job.created_at.to_rfc3339(),
        "updated_at": job.updated_at.to_rfc3339(),
        "completed_at": job.completed_at.map(|t| t.to_rfc3339()),
        "outcomes": job.outcomes,
    })
}

pub fn job_summary_to_json(job: &Job) -> serde_json::Value {
    serde_json::json!({
        "job_id": job.id.to_string(),
        "status": job.status,
        "total": job.total,
        "progress": job.progress,
        "test_mode": job.test_mode,
        "template_ref": job.template_ref,
        "successful_count": job.sent_count(),
        "failed_count": job.failed_count(),
        "created_at": job.created_at.to_rfc3339(),
    })
}
