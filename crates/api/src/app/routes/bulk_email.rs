use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use tracing::info;

use forgecrm_core::{JobId, RecipientId};
use forgecrm_infra::jobs::{Job, JobStoreError, ResumeError, SubmitError};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::SessionContext;

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 100;

pub fn router() -> Router {
    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/resume", post(resume_job))
        .route("/preview", post(preview))
        .route("/status", get(service_status))
}

/// POST /bulk-email/jobs
///
/// Accepts the job and returns its id before any recipient is processed.
pub async fn submit_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
    body: Result<Json<dto::SubmitJobRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text());
        }
    };

    let request = match body.into_job_request(&session) {
        Ok(request) => request,
        Err(e) => return errors::submit_error_to_response(SubmitError::SelectionMode(e)),
    };

    match services.runner().submit(request).await {
        Ok(job_id) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "job_id": job_id.to_string() })),
        )
            .into_response(),
        Err(e) => errors::submit_error_to_response(e),
    }
}

/// GET /bulk-email/jobs/:id
pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match owned_job(&services, &session, &id).await {
        Ok(job) => (StatusCode::OK, Json(dto::job_to_json(&job))).into_response(),
        Err(resp) => resp,
    }
}

/// GET /bulk-email/jobs?limit=N
pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
    Query(query): Query<dto::ListJobsQuery>,
) -> axum::response::Response {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    match services.runner().store().list_for_user(session.user_id(), limit).await {
        Ok(jobs) => {
            let jobs = jobs.iter().map(dto::job_summary_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "jobs": jobs }))).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

/// POST /bulk-email/jobs/:id/resume
///
/// Continue a job a stopped worker left non-terminal.
pub async fn resume_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job = match owned_job(&services, &session, &id).await {
        Ok(job) => job,
        Err(resp) => return resp,
    };

    match services.runner().resume(job.id).await {
        Ok(()) => {
            info!(job_id = %job.id, user_id = %session.user_id(), "bulk email job resumed");
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({ "job_id": job.id.to_string() })),
            )
                .into_response()
        }
        Err(ResumeError::Store(e)) => errors::store_error_to_response(e),
        Err(e @ (ResumeError::AlreadyActive(_) | ResumeError::Leased(_) | ResumeError::AlreadyTerminal(_))) => {
            errors::json_error(StatusCode::CONFLICT, "conflict", e.to_string())
        }
    }
}

/// POST /bulk-email/preview
///
/// Content for one lead, generated the way a job would produce it. Nothing
/// is recorded or sent.
pub async fn preview(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
    body: Result<Json<dto::PreviewRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text());
        }
    };
    let recipient_id = match RecipientId::new(body.recipient_id) {
        Ok(id) => id,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_request", e.to_string()),
    };

    let generator = services.runner().generator();
    match generator
        .preview(&recipient_id, &body.generation, body.template_ref.trim(), &session.initiator())
        .await
    {
        Ok(preview) => (StatusCode::OK, Json(preview)).into_response(),
        Err(e) => errors::generation_error_to_response(e),
    }
}

/// GET /bulk-email/status
pub async fn service_status(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let mut body = serde_json::to_value(services.status()).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(obj) = body.as_object_mut() {
        obj.insert("active_jobs".to_string(), services.runner().active_jobs().len().into());
    }
    (StatusCode::OK, Json(body)).into_response()
}

/// Jobs are only visible to the user who submitted them.
async fn owned_job(services: &AppServices, session: &SessionContext, raw_id: &str) -> Result<Job, axum::response::Response> {
    let job_id: JobId = raw_id
        .parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid job id '{raw_id}'")))?;

    let job = services
        .runner()
        .store()
        .get(job_id)
        .await
        .map_err(errors::store_error_to_response)?;

    if job.user_id() != session.user_id() {
        return Err(errors::store_error_to_response(JobStoreError::NotFound(job_id)));
    }
    Ok(job)
}
