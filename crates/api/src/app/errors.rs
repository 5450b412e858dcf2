use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use forgecrm_infra::jobs::{JobStoreError, SubmitError};
use forgecrm_infra::messaging::{GenerationError, GenerationFailure};
use forgecrm_infra::recipients::ResolutionError;

pub fn submit_error_to_response(err: SubmitError) -> axum::response::Response {
    match err {
        SubmitError::SelectionMode(e) => json_error(StatusCode::BAD_REQUEST, "selection_mode", e.to_string()),
        SubmitError::Resolution(ResolutionError::UnconfirmedUnfiltered) => json_error(
            StatusCode::BAD_REQUEST,
            "unconfirmed_filter",
            ResolutionError::UnconfirmedUnfiltered.to_string(),
        ),
        SubmitError::Resolution(e) => json_error(StatusCode::BAD_REQUEST, "resolution_error", e.to_string()),
        SubmitError::EmptySelection => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "empty_selection",
            SubmitError::EmptySelection.to_string(),
        ),
        SubmitError::Infrastructure(msg) => {
            tracing::error!(error = %msg, "bulk email submission failed");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "infrastructure", msg)
        }
    }
}

pub fn store_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::NotFound(id) => json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found")),
        other => {
            tracing::error!(error = %other, "job status store failure");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "infrastructure", other.to_string())
        }
    }
}

pub fn generation_error_to_response(err: GenerationError) -> axum::response::Response {
    let message = err.to_string();
    match err.failure {
        GenerationFailure::UnknownRecipient => json_error(StatusCode::NOT_FOUND, "not_found", message),
        GenerationFailure::AiUnavailable => json_error(StatusCode::SERVICE_UNAVAILABLE, "ai_unavailable", message),
        GenerationFailure::Records(_) => {
            tracing::error!(error = %message, "lead lookup failed during preview");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "infrastructure", message)
        }
        _ => json_error(StatusCode::UNPROCESSABLE_ENTITY, "generation_error", message),
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
