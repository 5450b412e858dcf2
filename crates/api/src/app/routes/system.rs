use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::sse::Event as SseEvent};

use crate::app::services::{self, AppServices};
use crate::context::SessionContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /stream
///
/// Terminal job events for the session's user, as `bulk_email.job_finished`
/// SSE events. Best effort: a client that misses one still sees the state on
/// its next poll.
pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
) -> axum::response::Sse<impl tokio_stream::Stream<Item = Result<SseEvent, std::convert::Infallible>>> {
    services::user_sse_stream(services, session.user_id())
}
