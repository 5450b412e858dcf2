use axum::{Router, routing::get};

pub mod bulk_email;
pub mod system;

/// Router for all session-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/stream", get(system::stream))
        .nest("/bulk-email", bulk_email::router())
}
