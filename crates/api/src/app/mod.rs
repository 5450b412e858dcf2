//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: collaborators, job runner and realtime channel
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use forgecrm_infra::BulkEmailConfig;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, Collaborators, ServiceStatus};

/// Build the full HTTP router around already-built services.
pub fn build_app(services: Arc<AppServices>) -> Router {
    // Session-scoped routes: require the forwarded user identity.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn(middleware::session_middleware));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}

/// Build services from configuration, then the router (used by `main.rs`).
pub async fn build_app_from_config(config: &BulkEmailConfig) -> anyhow::Result<Router> {
    let collaborators = Collaborators::from_config(config)?;
    let services = AppServices::build(config, collaborators).await?;
    Ok(build_app(Arc::new(services)))
}
