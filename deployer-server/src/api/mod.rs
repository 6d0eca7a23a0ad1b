//! API Module
//!
//! HTTP API layer for the deployer.
//! Each submodule handles endpoints for a specific domain.

pub mod deployment;
pub mod error;
pub mod health;

use axum::{
    Router,
    http::Method,
    routing::{get, post},
};
use deployer_engine::Coordinator;
use deployer_engine::service::LogMultiplexer;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Coordinator,
    pub logs: Arc<LogMultiplexer>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    // Dashboards on other origins may read, never write
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET]);

    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Deployment endpoints
        .route(
            "/deployments",
            get(deployment::list_deployments).post(deployment::create_deployment),
        )
        .route("/deployment/{id}", get(deployment::get_deployment))
        .route("/deployment/{id}/logs", get(deployment::get_deployment_logs))
        .route("/deployment/{id}/stream", get(deployment::stream_deployment))
        .route("/deployment/{id}/cancel", post(deployment::cancel_deployment))
        // Add state and middleware
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
