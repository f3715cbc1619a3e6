//! API Router and Application State
//!
//! Central routing configuration and shared state.

pub mod connections;
pub mod error;
pub mod middleware;

use axum::{
    extract::State,
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::{Config, ConfigStatus};
use crate::registry::ConnectionRegistry;

pub use error::ApiError;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Live connections
    pub registry: ConnectionRegistry,
    /// Server configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(registry: ConnectionRegistry, config: Config) -> Self {
        Self {
            registry,
            config: Arc::new(config),
        }
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .nest("/connections", connections::router())
        .route(
            "/admin/connections/logout-all",
            post(connections::logout_all),
        )
        .route("/status", get(status))
        .layer(from_fn_with_state(state.clone(), middleware::require_api_key));

    Router::new()
        // Health check
        .route("/health", get(health_check))
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    /// Service status
    status: &'static str,
    /// Live connections
    connections: usize,
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: state.registry.len(),
    })
}

/// Sanitized configuration and package info.
async fn status(State(state): State<AppState>) -> Json<ConfigStatus> {
    Json(state.config.status())
}
