//! API layer for the gateway.
//!
//! This module contains the HTTP handlers, upstream request construction and
//! the streaming driver, plus [`create_router`] which wires them together.

pub mod handlers;
pub mod proxy;
pub mod streaming;
pub mod upstream;

// Re-export commonly used types
pub use handlers::{health, list_models, metrics_handler, AppState};
pub use proxy::{chat_completions, gemini_generate, messages};

use crate::core::middleware::MetricsMiddleware;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the router with every endpoint and the shared layers.
pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/messages", post(messages))
        .route("/api/anthropic/v1/messages", post(messages))
        .route("/api/claudecode/v1/messages", post(messages))
        .route("/v1beta/models/:model_action", post(gemini_generate))
        .route("/v1/models", get(list_models))
        .layer(axum::middleware::from_fn(MetricsMiddleware::track_metrics))
        .with_state(state.clone());

    let ops_routes = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    Router::new()
        .merge(api_routes)
        .merge(ops_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
