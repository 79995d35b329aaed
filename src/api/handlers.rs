//! Shared handler state and the non-proxy endpoints.

use crate::core::config::RoutingSettings;
use crate::core::error::{AppError, Result};
use crate::core::logging::generate_request_id;
use crate::core::metrics::encode_metrics;
use crate::core::usage::UsageSink;
use crate::services::fallback::FallbackOrchestrator;
use crate::services::resolver::RouteResolver;
use crate::services::route_store::RouteStore;
use crate::transformer::AdapterRegistry;
use crate::with_request_context;
use arc_swap::ArcSwap;
use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

/// Application state shared across all handlers.
pub struct AppState {
    /// Fallback toggle, redirect and local key; one snapshot per request
    pub settings: Arc<ArcSwap<RoutingSettings>>,
    pub routes: Arc<dyn RouteStore>,
    pub resolver: RouteResolver,
    pub orchestrator: FallbackOrchestrator,
}

impl AppState {
    pub fn new(
        settings: RoutingSettings,
        routes: Arc<dyn RouteStore>,
        http_client: reqwest::Client,
        usage: Arc<dyn UsageSink>,
    ) -> Self {
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            resolver: RouteResolver::new(routes.clone()),
            orchestrator: FallbackOrchestrator::new(
                http_client,
                Arc::new(AdapterRegistry::new()),
                usage,
            ),
            routes,
        }
    }

    /// Replace the routing settings; in-flight requests keep their snapshot.
    pub fn update_settings(&self, settings: RoutingSettings) {
        self.settings.store(Arc::new(settings));
    }
}

/// Check the client's key against the configured local key.
///
/// Accepted sources: `Authorization: Bearer`, `x-api-key`, `x-goog-api-key`
/// and the `key` query parameter.
pub fn verify_local_key(
    settings: &RoutingSettings,
    headers: &HeaderMap,
    query_key: Option<&str>,
) -> Result<()> {
    let Some(expected) = settings.local_api_key.as_deref() else {
        return Ok(());
    };

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let presented = [
        bearer,
        header_str(headers, "x-api-key"),
        header_str(headers, "x-goog-api-key"),
        query_key,
    ];

    if presented.iter().flatten().any(|key| *key == expected) {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

/// Remove the local key from the headers that may travel upstream.
///
/// Keyless routes forward the client's `Authorization` header, which must
/// not carry the gateway's own key.
pub fn strip_local_key(settings: &RoutingSettings, headers: &mut HeaderMap) {
    let Some(expected) = settings.local_api_key.as_deref() else {
        return;
    };
    let is_local = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|key| key == expected);
    if is_local {
        headers.remove(header::AUTHORIZATION);
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: &'static str,
    pub owned_by: String,
}

#[derive(Debug, Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<ModelInfo>,
}

/// List the distinct models of enabled routes.
pub async fn list_models(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ModelList>> {
    let request_id = generate_request_id();

    with_request_context!(request_id, async move {
        verify_local_key(&state.settings.load(), &headers, None)?;

        let data = state
            .resolver
            .known_models()
            .into_iter()
            .map(|id| ModelInfo {
                id,
                object: "model",
                owned_by: "llm-gateway".to_string(),
            })
            .collect::<Vec<_>>();

        tracing::debug!(count = data.len(), "Listing available models");
        Ok(Json(ModelList {
            object: "list",
            data,
        }))
    })
}

/// Liveness probe with the number of enabled routes.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let enabled = state.routes.routes().iter().filter(|r| r.enabled).count();
    Json(serde_json::json!({
        "status": "ok",
        "routes": enabled
    }))
}

/// Prometheus text exposition.
pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
