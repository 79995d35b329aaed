//! HTTP middleware for request tracking and metrics.
//!
//! Handlers attach [`ModelName`] and [`RouteName`] to their responses; the
//! middleware reads them back to label the request metrics.

use crate::core::metrics::get_metrics;
use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

/// Extension type for storing model name in response
#[derive(Clone, Debug)]
pub struct ModelName(pub String);

/// Extension type for storing the serving route name in response
#[derive(Clone, Debug)]
pub struct RouteName(pub String);

/// Middleware for tracking request metrics.
pub struct MetricsMiddleware;

impl MetricsMiddleware {
    /// Track metrics for incoming requests.
    ///
    /// Streaming responses are counted when their headers are returned; the
    /// usage record written at stream end carries the final outcome.
    pub async fn track_metrics(request: Request, next: Next) -> Response {
        let endpoint = request.uri().path().to_string();

        if endpoint == "/metrics" || endpoint == "/health" {
            return next.run(request).await;
        }

        let metrics = get_metrics();
        metrics
            .active_requests
            .with_label_values(&[&endpoint])
            .inc();

        let start = Instant::now();
        let response = next.run(request).await;
        let duration = start.elapsed().as_secs_f64();
        let status_code = response.status().as_u16().to_string();

        let model = response
            .extensions()
            .get::<ModelName>()
            .map(|m| m.0.as_str())
            .unwrap_or("unknown");
        let route = response
            .extensions()
            .get::<RouteName>()
            .map(|r| r.0.as_str())
            .unwrap_or("unknown");

        metrics
            .request_count
            .with_label_values(&[&endpoint, model, route, &status_code])
            .inc();
        metrics
            .request_duration
            .with_label_values(&[&endpoint, model, route])
            .observe(duration);
        metrics
            .active_requests
            .with_label_values(&[&endpoint])
            .dec();

        tracing::info!(
            endpoint = %endpoint,
            model = %model,
            route = %route,
            status = %status_code,
            duration_ms = (duration * 1000.0) as u64,
            "request completed"
        );

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    async fn labelled() -> Response {
        let mut response = Response::new(Body::from("ok"));
        response
            .extensions_mut()
            .insert(ModelName("mw-model".to_string()));
        response
            .extensions_mut()
            .insert(RouteName("mw-route".to_string()));
        response
    }

    #[tokio::test]
    async fn test_track_metrics_uses_response_labels() {
        let app = Router::new()
            .route("/mw-test", get(labelled))
            .layer(middleware::from_fn(MetricsMiddleware::track_metrics));

        let before = get_metrics()
            .request_count
            .with_label_values(&["/mw-test", "mw-model", "mw-route", "200"])
            .get();

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/mw-test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let after = get_metrics()
            .request_count
            .with_label_values(&["/mw-test", "mw-model", "mw-route", "200"])
            .get();
        assert_eq!(after, before + 1);
        assert_eq!(
            get_metrics()
                .active_requests
                .with_label_values(&["/mw-test"])
                .get(),
            0.0
        );
    }
}
