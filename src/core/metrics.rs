//! Prometheus metrics for monitoring the gateway.
//!
//! A single registry tracks client requests, upstream attempts, fallbacks
//! and token usage.

use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, Encoder, GaugeVec,
    HistogramVec, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Container for all application metrics.
pub struct Metrics {
    /// Total number of requests by endpoint, model, route, and status
    pub request_count: IntCounterVec,

    /// Request duration histogram in seconds
    pub request_duration: HistogramVec,

    /// Number of currently active requests by endpoint
    pub active_requests: GaugeVec,

    /// Upstream attempts by route and outcome (success, retry, failure)
    pub upstream_attempts: IntCounterVec,

    /// Times a request moved on to a later candidate
    pub fallbacks: IntCounterVec,

    /// Total token usage by model, route, and token type
    pub token_usage: IntCounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Initialize the metrics registry.
///
/// This should be called once at application startup. Subsequent calls will
/// return the same instance.
pub fn init_metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let request_count = register_int_counter_vec!(
            "llm_gateway_requests_total",
            "Total number of requests",
            &["endpoint", "model", "route", "status_code"]
        )
        .expect("Failed to register request_count metric");

        let request_duration = register_histogram_vec!(
            "llm_gateway_request_duration_seconds",
            "Request duration in seconds",
            &["endpoint", "model", "route"],
            vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
        )
        .expect("Failed to register request_duration metric");

        let active_requests = register_gauge_vec!(
            "llm_gateway_active_requests",
            "Number of active requests",
            &["endpoint"]
        )
        .expect("Failed to register active_requests metric");

        let upstream_attempts = register_int_counter_vec!(
            "llm_gateway_upstream_attempts_total",
            "Upstream attempts by route and outcome",
            &["route", "outcome"]
        )
        .expect("Failed to register upstream_attempts metric");

        let fallbacks = register_int_counter_vec!(
            "llm_gateway_fallbacks_total",
            "Number of times a request advanced to the next candidate route",
            &["model"]
        )
        .expect("Failed to register fallbacks metric");

        let token_usage = register_int_counter_vec!(
            "llm_gateway_tokens_total",
            "Total number of tokens used",
            &["model", "route", "token_type"]
        )
        .expect("Failed to register token_usage metric");

        Metrics {
            request_count,
            request_duration,
            active_requests,
            upstream_attempts,
            fallbacks,
            token_usage,
        }
    })
}

/// Get the global metrics instance, initializing it on first use.
pub fn get_metrics() -> &'static Metrics {
    init_metrics()
}

/// Encode every registered metric in the Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let metrics = init_metrics();
        let metrics2 = get_metrics();
        assert!(std::ptr::eq(metrics, metrics2));
    }

    #[test]
    fn test_request_count_metric() {
        let metrics = init_metrics();
        let labels = ["/v1/chat/completions", "gpt-4-unique", "route-unique", "201"];

        let initial = metrics.request_count.with_label_values(&labels).get();
        metrics.request_count.with_label_values(&labels).inc();
        let after = metrics.request_count.with_label_values(&labels).get();

        assert_eq!(after, initial + 1);
    }

    #[test]
    fn test_upstream_attempt_outcomes() {
        let metrics = init_metrics();
        metrics
            .upstream_attempts
            .with_label_values(&["metrics-test-route", "retry"])
            .inc();
        metrics
            .upstream_attempts
            .with_label_values(&["metrics-test-route", "success"])
            .inc();
        assert!(
            metrics
                .upstream_attempts
                .with_label_values(&["metrics-test-route", "retry"])
                .get()
                >= 1
        );
    }

    #[test]
    fn test_encode_contains_registered_metric() {
        let metrics = init_metrics();
        metrics
            .token_usage
            .with_label_values(&["encode-model", "encode-route", "prompt"])
            .inc_by(5);
        let text = encode_metrics();
        assert!(text.contains("llm_gateway_tokens_total"));
        assert!(text.contains("encode-model"));
    }
}
