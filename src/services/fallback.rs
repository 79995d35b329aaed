//! Fallback orchestration over an ordered list of candidate routes.
//!
//! Attempts are strictly sequential. A retryable failure is logged to the
//! usage sink and the next candidate is tried; anything else ends the loop.
//! For streaming requests the loop ends as soon as an upstream answers 2xx:
//! from then on the caller owns the response and no retry is possible.

use crate::api::upstream::{
    build_upstream_request, build_upstream_url, finalize_body, transport_error_message,
    UpstreamAuth,
};
use crate::core::error::{redact, AppError};
use crate::core::logging::ROUTE_CONTEXT;
use crate::core::metrics::get_metrics;
use crate::core::usage::{UsageRecord, UsageSink};
use crate::services::route_store::Route;
use crate::transformer::{Adapter, AdapterRegistry, Protocol, TransformError};
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// Substrings of transport error messages that mark a failure as transient.
const RETRYABLE_TRANSPORT_MARKERS: &[&str] = &[
    "connection refused",
    "no such host",
    "dns error",
    "timeout",
    "timed out",
    "deadline exceeded",
    "eof",
    "connection reset",
];

/// Cap on the upstream error body echoed into usage records.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// HTTP statuses worth retrying on a different route.
///
/// Credential and model-availability failures are per-route, so 401, 403
/// and 404 are included. 400 means the request itself is bad.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || matches!(status.as_u16(), 401 | 403 | 404 | 429)
}

/// Whether a transport error message names a transient network condition.
pub fn is_retryable_transport(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_TRANSPORT_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Why one upstream attempt failed.
#[derive(Debug)]
pub enum AttemptFailure {
    /// No HTTP response, or the response body could not be read
    Transport { message: String, retryable: bool },
    /// Upstream answered with a non-2xx status
    Status { status: StatusCode, body: Bytes },
    /// The request could not be rewritten for this route
    Adapter(TransformError),
}

impl AttemptFailure {
    fn from_reqwest(error: reqwest::Error, secret: &str) -> Self {
        let retryable = error.is_timeout() || error.is_connect();
        let message = redact(&transport_error_message(error), secret);
        let retryable = retryable || is_retryable_transport(&message);
        AttemptFailure::Transport { message, retryable }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            AttemptFailure::Transport { retryable, .. } => *retryable,
            AttemptFailure::Status { status, .. } => is_retryable_status(*status),
            AttemptFailure::Adapter(_) => false,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            AttemptFailure::Status { status, .. } => Some(status.as_u16()),
            _ => None,
        }
    }

    /// One-line description for logs and usage records.
    pub fn describe(&self) -> String {
        match self {
            AttemptFailure::Transport { message, .. } => format!("transport error: {}", message),
            AttemptFailure::Status { status, body } => {
                let text: String = String::from_utf8_lossy(body)
                    .chars()
                    .take(MAX_ERROR_BODY_CHARS)
                    .collect();
                let note = match status.as_u16() {
                    401 | 403 => " (credential rejected by upstream)",
                    _ => "",
                };
                format!("upstream HTTP {}{}: {}", status.as_u16(), note, text)
            }
            AttemptFailure::Adapter(e) => format!("adapter failure: {}", e),
        }
    }
}

/// Everything an attempt needs to know about the client request.
#[derive(Debug, Clone)]
pub struct AttemptRequest {
    pub client_protocol: Protocol,
    /// Client body, already normalized (Cursor rewrite applied)
    pub body: Value,
    /// Model as the client asked for it
    pub requested_model: String,
    pub stream: bool,
    pub headers: HeaderMap,
    pub request_id: String,
}

impl AttemptRequest {
    /// Usage record skeleton for an attempt against `route` that began at
    /// `attempt_started`.
    pub fn usage_record(&self, route: &Route, attempt: usize, attempt_started: Instant) -> UsageRecord {
        UsageRecord {
            request_id: self.request_id.clone(),
            model: self.requested_model.clone(),
            upstream_model: route.model.clone(),
            route_name: route.name.clone(),
            route_id: Some(route.id),
            style: self.client_protocol,
            stream: self.stream,
            elapsed_ms: attempt_started.elapsed().as_millis() as u64,
            attempt,
            ..Default::default()
        }
    }
}

/// Successful upstream response.
#[derive(Debug)]
pub enum UpstreamReply {
    /// Non-streaming: the full body has been read
    Complete { status: StatusCode, body: Bytes },
    /// Streaming: headers are in, the body is still on the wire
    Streaming(reqwest::Response),
}

/// The route that answered and how to translate its output.
pub struct AttemptSuccess {
    pub route: Route,
    pub adapter: Arc<dyn Adapter>,
    /// 1-based position in the candidate list
    pub attempt: usize,
    /// When this attempt, not the whole request, began
    pub started: Instant,
    pub reply: UpstreamReply,
}

impl std::fmt::Debug for AttemptSuccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttemptSuccess")
            .field("route", &self.route.name)
            .field("client", &self.adapter.client())
            .field("upstream", &self.adapter.upstream())
            .field("attempt", &self.attempt)
            .field("reply", &self.reply)
            .finish()
    }
}

/// Terminal outcome when no candidate succeeded.
#[derive(Debug)]
pub enum FallbackError {
    /// Mapped to a protocol-shaped error response
    App(AppError),
    /// Last attempted route's HTTP error, returned to the client as-is
    Upstream {
        route_name: String,
        status: StatusCode,
        body: Bytes,
    },
}

impl From<AppError> for FallbackError {
    fn from(e: AppError) -> Self {
        FallbackError::App(e)
    }
}

/// Drives attempts across candidate routes.
#[derive(Clone)]
pub struct FallbackOrchestrator {
    http_client: reqwest::Client,
    adapters: Arc<AdapterRegistry>,
    usage: Arc<dyn UsageSink>,
}

impl FallbackOrchestrator {
    pub fn new(
        http_client: reqwest::Client,
        adapters: Arc<AdapterRegistry>,
        usage: Arc<dyn UsageSink>,
    ) -> Self {
        Self {
            http_client,
            adapters,
            usage,
        }
    }

    pub fn usage_sink(&self) -> &Arc<dyn UsageSink> {
        &self.usage
    }

    /// Try each candidate in order until one succeeds or a failure is final.
    ///
    /// Every failed attempt writes one usage record. The successful attempt
    /// is recorded by the caller once the response has been translated.
    pub async fn execute(
        &self,
        request: &AttemptRequest,
        candidates: &[Route],
    ) -> Result<AttemptSuccess, FallbackError> {
        let metrics = get_metrics();
        let mut last_failure: Option<(String, AttemptFailure)> = None;

        for (index, route) in candidates.iter().enumerate() {
            let attempt = index + 1;
            let is_last = attempt == candidates.len();

            let adapter = self
                .adapters
                .get(request.client_protocol, route.format)
                .ok_or_else(|| {
                    AppError::Internal(format!(
                        "no adapter for {} -> {}",
                        request.client_protocol, route.format
                    ))
                })?;

            let started = Instant::now();
            let outcome = ROUTE_CONTEXT
                .scope(
                    route.name.clone(),
                    self.attempt(request, route, adapter.as_ref(), attempt),
                )
                .await;

            let failure = match outcome {
                Ok(reply) => {
                    metrics
                        .upstream_attempts
                        .with_label_values(&[&route.name, "success"])
                        .inc();
                    return Ok(AttemptSuccess {
                        route: route.clone(),
                        adapter,
                        attempt,
                        started,
                        reply,
                    });
                }
                Err(failure) => failure,
            };

            let mut record = request.usage_record(route, attempt, started);
            record.success = false;
            record.status_code = failure.status_code();
            record.error_message = Some(redact(&failure.describe(), &route.api_key));
            self.usage.record(record);

            let advance = failure.is_retryable() && !is_last;
            tracing::warn!(
                request_id = %request.request_id,
                route = %route.name,
                attempt = attempt,
                candidates = candidates.len(),
                retryable = failure.is_retryable(),
                "Upstream attempt failed: {}",
                failure.describe()
            );

            if advance {
                metrics
                    .upstream_attempts
                    .with_label_values(&[&route.name, "retry"])
                    .inc();
                metrics
                    .fallbacks
                    .with_label_values(&[&request.requested_model])
                    .inc();
                last_failure = Some((route.name.clone(), failure));
                continue;
            }

            metrics
                .upstream_attempts
                .with_label_values(&[&route.name, "failure"])
                .inc();
            return Err(final_error(route.name.clone(), failure));
        }

        Err(match last_failure {
            Some((route_name, failure)) => final_error(route_name, failure),
            None => FallbackError::App(AppError::Internal("no candidate routes".to_string())),
        })
    }

    /// One upstream round trip.
    async fn attempt(
        &self,
        request: &AttemptRequest,
        route: &Route,
        adapter: &dyn Adapter,
        attempt: usize,
    ) -> Result<UpstreamReply, AttemptFailure> {
        let mut body = adapter
            .rewrite_request(request.body.clone(), &route.model)
            .map_err(AttemptFailure::Adapter)?;
        finalize_body(&mut body, route.format, request.stream);

        let url = build_upstream_url(&route.base_url, route.format, &route.model, request.stream);
        let auth = UpstreamAuth::for_route(route, &request.headers);

        tracing::debug!(
            request_id = %request.request_id,
            route = %route.name,
            attempt = attempt,
            client_protocol = %request.client_protocol,
            upstream_protocol = %route.format,
            model = %route.model,
            stream = request.stream,
            "Sending upstream request"
        );

        let response = build_upstream_request(
            &self.http_client,
            &url,
            &body,
            auth,
            route.format,
            &request.headers,
        )
        .send()
        .await
        .map_err(|e| AttemptFailure::from_reqwest(e, &route.api_key))?;

        // reqwest and axum sit on different `http` major versions
        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(AttemptFailure::Status { status, body });
        }

        if request.stream {
            return Ok(UpstreamReply::Streaming(response));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AttemptFailure::from_reqwest(e, &route.api_key))?;
        Ok(UpstreamReply::Complete { status, body })
    }
}

fn final_error(route_name: String, failure: AttemptFailure) -> FallbackError {
    match failure {
        AttemptFailure::Transport { message, .. } => {
            FallbackError::App(AppError::UpstreamUnavailable(message))
        }
        AttemptFailure::Status { status, body } => FallbackError::Upstream {
            route_name,
            status,
            body,
        },
        AttemptFailure::Adapter(e) => FallbackError::App(AppError::AdapterFailure(e)),
    }
}
