//! Streaming response driver.
//!
//! Reads the upstream body, splits it into SSE events, runs them through the
//! route's transcoder and writes the resulting frames to the client in order.
//! Exactly one usage record is written per stream, including when the client
//! goes away mid-stream.

use crate::api::upstream::transport_error_message;
use crate::core::error::redact;
use crate::core::middleware::{ModelName, RouteName};
use crate::core::usage::{UsageRecord, UsageSink};
use crate::transformer::sse::SseParser;
use crate::transformer::transcoder::Transcoder;
use crate::transformer::TokenUsage;
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use futures::stream::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Instant;

/// Usage bookkeeping for one streaming response.
///
/// The record is written by [`StreamSession::finish`] or, if the stream is
/// dropped before that (client disconnect), by `Drop`.
pub struct StreamSession {
    sink: Arc<dyn UsageSink>,
    record: Option<UsageRecord>,
    usage: TokenUsage,
    started: Instant,
    secret: String,
}

impl StreamSession {
    pub fn new(
        sink: Arc<dyn UsageSink>,
        record: UsageRecord,
        started: Instant,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            record: Some(record),
            usage: TokenUsage::default(),
            started,
            secret: secret.into(),
        }
    }

    pub fn update_usage(&mut self, usage: TokenUsage) {
        self.usage = usage;
    }

    /// Write the record. Later calls are no-ops.
    pub fn finish(&mut self, success: bool, error_message: Option<String>) {
        let Some(mut record) = self.record.take() else {
            return;
        };
        record.success = success;
        record.error_message = error_message.map(|m| redact(&m, &self.secret));
        record.prompt_tokens = self.usage.prompt_tokens;
        record.completion_tokens = self.usage.completion_tokens;
        record.total_tokens = self.usage.total();
        record.elapsed_ms = self.started.elapsed().as_millis() as u64;
        self.sink.record(record);
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if self.record.is_some() {
            tracing::info!("Client disconnected before stream completed");
            self.finish(false, Some("client disconnected".to_string()));
        }
    }
}

/// Translate an upstream SSE body into client-protocol bytes.
///
/// Parsing stops at the first upstream read error; nothing further is sent
/// and the client sees the stream end without a terminal event.
pub fn transcode_stream(
    upstream: reqwest::Response,
    mut transcoder: Box<dyn Transcoder>,
    mut session: StreamSession,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send {
    async_stream::stream! {
        let mut body = upstream.bytes_stream();
        let mut parser = SseParser::new();
        let raw = transcoder.forwards_raw_bytes();

        for frame in transcoder.stream_start() {
            yield Ok(frame.to_bytes());
        }

        let mut interrupted: Option<String> = None;
        while let Some(chunk) = body.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    interrupted = Some(transport_error_message(e));
                    break;
                }
            };

            let events = parser.parse(&bytes);
            if raw {
                for event in &events {
                    transcoder.stream_chunk(event);
                }
                yield Ok(bytes);
            } else {
                for event in &events {
                    for frame in transcoder.stream_chunk(event) {
                        yield Ok(frame.to_bytes());
                    }
                }
            }
            session.update_usage(transcoder.usage());
        }

        if let Some(message) = interrupted {
            tracing::warn!("Upstream stream interrupted: {}", message);
            session.update_usage(transcoder.usage());
            session.finish(false, Some(format!("upstream stream interrupted: {}", message)));
            return;
        }

        if let Some(event) = parser.finish() {
            let frames = transcoder.stream_chunk(&event);
            if !raw {
                for frame in frames {
                    yield Ok(frame.to_bytes());
                }
            }
        }
        for frame in transcoder.stream_end() {
            yield Ok(frame.to_bytes());
        }

        session.update_usage(transcoder.usage());
        if transcoder.is_complete() {
            session.finish(true, None);
        } else {
            tracing::warn!("Upstream stream ended without a terminal event");
            session.finish(false, Some("upstream stream ended without a terminal event".to_string()));
        }
    }
}

/// Wrap a byte stream as an SSE response carrying metric labels.
pub fn sse_response<S>(stream: S, model: &str, route: &str) -> Response
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
{
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response.extensions_mut().insert(ModelName(model.to_string()));
    response.extensions_mut().insert(RouteName(route.to_string()));
    response
}
