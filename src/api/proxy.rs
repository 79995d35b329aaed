//! Proxy front controller.
//!
//! One handler per client protocol. Each authenticates, parses the body,
//! resolves candidate routes and hands the request to the fallback
//! orchestrator, then renders the outcome in the client's protocol.

use crate::api::handlers::{strip_local_key, verify_local_key, AppState};
use crate::api::streaming::{sse_response, transcode_stream, StreamSession};
use crate::core::error::{build_protocol_error_response, AppError};
use crate::core::logging::generate_request_id;
use crate::core::middleware::{ModelName, RouteName};
use crate::services::fallback::{
    AttemptRequest, AttemptSuccess, FallbackError, UpstreamReply,
};
use crate::transformer::cursor::normalize_cursor_request;
use crate::transformer::detector::{ClientFormat, FormatDetector};
use crate::transformer::{Protocol, TokenUsage, TransformError};
use crate::with_request_context;
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

const ACTION_GENERATE: &str = "generateContent";
const ACTION_STREAM_GENERATE: &str = "streamGenerateContent";

/// Query parameters accepted on the Gemini endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct GeminiQuery {
    pub key: Option<String>,
}

/// What the endpoint, rather than the body, says about a request.
#[derive(Debug, Clone)]
struct ClientCall {
    protocol: Protocol,
    /// Gemini carries the model in the path
    path_model: Option<String>,
    /// Gemini signals streaming by action
    path_stream: Option<bool>,
    query_key: Option<String>,
}

/// `POST /v1/chat/completions` (OpenAI, including Cursor-style bodies).
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let call = ClientCall {
        protocol: Protocol::OpenAI,
        path_model: None,
        path_stream: None,
        query_key: None,
    };
    handle(state, call, headers, body).await
}

/// `POST /v1/messages` and its Anthropic/Claude-Code aliases.
pub async fn messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let call = ClientCall {
        protocol: Protocol::Claude,
        path_model: None,
        path_stream: None,
        query_key: None,
    };
    handle(state, call, headers, body).await
}

/// `POST /v1beta/models/{model}:{generateContent|streamGenerateContent}`.
pub async fn gemini_generate(
    State(state): State<Arc<AppState>>,
    Path(model_action): Path<String>,
    Query(query): Query<GeminiQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some((model, action)) = model_action.rsplit_once(':') else {
        return AppError::MalformedInput(format!("missing action in '{}'", model_action))
            .into_protocol_response(Protocol::Gemini);
    };
    let stream = match action {
        ACTION_GENERATE => false,
        ACTION_STREAM_GENERATE => true,
        other => {
            return AppError::MalformedInput(format!("unsupported action '{}'", other))
                .into_protocol_response(Protocol::Gemini);
        }
    };

    let call = ClientCall {
        protocol: Protocol::Gemini,
        path_model: Some(model.to_string()),
        path_stream: Some(stream),
        query_key: query.key,
    };
    handle(state, call, headers, body).await
}

async fn handle(state: Arc<AppState>, call: ClientCall, headers: HeaderMap, body: Bytes) -> Response {
    let request_id = generate_request_id();
    let protocol = call.protocol;

    with_request_context!(request_id.clone(), async move {
        match proxy(&state, call, headers, body, request_id).await {
            Ok(response) => response,
            Err((error, model)) => {
                tracing::warn!(client_protocol = %protocol, "Request failed: {}", error);
                error_response(error, protocol, model.as_deref())
            }
        }
    })
}

type ProxyResult = std::result::Result<Response, (AppError, Option<String>)>;

async fn proxy(
    state: &AppState,
    call: ClientCall,
    headers: HeaderMap,
    body: Bytes,
    request_id: String,
) -> ProxyResult {
    let settings = state.settings.load_full();

    verify_local_key(&settings, &headers, call.query_key.as_deref()).map_err(|e| (e, None))?;
    let mut headers = headers;
    strip_local_key(&settings, &mut headers);

    let mut body: Value = serde_json::from_slice(&body)
        .map_err(|e| (AppError::MalformedInput(format!("invalid JSON: {}", e)), None))?;
    if !body.is_object() {
        return Err((
            AppError::MalformedInput("request body must be a JSON object".to_string()),
            None,
        ));
    }

    let model = match call.path_model {
        Some(model) => Some(model).filter(|m| !m.is_empty()),
        None => body
            .get("model")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .map(str::to_string),
    }
    .ok_or_else(|| (AppError::MalformedInput("missing model".to_string()), None))?;
    let stream = call
        .path_stream
        .unwrap_or_else(|| body.get("stream").and_then(Value::as_bool).unwrap_or(false));

    if call.protocol == Protocol::OpenAI && FormatDetector::detect(&body) == ClientFormat::Cursor {
        tracing::debug!(model = %model, "Normalizing Cursor-style request");
        body = normalize_cursor_request(body);
    }

    let candidates = state
        .resolver
        .resolve(&model, &settings)
        .map_err(|e| (e, Some(model.clone())))?;

    tracing::info!(
        model = %model,
        client_protocol = %call.protocol,
        stream = stream,
        candidates = candidates.len(),
        "Proxying request"
    );

    let request = AttemptRequest {
        client_protocol: call.protocol,
        body,
        requested_model: model.clone(),
        stream,
        headers,
        request_id,
    };

    match state.orchestrator.execute(&request, &candidates).await {
        Ok(success) => Ok(respond(state, &request, success)),
        Err(FallbackError::App(e)) => Err((e, Some(model))),
        Err(FallbackError::Upstream {
            route_name,
            status,
            body,
        }) => Ok(upstream_error_response(status, body, &model, &route_name)),
    }
}

/// Render a successful attempt and write its usage record.
fn respond(state: &AppState, request: &AttemptRequest, success: AttemptSuccess) -> Response {
    let AttemptSuccess {
        route,
        adapter,
        attempt,
        started,
        reply,
    } = success;
    let sink = state.orchestrator.usage_sink().clone();
    let mut record = request.usage_record(&route, attempt, started);

    match reply {
        UpstreamReply::Streaming(upstream) => {
            record.status_code = Some(upstream.status().as_u16());
            let transcoder = adapter.transcoder(&route.model);
            let session = StreamSession::new(sink, record, started, route.api_key.clone());
            sse_response(
                transcode_stream(upstream, transcoder, session),
                &request.requested_model,
                &route.name,
            )
        }
        UpstreamReply::Complete { status, body } => {
            record.status_code = Some(status.as_u16());
            let translated = serde_json::from_slice::<Value>(&body)
                .map_err(|e| TransformError::InvalidField {
                    field: "body",
                    reason: format!("upstream response is not JSON: {}", e),
                })
                .and_then(|value| {
                    let usage = TokenUsage::from_value(&value).unwrap_or_default();
                    adapter.rewrite_response(value).map(|v| (v, usage))
                });

            match translated {
                Ok((value, usage)) => {
                    record.success = true;
                    record.prompt_tokens = usage.prompt_tokens;
                    record.completion_tokens = usage.completion_tokens;
                    record.total_tokens = usage.total();
                    record.elapsed_ms = started.elapsed().as_millis() as u64;
                    sink.record(record);

                    let mut response = (status, Json(value)).into_response();
                    response
                        .extensions_mut()
                        .insert(ModelName(request.requested_model.clone()));
                    response.extensions_mut().insert(RouteName(route.name.clone()));
                    response
                }
                Err(e) => {
                    record.success = false;
                    record.error_message = Some(format!("adapter failure: {}", e));
                    record.elapsed_ms = started.elapsed().as_millis() as u64;
                    sink.record(record);

                    tracing::error!(route = %route.name, "Failed to translate upstream response: {}", e);
                    let error = AppError::AdapterFailure(e);
                    build_protocol_error_response(
                        request.client_protocol,
                        error.status_code(),
                        error.error_type(),
                        &error.to_string(),
                        Some(&request.requested_model),
                        Some(&route.name),
                    )
                }
            }
        }
    }
}

/// Last attempted route's HTTP error, status and body unchanged.
fn upstream_error_response(status: StatusCode, body: Bytes, model: &str, route: &str) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response.extensions_mut().insert(ModelName(model.to_string()));
    response.extensions_mut().insert(RouteName(route.to_string()));
    response
}

fn error_response(error: AppError, protocol: Protocol, model: Option<&str>) -> Response {
    build_protocol_error_response(
        protocol,
        error.status_code(),
        error.error_type(),
        &error.to_string(),
        model,
        None,
    )
}
