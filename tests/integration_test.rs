//! Integration tests for the gateway router.
//!
//! These tests verify end-to-end functionality including:
//! - Authentication
//! - Request validation and error bodies
//! - Route resolution (unknown models, redirect keyword)
//! - Model list, health and metrics endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use llm_gateway_rust::{
    api::{create_router, AppState},
    core::{config::RedirectConfig, init_metrics, MemoryUsageSink, RoutingSettings},
    services::{Route, RouteStore, StaticRouteStore},
    transformer::Protocol,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Create a test application with the given routes and settings
fn create_test_app(routes: Vec<Route>, settings: RoutingSettings) -> (Router, Arc<MemoryUsageSink>) {
    init_metrics();
    let store: Arc<dyn RouteStore> = Arc::new(StaticRouteStore::new(routes));
    let sink = Arc::new(MemoryUsageSink::with_store(store.clone()));
    let state = Arc::new(AppState::new(
        settings,
        store,
        reqwest::Client::new(),
        sink.clone(),
    ));
    (create_router(state), sink)
}

fn openai_completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "model": "upstream-model",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
    })
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn chat_body(model: &str) -> Value {
    json!({"model": model, "messages": [{"role": "user", "content": "hi"}]})
}

#[tokio::test]
async fn test_health_endpoint() {
    let routes = vec![
        Route::new(1, "a", "gpt-4", "http://localhost:1", Protocol::OpenAI),
        Route::new(2, "b", "gpt-4", "http://localhost:1", Protocol::OpenAI).disabled(),
    ];
    let (app, _) = create_test_app(routes, RoutingSettings::default());

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "routes": 1}));
}

#[tokio::test]
async fn test_list_models_distinct_enabled() {
    let routes = vec![
        Route::new(1, "a", "gpt-4", "http://localhost:1", Protocol::OpenAI),
        Route::new(2, "b", "gpt-4", "http://localhost:1", Protocol::Claude),
        Route::new(3, "c", "claude-3", "http://localhost:1", Protocol::Claude),
        Route::new(4, "d", "hidden", "http://localhost:1", Protocol::Gemini).disabled(),
    ];
    let (app, _) = create_test_app(routes, RoutingSettings::default());

    let request = Request::builder().uri("/v1/models").body(Body::empty()).unwrap();
    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["object"], "list");
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["claude-3", "gpt-4"]);
    assert_eq!(body["data"][0]["object"], "model");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = create_test_app(vec![], RoutingSettings::default());
    let request = Request::builder().uri("/v1/models").body(Body::empty()).unwrap();
    let (status, _) = send(app.clone(), request).await;
    assert_eq!(status, StatusCode::OK);

    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(String::from_utf8_lossy(&bytes).contains("llm_gateway"));
}

#[tokio::test]
async fn test_missing_local_key_rejected() {
    let settings = RoutingSettings {
        local_api_key: Some("sk-local".to_string()),
        ..Default::default()
    };
    let (app, sink) = create_test_app(vec![], settings);

    let (status, body) = send(app, post("/v1/chat/completions", chat_body("gpt-4"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["type"], "authentication_error");
    assert!(sink.records().is_empty());
}

#[tokio::test]
async fn test_local_key_accepted_from_client_specific_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_completion("ok")))
        .mount(&server)
        .await;

    let settings = RoutingSettings {
        local_api_key: Some("sk-local".to_string()),
        ..Default::default()
    };
    let routes = vec![Route::new(1, "main", "m", server.uri(), Protocol::OpenAI).with_api_key("sk-up")];
    let (app, _) = create_test_app(routes, settings);

    let mut request = post("/v1/messages", json!({"model": "m", "max_tokens": 10, "messages": [{"role": "user", "content": "hi"}]}));
    request
        .headers_mut()
        .insert("x-api-key", "sk-local".parse().unwrap());
    let (status, body) = send(app.clone(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "message");

    let request = post(
        "/v1beta/models/m:generateContent?key=sk-local",
        json!({"contents": [{"role": "user", "parts": [{"text": "hi"}]}]}),
    );
    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["candidates"][0]["content"]["parts"][0]["text"], "ok");

    // The local key is never forwarded; the route key is
    let received = server.received_requests().await.unwrap();
    assert!(received
        .iter()
        .all(|r| r.headers["authorization"] == "Bearer sk-up"));
}

#[tokio::test]
async fn test_malformed_json() {
    let (app, _) = create_test_app(vec![], RoutingSettings::default());
    let request = Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_missing_model() {
    let (app, _) = create_test_app(vec![], RoutingSettings::default());
    let (status, body) = send(
        app,
        post("/v1/chat/completions", json!({"messages": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("model"));
}

#[tokio::test]
async fn test_unknown_model_lists_known_models() {
    let routes = vec![
        Route::new(1, "a", "gpt-4", "http://localhost:1", Protocol::OpenAI),
        Route::new(2, "b", "claude-3", "http://localhost:1", Protocol::Claude),
    ];
    let (app, sink) = create_test_app(routes, RoutingSettings::default());

    let (status, body) = send(app, post("/v1/chat/completions", chat_body("gpt-9"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.contains("gpt-9"));
    assert!(message.contains("claude-3, gpt-4"));
    assert!(sink.records().is_empty());
}

#[tokio::test]
async fn test_unknown_gemini_action() {
    let (app, _) = create_test_app(vec![], RoutingSettings::default());
    let (status, body) = send(
        app,
        post("/v1beta/models/gemini-pro:countTokens", json!({"contents": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["status"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn test_redirect_keyword_pins_single_route() {
    let target = MockServer::start().await;
    let other = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&target)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_completion("other")))
        .expect(0)
        .mount(&other)
        .await;

    let settings = RoutingSettings {
        redirect: RedirectConfig {
            enabled: true,
            keyword: "proxy_auto".to_string(),
            target_route_id: Some(7),
            target_model: None,
        },
        ..Default::default()
    };
    let routes = vec![
        Route::new(7, "pinned", "fast", target.uri(), Protocol::OpenAI),
        Route::new(8, "spare", "fast", other.uri(), Protocol::OpenAI),
    ];
    let (app, sink) = create_test_app(routes, settings);

    // A retryable failure on the pinned route is final: the list has one entry
    let (status, _) = send(app, post("/v1/chat/completions", chat_body("proxy_auto:fast"))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].route_id, Some(7));
    assert_eq!(records[0].model, "proxy_auto:fast");
    assert_eq!(records[0].upstream_model, "fast");
}

#[tokio::test]
async fn test_redirect_misconfigured() {
    let settings = RoutingSettings {
        redirect: RedirectConfig {
            enabled: true,
            target_route_id: Some(99),
            ..Default::default()
        },
        ..Default::default()
    };
    let routes = vec![Route::new(1, "a", "fast", "http://localhost:1", Protocol::OpenAI)];
    let (app, _) = create_test_app(routes, settings);

    let (status, body) = send(app, post("/v1/chat/completions", chat_body("proxy_auto"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "not_found_error");
}

#[tokio::test]
async fn test_settings_swap_applies_to_next_request() {
    let store: Arc<dyn RouteStore> = Arc::new(StaticRouteStore::new(vec![]));
    let sink = Arc::new(MemoryUsageSink::new());
    let state = Arc::new(AppState::new(
        RoutingSettings::default(),
        store,
        reqwest::Client::new(),
        sink,
    ));
    let app = create_router(state.clone());

    let (status, _) = send(app.clone(), post("/v1/chat/completions", chat_body("m"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    state.update_settings(RoutingSettings {
        local_api_key: Some("sk-new".to_string()),
        ..Default::default()
    });
    let (status, _) = send(app, post("/v1/chat/completions", chat_body("m"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_keyless_route_never_receives_local_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_completion("ok")))
        .expect(1)
        .mount(&server)
        .await;

    let settings = RoutingSettings {
        local_api_key: Some("sk-local".to_string()),
        ..Default::default()
    };
    let routes = vec![Route::new(1, "keyless", "m", server.uri(), Protocol::OpenAI)];
    let (app, _) = create_test_app(routes, settings);

    let mut request = post("/v1/chat/completions", chat_body("m"));
    request
        .headers_mut()
        .insert("authorization", "Bearer sk-local".parse().unwrap());
    let (status, _) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);

    let received = server.received_requests().await.unwrap();
    assert!(received[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_empty_gemini_path_model() {
    let routes = vec![Route::new(1, "a", "gemini-pro", "http://localhost:1", Protocol::Gemini)];
    let (app, sink) = create_test_app(routes, RoutingSettings::default());
    let (status, body) = send(
        app,
        post(
            "/v1beta/models/:generateContent",
            json!({"contents": [{"role": "user", "parts": [{"text": "hi"}]}]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["status"], "INVALID_ARGUMENT");
    assert!(sink.records().is_empty());
}
