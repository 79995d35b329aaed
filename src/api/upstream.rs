//! Upstream request construction.
//!
//! URL building, credentials and the last protocol-specific touches on the
//! request body all live here, so the fallback loop only deals with routes.

use crate::core::config::AppConfig;
use crate::services::route_store::Route;
use crate::transformer::Protocol;
use axum::http::HeaderMap;
use serde_json::{json, Value};
use std::time::Duration;

pub const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

/// Authentication mode for an upstream request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpstreamAuth<'a> {
    Bearer(&'a str),
    XApiKey(&'a str),
    GoogApiKey(&'a str),
    /// Route has no key: forward the client's `Authorization` header verbatim
    Forward(Option<&'a str>),
}

impl<'a> UpstreamAuth<'a> {
    /// Pick the credential scheme for a route.
    pub fn for_route(route: &'a Route, client_headers: &'a HeaderMap) -> Self {
        if route.api_key.is_empty() {
            return UpstreamAuth::Forward(
                client_headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok()),
            );
        }
        match route.format {
            Protocol::OpenAI => UpstreamAuth::Bearer(&route.api_key),
            Protocol::Claude => UpstreamAuth::XApiKey(&route.api_key),
            Protocol::Gemini => UpstreamAuth::GoogApiKey(&route.api_key),
        }
    }
}

/// Build the full upstream URL for a route.
///
/// A trailing slash on the base URL means the administrator already spelled
/// out the versioned prefix, so only the terminal segment is appended. A
/// base already ending in the protocol's version segment is not given a
/// second one.
pub fn build_upstream_url(base_url: &str, protocol: Protocol, model: &str, stream: bool) -> String {
    let (version, terminal) = match protocol {
        Protocol::OpenAI => ("v1", "chat/completions".to_string()),
        Protocol::Claude => ("v1", "messages".to_string()),
        Protocol::Gemini => {
            let action = if stream {
                "streamGenerateContent?alt=sse"
            } else {
                "generateContent"
            };
            ("v1beta", format!("models/{}:{}", model, action))
        }
    };

    if base_url.ends_with('/') {
        return format!("{}{}", base_url, terminal);
    }
    if base_url.ends_with(&format!("/{}", version)) {
        return format!("{}/{}", base_url, terminal);
    }
    format!("{}/{}/{}", base_url, version, terminal)
}

/// Set the streaming flags each upstream protocol expects on the body.
///
/// Gemini signals streaming in the URL and rejects a `stream` field; OpenAI
/// only reports usage on streams when asked to.
pub fn finalize_body(body: &mut Value, upstream: Protocol, stream: bool) {
    let Some(obj) = body.as_object_mut() else {
        return;
    };
    match upstream {
        Protocol::OpenAI => {
            obj.insert("stream".to_string(), Value::Bool(stream));
            if stream {
                obj.insert("stream_options".to_string(), json!({"include_usage": true}));
            } else {
                obj.remove("stream_options");
            }
        }
        Protocol::Claude => {
            obj.insert("stream".to_string(), Value::Bool(stream));
        }
        Protocol::Gemini => {
            obj.remove("stream");
            obj.remove("stream_options");
        }
    }
}

/// Build a POST request with auth and, for Claude upstreams, version headers.
pub fn build_upstream_request(
    http_client: &reqwest::Client,
    url: &str,
    payload: &Value,
    auth: UpstreamAuth<'_>,
    upstream: Protocol,
    client_headers: &HeaderMap,
) -> reqwest::RequestBuilder {
    let mut request = http_client.post(url);

    request = match auth {
        UpstreamAuth::Bearer(key) => request.header("Authorization", format!("Bearer {}", key)),
        UpstreamAuth::XApiKey(key) => request.header("x-api-key", key),
        UpstreamAuth::GoogApiKey(key) => request.header("x-goog-api-key", key),
        UpstreamAuth::Forward(Some(value)) => request.header("Authorization", value),
        UpstreamAuth::Forward(None) => request,
    };

    if upstream == Protocol::Claude {
        let version = header_str(client_headers, "anthropic-version")
            .unwrap_or(DEFAULT_ANTHROPIC_VERSION);
        request = request.header("anthropic-version", version);
        if let Some(beta) = header_str(client_headers, "anthropic-beta") {
            request = request.header("anthropic-beta", beta);
        }
    }

    request.json(payload)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Shared upstream HTTP client.
///
/// Only connection establishment is bounded; generations may stream for
/// many minutes, so there is no overall request timeout.
pub fn create_http_client(config: &AppConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(!config.verify_ssl)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .http2_keep_alive_interval(Duration::from_secs(30))
        .http2_keep_alive_timeout(Duration::from_secs(10))
        .build()
}

/// Human-readable transport error without the request URL.
///
/// Includes the source chain so connect/timeout causes survive.
pub fn transport_error_message(error: reqwest::Error) -> String {
    let error = error.without_url();
    let mut message = error.to_string();
    let mut source = std::error::Error::source(&error);
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
