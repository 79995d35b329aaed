//! LLM Gateway - a multi-protocol reverse proxy for LLM APIs
//!
//! Clients speak OpenAI Chat Completions, Anthropic Messages or Google
//! Gemini GenerateContent; each configured route speaks one of the same
//! three. The gateway translates requests, responses and SSE streams between
//! them, with features including:
//!
//! - **Random Load Balancing**: matching routes are shuffled per request
//! - **Fallback**: retryable failures move on to the next candidate route
//! - **Redirect Keyword**: a reserved model name pinned to one route
//! - **Cursor Normalization**: mixed OpenAI/Anthropic bodies are rewritten
//! - **Usage Records**: one record per upstream attempt, optionally as JSONL
//! - **Metrics & Monitoring**: Prometheus metrics for observability
//!
//! # Architecture
//!
//! - [`core`]: config, errors, logging context, metrics, middleware, usage sink
//! - [`api`]: HTTP handlers, upstream request construction, streaming driver
//! - [`services`]: route store, resolver, fallback orchestrator
//! - [`transformer`]: protocol adapters, schema sanitizer, SSE transcoders
//!
//! # Configuration
//!
//! Routes and settings are read from a YAML file (`CONFIG_PATH`, default
//! `config.yaml`). Optional environment overrides:
//! - `HOST`, `PORT`: server bind address (default: 0.0.0.0:18000)
//! - `LOCAL_API_KEY`: shared key clients must present
//! - `FALLBACK_ENABLED`: try further routes on retryable failures (default: true)
//! - `VERIFY_SSL`: verify SSL certificates for upstream (default: true)
//! - `CONNECT_TIMEOUT_SECS`: upstream connect timeout (default: 10)
//! - `USAGE_LOG_PATH`: enable JSONL usage records at this path

pub mod api;
pub mod core;
pub mod services;
pub mod transformer;

// Re-export commonly used types for convenience
pub use api::{create_router, AppState};
pub use core::{AppConfig, AppError, Result, RoutingSettings};
pub use services::{FallbackOrchestrator, Route, RouteResolver, RouteStore, StaticRouteStore};
pub use transformer::{AdapterRegistry, Protocol};
