//! Core functionality for the gateway.
//!
//! This module contains fundamental components used throughout the application:
//! - Configuration management
//! - Error handling
//! - Logging context
//! - Metrics collection and HTTP middleware
//! - The usage sink

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod usage;

// Re-export commonly used types
pub use config::{AppConfig, RoutingSettings, ServerConfig};
pub use error::{AppError, Result};
pub use logging::{get_request_id, get_route_context, ROUTE_CONTEXT};
pub use metrics::{get_metrics, init_metrics, Metrics};
pub use middleware::MetricsMiddleware;
pub use usage::{MemoryUsageSink, UsageLogger, UsageRecord, UsageSink};
