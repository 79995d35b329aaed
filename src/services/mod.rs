//! Business logic services for the gateway.
//!
//! Route storage, model-to-route resolution and fallback across candidate
//! routes.

pub mod fallback;
pub mod resolver;
pub mod route_store;

// Re-export commonly used types
pub use fallback::{AttemptFailure, AttemptRequest, FallbackError, FallbackOrchestrator};
pub use resolver::RouteResolver;
pub use route_store::{Route, RouteStore, StaticRouteStore};
