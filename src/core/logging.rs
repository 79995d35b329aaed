//! Logging utilities with request and route context.
//!
//! Handlers run inside a task-local scope so log lines emitted deep in the
//! fallback loop or the streaming driver can carry the request id and the
//! route currently being attempted.

tokio::task_local! {
    /// Task-local storage for the current request ID.
    pub static REQUEST_ID: String;
}

tokio::task_local! {
    /// Task-local storage for the name of the route being attempted.
    pub static ROUTE_CONTEXT: String;
}

/// Get the current request ID from context, if set.
///
/// Returns an empty string if no request ID is set.
pub fn get_request_id() -> String {
    REQUEST_ID.try_with(|id| id.clone()).unwrap_or_default()
}

/// Get the current route name from context, if set.
pub fn get_route_context() -> String {
    ROUTE_CONTEXT.try_with(|ctx| ctx.clone()).unwrap_or_default()
}

/// Generate a new unique request ID using UUID v4.
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Execute an async block with request context (request_id, route).
///
/// # Example
///
/// ```ignore
/// with_request_context!(request_id, async {
///     // handler logic here
/// })
/// ```
#[macro_export]
macro_rules! with_request_context {
    ($request_id:expr, $route_name:expr, $body:expr) => {
        $crate::core::logging::REQUEST_ID
            .scope($request_id, async {
                $crate::core::logging::ROUTE_CONTEXT
                    .scope($route_name, $body)
                    .await
            })
            .await
    };
    ($request_id:expr, $body:expr) => {
        $crate::core::logging::REQUEST_ID
            .scope($request_id, $body)
            .await
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_id_get() {
        REQUEST_ID
            .scope("test-request-123".to_string(), async {
                assert_eq!(get_request_id(), "test-request-123");
            })
            .await;
    }

    #[tokio::test]
    async fn test_context_defaults() {
        assert_eq!(get_request_id(), "");
        assert_eq!(get_route_context(), "");
    }

    #[tokio::test]
    async fn test_request_id_isolation() {
        let task1 = tokio::spawn(async {
            REQUEST_ID
                .scope("request-1".to_string(), async {
                    tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
                    get_request_id()
                })
                .await
        });

        let task2 = tokio::spawn(async {
            REQUEST_ID
                .scope("request-2".to_string(), async {
                    tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
                    get_request_id()
                })
                .await
        });

        assert_eq!(task1.await.unwrap(), "request-1");
        assert_eq!(task2.await.unwrap(), "request-2");
    }

    #[tokio::test]
    async fn test_with_request_context_macro() {
        let (id, route) = crate::with_request_context!(
            "req-9".to_string(),
            "route-a".to_string(),
            async { (get_request_id(), get_route_context()) }
        );
        assert_eq!(id, "req-9");
        assert_eq!(route, "route-a");
    }

    #[tokio::test]
    async fn test_nested_route_scope_overrides() {
        ROUTE_CONTEXT
            .scope("outer".to_string(), async {
                ROUTE_CONTEXT
                    .scope("inner".to_string(), async {
                        assert_eq!(get_route_context(), "inner");
                    })
                    .await;
                assert_eq!(get_route_context(), "outer");
            })
            .await;
    }

    #[test]
    fn test_generate_request_id_unique() {
        let a = generate_request_id();
        let b = generate_request_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }
}
