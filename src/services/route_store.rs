//! Route records and the read-only store the gateway resolves them from.

use crate::transformer::Protocol;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One configured upstream endpoint advertising a single model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: i64,
    pub name: String,
    /// Advertised model name, also sent upstream as the target model
    pub model: String,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub group: String,
    pub format: Protocol,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Route {
    /// Convenience constructor with timestamps set to now.
    pub fn new(
        id: i64,
        name: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        format: Protocol,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            model: model.into(),
            base_url: base_url.into(),
            api_key: String::new(),
            group: String::new(),
            format,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Read access to the route table.
///
/// Implementations must hand out consistent snapshots; a request works on
/// the snapshot it loaded even if the table is replaced meanwhile.
pub trait RouteStore: Send + Sync {
    /// All routes, enabled or not.
    fn routes(&self) -> Arc<Vec<Route>>;

    /// Lookup by id.
    fn get(&self, id: i64) -> Option<Route> {
        self.routes().iter().find(|r| r.id == id).cloned()
    }
}

/// In-memory route table, swapped atomically on reload.
pub struct StaticRouteStore {
    routes: ArcSwap<Vec<Route>>,
}

impl StaticRouteStore {
    pub fn new(routes: Vec<Route>) -> Self {
        Self {
            routes: ArcSwap::from_pointee(routes),
        }
    }

    /// Replace the whole table. In-flight requests keep their old snapshot.
    pub fn replace(&self, routes: Vec<Route>) {
        tracing::info!(count = routes.len(), "Route table replaced");
        self.routes.store(Arc::new(routes));
    }
}

impl RouteStore for StaticRouteStore {
    fn routes(&self) -> Arc<Vec<Route>> {
        self.routes.load_full()
    }
}
