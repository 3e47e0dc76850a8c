//! Store statistics surfaced to operators via the status endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Route counts by import state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RoutesStats {
    pub imported: usize,
    pub filtered: usize,
}

/// Routes held for one route server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteServerRoutesStats {
    pub name: String,
    pub routes: RoutesStats,
    pub state: String,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Aggregate over the routes store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutesStoreStats {
    pub total_routes: RoutesStats,
    pub route_servers: Vec<RouteServerRoutesStats>,
}

/// Neighbors held for one route server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteServerNeighborsStats {
    pub name: String,
    pub state: String,
    pub neighbors: usize,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Aggregate over the neighbors store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborsStoreStats {
    pub total_neighbors: usize,
    pub route_servers: Vec<RouteServerNeighborsStats>,
}
