//! Periodically pulls full route dumps and indexes them for lookups.
//!
//! A routes refresh must not run ahead of the neighbors store: every stored
//! route is annotated with the neighbor it was learned from, taken from the
//! snapshot that preceded the write.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{
    LookupRoute, Neighbor, NeighborsLookupResults, Route, RouteServerRef, RouteServerRoutesStats,
    RouteState, RoutesStats, RoutesStoreStats,
};
use crate::config::Config;
use crate::error::StoreError;
use crate::source::{Source, SourceId};
use crate::store::neighbors_store::NeighborsStore;
use crate::store::sources_store::{SourceStatus, SourcesStore};
use crate::store::DEFAULT_REFRESH_JITTER;

/// How often the worker re-checks whether the neighbors snapshot arrived.
const NEIGHBORS_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Storage behind the routes store.
#[async_trait]
pub trait RoutesStoreBackend: Send + Sync {
    /// Replace all lookup routes of a source atomically.
    async fn set_routes(
        &self,
        source_id: &SourceId,
        routes: Vec<LookupRoute>,
    ) -> Result<(), StoreError>;

    /// Number of (imported, filtered) routes stored for a source.
    async fn count_routes_at(&self, source_id: &SourceId) -> Result<(usize, usize), StoreError>;

    /// Routes announced by any of the given neighbors.
    async fn find_by_neighbors(
        &self,
        neighbor_ids: &[String],
    ) -> Result<Vec<LookupRoute>, StoreError>;

    /// Routes whose network matches the prefix. How the match is performed
    /// (exact, longest-prefix, substring) is backend-defined but fixed per
    /// deployment.
    async fn find_by_prefix(&self, prefix: &str) -> Result<Vec<LookupRoute>, StoreError>;
}

/// Cross-source routes index fed by periodic full dumps.
pub struct RoutesStore {
    backend: Arc<dyn RoutesStoreBackend>,
    sources: SourcesStore,
    neighbors: Arc<NeighborsStore>,
    shutdown: watch::Receiver<bool>,
    jitter: Duration,
}

impl RoutesStore {
    #[must_use]
    pub fn new(
        cfg: &Config,
        sources: Vec<Arc<Source>>,
        backend: Arc<dyn RoutesStoreBackend>,
        neighbors: Arc<NeighborsStore>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let refresh_interval = cfg.server.routes_refresh_interval();
        let parallelism = cfg.server.routes_refresh_parallelism();
        info!(?refresh_interval, parallelism, "routes store refresh interval");

        Self {
            backend,
            sources: SourcesStore::new(sources, refresh_interval, parallelism),
            neighbors,
            shutdown,
            jitter: DEFAULT_REFRESH_JITTER,
        }
    }

    /// Override the refresh jitter cap, mainly to disable it in tests.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Start the background refresh loop.
    pub fn start(self: Arc<Self>) {
        info!("starting routes store");
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                Arc::clone(&self).update();
            }
        });
    }

    /// Spawn a refresh worker for every source that is due.
    pub fn update(self: Arc<Self>) {
        for id in self.sources.source_ids_for_refresh() {
            let store = Arc::clone(&self);
            tokio::spawn(async move {
                store.safe_update_source(id).await;
            });
        }
    }

    /// Refresh one source, isolating failures into the source status.
    pub async fn safe_update_source(self: Arc<Self>, id: SourceId) {
        if !self.sources.should_refresh(&id) {
            return;
        }
        let source = match self.sources.lock_source(&id) {
            Ok(source) => source,
            Err(err) => {
                debug!(source = %id, error = %err, "could not start routes refresh");
                return;
            }
        };

        // Jitter, so a fleet of instances does not hit everything at once.
        let jitter_secs = self.jitter.as_secs();
        if jitter_secs > 0 {
            let delay = rand::thread_rng().gen_range(0..jitter_secs);
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }

        debug!(source = %source.name, "begin routes refresh");
        let store = Arc::clone(&self);
        let task_source = Arc::clone(&source);
        let outcome =
            tokio::spawn(async move { store.update_source(&task_source).await }).await;

        match outcome {
            Ok(Ok(())) => {
                if let Ok(status) = self.sources.get_status(&id) {
                    info!(
                        source = %source.name,
                        duration = ?status.last_refresh_duration,
                        "refreshed routes"
                    );
                }
            }
            Ok(Err(StoreError::Cancelled)) => {
                self.sources.release_source(&id);
            }
            Ok(Err(err)) => {
                warn!(source = %source.name, error = %err, "refreshing routes failed");
                self.sources.refresh_error(&id, &err.to_string());
            }
            Err(join_err) => {
                warn!(source = %source.name, error = %join_err, "recovering after failed routes refresh");
                self.sources
                    .refresh_error(&id, &format!("refresh crashed: {join_err}"));
            }
        }
    }

    /// Fetch the full dump of a source and index it.
    pub async fn update_source(&self, source: &Source) -> Result<(), StoreError> {
        let response = source.adapter.all_routes().await?;
        debug!(source = %source.name, "finished fetching routes dump");

        self.await_neighbors_store(&source.id).await?;
        let neighbors = self.neighbors.get_neighbors_map_at(&source.id).await?;

        let mut lookup_routes =
            routes_to_lookup_routes(RouteState::Imported, source, &neighbors, response.imported);
        lookup_routes.extend(routes_to_lookup_routes(
            RouteState::Filtered,
            source,
            &neighbors,
            response.filtered,
        ));

        debug!(
            source = %source.name,
            routes = lookup_routes.len(),
            "importing routes into store"
        );
        self.backend.set_routes(&source.id, lookup_routes).await?;
        self.sources.refresh_success(&source.id);
        Ok(())
    }

    /// Poll until the neighbors store has data for the source, or shutdown
    /// is requested.
    async fn await_neighbors_store(&self, source_id: &SourceId) -> Result<(), StoreError> {
        loop {
            if *self.shutdown.borrow() {
                return Err(StoreError::Cancelled);
            }
            if self.neighbors.is_initialized(source_id) {
                return Ok(());
            }
            tokio::time::sleep(NEIGHBORS_POLL_INTERVAL).await;
        }
    }

    pub fn source_status(&self, source_id: &SourceId) -> Result<SourceStatus, StoreError> {
        self.sources.get_status(source_id)
    }

    #[must_use]
    pub fn source_ids(&self) -> Vec<SourceId> {
        self.sources.source_ids()
    }

    /// Routes matching a prefix, across all route servers.
    pub async fn lookup_prefix(&self, prefix: &str) -> Result<Vec<LookupRoute>, StoreError> {
        self.backend.find_by_prefix(prefix).await
    }

    /// Routes announced by any neighbor of a fan-out lookup result.
    pub async fn lookup_prefix_for_neighbors(
        &self,
        neighbors: &NeighborsLookupResults,
    ) -> Result<Vec<LookupRoute>, StoreError> {
        let neighbor_ids: Vec<String> = neighbors
            .values()
            .flat_map(|list| list.iter().map(|neighbor| neighbor.id.clone()))
            .collect();
        self.backend.find_by_neighbors(&neighbor_ids).await
    }

    /// Per-source counts and states for monitoring.
    pub async fn stats(&self) -> RoutesStoreStats {
        let mut total = RoutesStats::default();
        let mut route_servers = Vec::new();

        for source_id in self.sources.source_ids() {
            let Ok(status) = self.sources.get_status(&source_id) else {
                continue;
            };
            let (imported, filtered) = match self.backend.count_routes_at(&source_id).await {
                Ok(counts) => counts,
                Err(StoreError::SourceNotFound(_)) => (0, 0),
                Err(err) => {
                    warn!(source = %source_id, error = %err, "error during routes count");
                    (0, 0)
                }
            };
            total.imported += imported;
            total.filtered += filtered;
            route_servers.push(RouteServerRoutesStats {
                name: self.sources.get_name(&source_id).unwrap_or_default(),
                routes: RoutesStats { imported, filtered },
                state: status.state.to_string(),
                updated_at: status.last_refresh,
            });
        }

        RoutesStoreStats {
            total_routes: total,
            route_servers,
        }
    }

    /// Age of the most stale source snapshot.
    #[must_use]
    pub fn cached_at(&self) -> Option<DateTime<Utc>> {
        self.sources.cached_at()
    }

    /// Earliest upcoming refresh.
    #[must_use]
    pub fn cache_ttl(&self) -> Option<DateTime<Utc>> {
        self.sources.next_refresh()
    }
}

/// Annotate plain routes for the lookup index. Routes whose neighbor is
/// missing from the snapshot are logged and skipped; `details` are cleared
/// to keep the index small.
fn routes_to_lookup_routes(
    state: RouteState,
    source: &Source,
    neighbors: &HashMap<String, Neighbor>,
    routes: Vec<Route>,
) -> Vec<LookupRoute> {
    let mut lookup_routes = Vec::with_capacity(routes.len());
    for mut route in routes {
        let Some(neighbor) = neighbors.get(&route.neighbor_id) else {
            debug!(neighbor = %route.neighbor_id, "prepare route, neighbor not found");
            continue;
        };
        route.details = serde_json::Map::new();
        lookup_routes.push(LookupRoute {
            route,
            state,
            neighbor: neighbor.clone(),
            route_server: RouteServerRef {
                id: source.id.clone(),
                name: source.name.clone(),
            },
        });
    }
    lookup_routes
}
