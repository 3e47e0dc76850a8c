//! Periodically pulls neighbors from every source into a queryable backend.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::api::{
    Neighbor, NeighborFilter, NeighborsLookupResults, NeighborsStoreStats,
    RouteServerNeighborsStats,
};
use crate::config::Config;
use crate::error::StoreError;
use crate::source::{Source, SourceId};
use crate::store::sources_store::{SourceStatus, SourcesStore};
use crate::store::DEFAULT_REFRESH_JITTER;

/// Queries like `AS64501` address neighbors by their AS number.
static AS_LOOKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^AS(\d+)").expect("AS lookup pattern"));

/// Storage behind the neighbors store. May be an in-memory map or something
/// persistent; must be safe for concurrent readers and one writer per
/// source.
#[async_trait]
pub trait NeighborsStoreBackend: Send + Sync {
    /// Replace all neighbors of a source atomically.
    async fn set_neighbors(
        &self,
        source_id: &SourceId,
        neighbors: Vec<Neighbor>,
    ) -> Result<(), StoreError>;

    async fn get_neighbors_at(&self, source_id: &SourceId) -> Result<Vec<Neighbor>, StoreError>;

    async fn get_neighbors_map_at(
        &self,
        source_id: &SourceId,
    ) -> Result<HashMap<String, Neighbor>, StoreError>;

    async fn get_neighbor_at(
        &self,
        source_id: &SourceId,
        neighbor_id: &str,
    ) -> Result<Neighbor, StoreError>;

    async fn count_neighbors_at(&self, source_id: &SourceId) -> Result<usize, StoreError>;
}

/// Queryable store of the neighbors of all sources.
pub struct NeighborsStore {
    backend: Arc<dyn NeighborsStoreBackend>,
    sources: SourcesStore,
    force_neighbor_refresh: bool,
    jitter: Duration,
}

impl NeighborsStore {
    #[must_use]
    pub fn new(
        cfg: &Config,
        sources: Vec<Arc<Source>>,
        backend: Arc<dyn NeighborsStoreBackend>,
    ) -> Self {
        let refresh_interval = cfg.server.neighbors_refresh_interval();
        info!(?refresh_interval, "neighbors store refresh interval");

        // Neighbor refreshes are cheap; no cross-source parallelism bound.
        let parallelism = sources.len().max(1);
        Self {
            backend,
            sources: SourcesStore::new(sources, refresh_interval, parallelism),
            force_neighbor_refresh: cfg.server.enable_neighbors_status_refresh,
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
        info!("starting neighbors store");
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                Arc::clone(&self).update();
            }
        });
    }

    /// Spawn a refresh worker for every source; workers that find nothing
    /// to do return immediately.
    pub fn update(self: Arc<Self>) {
        for id in self.sources.source_ids() {
            let store = Arc::clone(&self);
            tokio::spawn(async move {
                store.safe_update_source(id).await;
            });
        }
    }

    /// Refresh one source, isolating failures: errors and panics end up in
    /// the source status, never in the caller.
    pub async fn safe_update_source(self: Arc<Self>, id: SourceId) {
        if !self.sources.should_refresh(&id) {
            return;
        }
        let source = match self.sources.lock_source(&id) {
            Ok(source) => source,
            Err(err) => {
                debug!(source = %id, error = %err, "could not start neighbors refresh");
                return;
            }
        };

        // Jitter, so a fleet of instances does not hit everything at once.
        let jitter_secs = self.jitter.as_secs();
        if jitter_secs > 0 {
            let delay = rand::thread_rng().gen_range(0..jitter_secs);
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }

        let store = Arc::clone(&self);
        let task_source = Arc::clone(&source);
        let outcome =
            tokio::spawn(async move { store.update_source(&task_source).await }).await;

        match outcome {
            Ok(Ok(())) => {
                debug!(source = %source.name, "refreshed neighbors");
            }
            Ok(Err(StoreError::Cancelled)) => {
                self.sources.release_source(&id);
            }
            Ok(Err(err)) => {
                warn!(source = %source.name, error = %err, "refreshing neighbors failed");
                self.sources.refresh_error(&id, &err.to_string());
            }
            Err(join_err) => {
                warn!(source = %source.name, error = %join_err, "recovering after failed neighbors refresh");
                self.sources
                    .refresh_error(&id, &format!("refresh crashed: {join_err}"));
            }
        }
    }

    /// Pull neighbors from the adapter and replace the backend snapshot.
    pub async fn update_source(&self, source: &Source) -> Result<(), StoreError> {
        let response = source.adapter.neighbors().await?;
        self.backend
            .set_neighbors(&source.id, response.neighbors)
            .await?;
        self.sources.refresh_success(&source.id);
        Ok(())
    }

    pub fn source_status(&self, source_id: &SourceId) -> Result<SourceStatus, StoreError> {
        self.sources.get_status(source_id)
    }

    #[must_use]
    pub fn source_ids(&self) -> Vec<SourceId> {
        self.sources.source_ids()
    }

    #[must_use]
    pub fn is_initialized(&self, source_id: &SourceId) -> bool {
        self.sources.is_initialized(source_id)
    }

    /// All neighbors of a source. With forced refresh enabled this hits the
    /// adapter synchronously first, and its errors propagate to the caller.
    pub async fn get_neighbors_at(
        &self,
        source_id: &SourceId,
    ) -> Result<Vec<Neighbor>, StoreError> {
        if self.force_neighbor_refresh {
            let source = self
                .sources
                .get(source_id)
                .ok_or_else(|| StoreError::SourceNotFound(source_id.clone()))?;
            self.update_source(&source).await?;
        }
        self.backend.get_neighbors_at(source_id).await
    }

    pub async fn get_neighbors_map_at(
        &self,
        source_id: &SourceId,
    ) -> Result<HashMap<String, Neighbor>, StoreError> {
        self.backend.get_neighbors_map_at(source_id).await
    }

    pub async fn get_neighbor_at(
        &self,
        source_id: &SourceId,
        neighbor_id: &str,
    ) -> Result<Neighbor, StoreError> {
        self.backend.get_neighbor_at(source_id, neighbor_id).await
    }

    /// Neighbors of one source matching a free-text query: either by AS
    /// number (`AS64501`) or by case-insensitive description substring.
    pub async fn lookup_neighbors_at(
        &self,
        source_id: &SourceId,
        query: &str,
    ) -> Result<Vec<Neighbor>, StoreError> {
        let neighbors = self.backend.get_neighbors_at(source_id).await?;

        let asn: Option<u32> = AS_LOOKUP
            .captures(query)
            .and_then(|captures| captures[1].parse().ok());
        let query_lower = query.to_lowercase();

        Ok(neighbors
            .into_iter()
            .filter(|neighbor| match asn {
                Some(asn) if neighbor.asn == asn => true,
                _ => neighbor.description.to_lowercase().contains(&query_lower),
            })
            .collect())
    }

    /// Fan a lookup out across all sources. Sources that fail (e.g. not
    /// yet initialized) are skipped.
    pub async fn lookup_neighbors(&self, query: &str) -> NeighborsLookupResults {
        let mut results = NeighborsLookupResults::new();
        for source_id in self.sources.source_ids() {
            match self.lookup_neighbors_at(&source_id, query).await {
                Ok(neighbors) => {
                    results.insert(source_id, neighbors);
                }
                Err(err) => {
                    debug!(source = %source_id, query, error = %err, "neighbor lookup skipped source");
                }
            }
        }
        results
    }

    /// Neighbors of one source matching a structured filter.
    pub async fn filter_neighbors_at(
        &self,
        source_id: &SourceId,
        filter: &NeighborFilter,
    ) -> Result<Vec<Neighbor>, StoreError> {
        let neighbors = self.backend.get_neighbors_at(source_id).await?;
        Ok(neighbors
            .into_iter()
            .filter(|neighbor| filter.matches(neighbor))
            .collect())
    }

    /// Neighbors matching a structured filter across all sources.
    pub async fn filter_neighbors(&self, filter: &NeighborFilter) -> Vec<Neighbor> {
        let mut results = Vec::new();
        for source_id in self.sources.source_ids() {
            match self.filter_neighbors_at(&source_id, filter).await {
                Ok(mut neighbors) => results.append(&mut neighbors),
                Err(err) => {
                    debug!(source = %source_id, error = %err, "neighbor filter skipped source");
                }
            }
        }
        results
    }

    /// Per-source counts and states for monitoring.
    pub async fn stats(&self) -> NeighborsStoreStats {
        let mut total_neighbors = 0;
        let mut route_servers = Vec::new();

        for source_id in self.sources.source_ids() {
            let Ok(status) = self.sources.get_status(&source_id) else {
                continue;
            };
            let neighbors = match self.backend.count_neighbors_at(&source_id).await {
                Ok(count) => count,
                Err(StoreError::SourceNotFound(_)) => 0,
                Err(err) => {
                    warn!(source = %source_id, error = %err, "error during neighbor count");
                    0
                }
            };
            total_neighbors += neighbors;
            route_servers.push(RouteServerNeighborsStats {
                name: self.sources.get_name(&source_id).unwrap_or_default(),
                state: status.state.to_string(),
                neighbors,
                updated_at: status.last_refresh,
            });
        }

        NeighborsStoreStats {
            total_neighbors,
            route_servers,
        }
    }

    /// Last refresh time of one source.
    #[must_use]
    pub fn source_cached_at(&self, source_id: &SourceId) -> Option<DateTime<Utc>> {
        self.sources
            .get_status(source_id)
            .ok()
            .and_then(|status| status.last_refresh)
    }

    /// Next refresh time of one source.
    #[must_use]
    pub fn source_cache_ttl(&self, source_id: &SourceId) -> Option<DateTime<Utc>> {
        self.sources.next_refresh_at(source_id)
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
