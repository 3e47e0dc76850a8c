//! Reference in-memory backends for the neighbors and routes stores.
//!
//! Snapshots are stored per source behind an `Arc`, so a refresh replaces a
//! whole partition atomically while readers keep their consistent copy.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::api::{LookupRoute, Neighbor, RouteState};
use crate::error::StoreError;
use crate::source::SourceId;
use crate::store::neighbors_store::NeighborsStoreBackend;
use crate::store::routes_store::RoutesStoreBackend;

/// In-memory neighbors backend.
#[derive(Default)]
pub struct InMemoryNeighborsBackend {
    neighbors: DashMap<SourceId, Arc<Vec<Neighbor>>>,
}

impl InMemoryNeighborsBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NeighborsStoreBackend for InMemoryNeighborsBackend {
    async fn set_neighbors(
        &self,
        source_id: &SourceId,
        neighbors: Vec<Neighbor>,
    ) -> Result<(), StoreError> {
        self.neighbors.insert(source_id.clone(), Arc::new(neighbors));
        Ok(())
    }

    async fn get_neighbors_at(&self, source_id: &SourceId) -> Result<Vec<Neighbor>, StoreError> {
        self.neighbors
            .get(source_id)
            .map(|entry| entry.value().as_ref().clone())
            .ok_or_else(|| StoreError::SourceNotFound(source_id.clone()))
    }

    async fn get_neighbors_map_at(
        &self,
        source_id: &SourceId,
    ) -> Result<HashMap<String, Neighbor>, StoreError> {
        let neighbors = self.get_neighbors_at(source_id).await?;
        Ok(neighbors
            .into_iter()
            .map(|neighbor| (neighbor.id.clone(), neighbor))
            .collect())
    }

    async fn get_neighbor_at(
        &self,
        source_id: &SourceId,
        neighbor_id: &str,
    ) -> Result<Neighbor, StoreError> {
        let snapshot = self
            .neighbors
            .get(source_id)
            .ok_or_else(|| StoreError::SourceNotFound(source_id.clone()))?;
        snapshot
            .iter()
            .find(|neighbor| neighbor.id == neighbor_id)
            .cloned()
            .ok_or_else(|| StoreError::NeighborNotFound(neighbor_id.to_string()))
    }

    async fn count_neighbors_at(&self, source_id: &SourceId) -> Result<usize, StoreError> {
        self.neighbors
            .get(source_id)
            .map(|entry| entry.value().len())
            .ok_or_else(|| StoreError::SourceNotFound(source_id.clone()))
    }
}

/// In-memory routes backend. Prefix lookups match by string prefix of the
/// network, so `10.0.0` finds `10.0.0.0/24` and `10.0.0.0/25`.
#[derive(Default)]
pub struct InMemoryRoutesBackend {
    routes: DashMap<SourceId, Arc<Vec<LookupRoute>>>,
}

impl InMemoryRoutesBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoutesStoreBackend for InMemoryRoutesBackend {
    async fn set_routes(
        &self,
        source_id: &SourceId,
        routes: Vec<LookupRoute>,
    ) -> Result<(), StoreError> {
        self.routes.insert(source_id.clone(), Arc::new(routes));
        Ok(())
    }

    async fn count_routes_at(&self, source_id: &SourceId) -> Result<(usize, usize), StoreError> {
        let snapshot = self
            .routes
            .get(source_id)
            .ok_or_else(|| StoreError::SourceNotFound(source_id.clone()))?;
        let imported = snapshot
            .iter()
            .filter(|route| route.state == RouteState::Imported)
            .count();
        let filtered = snapshot.len() - imported;
        Ok((imported, filtered))
    }

    async fn find_by_neighbors(
        &self,
        neighbor_ids: &[String],
    ) -> Result<Vec<LookupRoute>, StoreError> {
        let wanted: HashSet<&str> = neighbor_ids.iter().map(String::as_str).collect();
        let mut results = Vec::new();
        for entry in self.routes.iter() {
            results.extend(
                entry
                    .value()
                    .iter()
                    .filter(|route| wanted.contains(route.route.neighbor_id.as_str()))
                    .cloned(),
            );
        }
        Ok(results)
    }

    async fn find_by_prefix(&self, prefix: &str) -> Result<Vec<LookupRoute>, StoreError> {
        let mut results = Vec::new();
        for entry in self.routes.iter() {
            results.extend(
                entry
                    .value()
                    .iter()
                    .filter(|route| route.route.network.starts_with(prefix))
                    .cloned(),
            );
        }
        Ok(results)
    }
}
