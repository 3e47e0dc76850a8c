//! Adapter for single-table bird setups.
//!
//! All peers import into one shared table, so routes are queried per
//! protocol and there is no pipe stage.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::api::{sort_routes, Meta, NeighborsResponse, Route, RoutesResponse};
use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::source::{SourceAdapter, StatusResponse};
use crate::sources::http::JsonApi;

use super::parse::{parse_meta, parse_neighbors, parse_routes, parse_routes_data, ProtocolInfo};
use super::BirdwatcherCore;

pub struct SingleTableBirdwatcher {
    core: BirdwatcherCore,
}

impl SingleTableBirdwatcher {
    pub fn new(config: SourceConfig, client: Arc<dyn JsonApi>) -> Self {
        Self {
            core: BirdwatcherCore::new(config, client),
        }
    }

    fn require_protocol(
        protocols: &HashMap<String, ProtocolInfo>,
        neighbor_id: &str,
    ) -> Result<(), SourceError> {
        if protocols.contains_key(neighbor_id) {
            Ok(())
        } else {
            Err(SourceError::InvalidNeighbor(neighbor_id.to_string()))
        }
    }

    async fn fetch_received_routes(
        &self,
        neighbor_id: &str,
    ) -> Result<(Meta, Vec<Route>), SourceError> {
        let (_, protocols) = self.core.fetch_protocols().await?;
        Self::require_protocol(&protocols, neighbor_id)?;

        let payload = self
            .core
            .client
            .get_json(&format!("/routes/protocol/{neighbor_id}"))
            .await?;
        let meta = parse_meta(&payload)?;
        let received = parse_routes(&payload)?;
        Ok((meta, received))
    }

    async fn fetch_filtered_routes(
        &self,
        neighbor_id: &str,
    ) -> Result<(Meta, Vec<Route>), SourceError> {
        let (_, protocols) = self.core.fetch_protocols().await?;
        Self::require_protocol(&protocols, neighbor_id)?;

        let payload = self
            .core
            .client
            .get_json(&format!("/routes/filtered/{neighbor_id}"))
            .await?;
        let meta = parse_meta(&payload)?;
        let filtered = parse_routes(&payload)?;
        Ok((meta, filtered))
    }

    async fn fetch_not_exported_routes(
        &self,
        neighbor_id: &str,
    ) -> Result<(Meta, Vec<Route>), SourceError> {
        let (_, protocols) = self.core.fetch_protocols().await?;
        Self::require_protocol(&protocols, neighbor_id)?;

        let payload = self
            .core
            .client
            .get_json(&format!("/routes/noexport/{neighbor_id}"))
            .await?;
        let meta = parse_meta(&payload)?;
        let not_exported = parse_routes(&payload)?;
        Ok((meta, not_exported))
    }

    async fn fetch_required_routes(
        &self,
        neighbor_id: &str,
    ) -> Result<Arc<RoutesResponse>, SourceError> {
        let _guard = self
            .core
            .fetch_lock
            .acquire(format!("required:{neighbor_id}"))
            .await;

        if let Some(cached) = self.core.routes_required_cache.get(neighbor_id) {
            return Ok(cached);
        }

        // With a single shared table the filtered routes are already
        // queried per protocol, so received and filtered need no
        // deduplication against each other.
        let (meta, received) = self.fetch_received_routes(neighbor_id).await?;
        let (_, filtered) = self.fetch_filtered_routes(neighbor_id).await?;

        let response = Arc::new(RoutesResponse {
            meta,
            imported: received,
            filtered,
            not_exported: Vec::new(),
        });
        self.core
            .routes_required_cache
            .set(neighbor_id, Arc::clone(&response));
        Ok(response)
    }
}

#[async_trait]
impl SourceAdapter for SingleTableBirdwatcher {
    async fn status(&self) -> Result<StatusResponse, SourceError> {
        self.core.fetch_status().await
    }

    async fn neighbors(&self) -> Result<NeighborsResponse, SourceError> {
        if let Some(cached) = self.core.neighbors_cache.get() {
            return Ok((*cached).clone());
        }

        let (meta, protocols) = self.core.fetch_protocols().await?;
        let neighbors = parse_neighbors(&protocols);

        let response = Arc::new(NeighborsResponse { meta, neighbors });
        self.core.neighbors_cache.set(Arc::clone(&response));
        Ok((*response).clone())
    }

    async fn routes(&self, neighbor_id: &str) -> Result<RoutesResponse, SourceError> {
        let required = self.fetch_required_routes(neighbor_id).await?;
        let (_, not_exported) = self.fetch_not_exported_routes(neighbor_id).await?;

        Ok(RoutesResponse {
            meta: required.meta.clone(),
            imported: required.imported.clone(),
            filtered: required.filtered.clone(),
            not_exported,
        })
    }

    async fn routes_received(&self, neighbor_id: &str) -> Result<RoutesResponse, SourceError> {
        let required = match self.core.routes_required_cache.get(neighbor_id) {
            Some(cached) => cached,
            None => self.fetch_required_routes(neighbor_id).await?,
        };
        Ok(RoutesResponse {
            meta: required.meta.clone(),
            imported: required.imported.clone(),
            filtered: Vec::new(),
            not_exported: Vec::new(),
        })
    }

    async fn routes_filtered(&self, neighbor_id: &str) -> Result<RoutesResponse, SourceError> {
        let required = match self.core.routes_required_cache.get(neighbor_id) {
            Some(cached) => cached,
            None => self.fetch_required_routes(neighbor_id).await?,
        };
        Ok(RoutesResponse {
            meta: required.meta.clone(),
            imported: Vec::new(),
            filtered: required.filtered.clone(),
            not_exported: Vec::new(),
        })
    }

    async fn routes_not_exported(&self, neighbor_id: &str) -> Result<RoutesResponse, SourceError> {
        let _guard = self
            .core
            .fetch_lock
            .acquire(format!("noexport:{neighbor_id}"))
            .await;

        if let Some(cached) = self.core.routes_not_exported_cache.get(neighbor_id) {
            return Ok((*cached).clone());
        }

        let (meta, not_exported) = self.fetch_not_exported_routes(neighbor_id).await?;
        let response = Arc::new(RoutesResponse {
            meta,
            imported: Vec::new(),
            filtered: Vec::new(),
            not_exported,
        });
        self.core
            .routes_not_exported_cache
            .set(neighbor_id, Arc::clone(&response));
        Ok((*response).clone())
    }

    async fn all_routes(&self) -> Result<RoutesResponse, SourceError> {
        let payload = self.core.client.get_json("/routes/dump").await?;
        let meta = parse_meta(&payload)?;

        let imported_raw = payload
            .get("imported")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| SourceError::Protocol("missing imported routes".to_string()))?;
        let filtered_raw = payload
            .get("filtered")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| SourceError::Protocol("missing filtered routes".to_string()))?;

        let mut imported = parse_routes_data(imported_raw)?;
        let mut filtered = parse_routes_data(filtered_raw)?;
        sort_routes(&mut imported);
        sort_routes(&mut filtered);

        Ok(RoutesResponse {
            meta,
            imported,
            filtered,
            not_exported: Vec::new(),
        })
    }
}
