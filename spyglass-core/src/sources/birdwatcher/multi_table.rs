//! Adapter for multi-table bird setups.
//!
//! Every peer has its own table; a pipe protocol feeds accepted routes into
//! the master table. Filtered routes therefore exist in two stages: rejected
//! by the peer table import filter, and rejected by the master pipe.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::api::{sort_routes, Meta, NeighborsResponse, Route, RoutesResponse};
use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::source::{SourceAdapter, StatusResponse};
use crate::sources::http::JsonApi;

use super::parse::{
    bgp_protocols, is_protocol_up, parse_meta, parse_neighbors, parse_routes, pipe_protocols,
    ProtocolInfo,
};
use super::{dedup_required, filter_routes_by_peer_or_learnt_from, BirdwatcherCore};

pub struct MultiTableBirdwatcher {
    core: BirdwatcherCore,
}

impl MultiTableBirdwatcher {
    pub fn new(config: SourceConfig, client: Arc<dyn JsonApi>) -> Self {
        Self {
            core: BirdwatcherCore::new(config, client),
        }
    }

    /// Name of the pipe feeding `table` into the master table, derived by
    /// swapping the peer-table prefix for the pipe-protocol prefix.
    fn master_pipe_name(&self, table: &str) -> Option<String> {
        table
            .strip_prefix(&self.core.config.peer_table_prefix)
            .map(|rest| format!("{}{}", self.core.config.pipe_protocol_prefix, rest))
    }

    fn require_protocol<'a>(
        protocols: &'a HashMap<String, ProtocolInfo>,
        neighbor_id: &str,
    ) -> Result<&'a ProtocolInfo, SourceError> {
        protocols
            .get(neighbor_id)
            .ok_or_else(|| SourceError::InvalidNeighbor(neighbor_id.to_string()))
    }

    async fn fetch_received_routes(
        &self,
        neighbor_id: &str,
    ) -> Result<(Meta, Vec<Route>), SourceError> {
        let (_, protocols) = self.core.fetch_protocols().await?;
        let protocol = Self::require_protocol(&protocols, neighbor_id)?;

        let path = format!("/routes/peer/{}", protocol.neighbor_address);
        let payload = self.core.client.get_json(&path).await?;
        let meta = parse_meta(&payload)?;
        let received = parse_routes(&payload)?;
        Ok((meta, received))
    }

    async fn fetch_filtered_routes(
        &self,
        neighbor_id: &str,
    ) -> Result<(Meta, Vec<Route>), SourceError> {
        let (_, protocols) = self.core.fetch_protocols().await?;
        let protocol = Self::require_protocol(&protocols, neighbor_id)?;

        // Stage 1: rejected by the peer table import filter.
        let payload = self
            .core
            .client
            .get_json(&format!("/routes/filtered/{neighbor_id}"))
            .await?;
        let meta = parse_meta(&payload)?;
        let mut filtered = parse_routes(&payload)?;

        // Stage 2: rejected by the pipe towards the master table.
        let Some(pipe) = self.master_pipe_name(&protocol.table) else {
            return Ok((meta, filtered));
        };
        let payload = self
            .core
            .client
            .get_json(&format!(
                "/routes/pipe/filtered/?table={}&pipe={}",
                protocol.table, pipe
            ))
            .await?;
        filtered.extend(parse_routes(&payload)?);
        sort_routes(&mut filtered);

        Ok((meta, filtered))
    }

    async fn fetch_not_exported_routes(
        &self,
        neighbor_id: &str,
    ) -> Result<(Meta, Vec<Route>), SourceError> {
        let (_, protocols) = self.core.fetch_protocols().await?;
        let protocol = Self::require_protocol(&protocols, neighbor_id)?;

        let pipe = self.master_pipe_name(&protocol.table).unwrap_or_default();
        let payload = self
            .core
            .client
            .get_json(&format!("/routes/noexport/{pipe}"))
            .await?;
        let meta = parse_meta(&payload)?;
        let not_exported = parse_routes(&payload)?;
        Ok((meta, not_exported))
    }

    /// Fetch received and filtered routes with deduplication applied.
    ///
    /// Not-exported routes can be very many, so they are left to a separate
    /// on-demand request. Concurrent calls for the same neighbor coalesce
    /// into one upstream fetch.
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

        let (meta, received) = self.fetch_received_routes(neighbor_id).await?;
        let (_, filtered) = self.fetch_filtered_routes(neighbor_id).await?;
        let (imported, filtered) = dedup_required(received, filtered);

        let response = Arc::new(RoutesResponse {
            meta,
            imported,
            filtered,
            not_exported: Vec::new(),
        });
        self.core
            .routes_required_cache
            .set(neighbor_id, Arc::clone(&response));
        Ok(response)
    }

    /// Determine, per neighbor, how many of its accepted routes the master
    /// pipe filtered away again.
    async fn pipe_filtered_counts(
        &self,
        protocols: &HashMap<String, ProtocolInfo>,
    ) -> Result<HashMap<String, u64>, SourceError> {
        let pipes = pipe_protocols(protocols);

        // table -> neighbor address -> protocol
        let mut tree: HashMap<&str, HashMap<&str, &ProtocolInfo>> = HashMap::new();
        for (_, protocol) in bgp_protocols(protocols) {
            tree.entry(protocol.table.as_str())
                .or_default()
                .insert(protocol.neighbor_address.as_str(), protocol);
        }

        let mut filtered: HashMap<String, u64> = HashMap::new();
        for (table, peers) in &tree {
            let mut all_routes_imported: u64 = 0;
            let mut pipe_routes_imported: u64 = 0;

            for protocol in peers.values() {
                if !is_protocol_up(&protocol.state) {
                    continue;
                }
                all_routes_imported += protocol.routes.imported;

                // Taken from the pipe of the table, so the last peer of a
                // shared table wins.
                match self
                    .master_pipe_name(table)
                    .and_then(|name| pipes.get(name.as_str()))
                {
                    Some(pipe) => pipe_routes_imported = pipe.routes.imported,
                    None => continue,
                }
            }

            // Nothing imported, nothing to filter.
            if all_routes_imported == 0 {
                continue;
            }
            // The pipe passed everything through.
            if pipe_routes_imported == all_routes_imported {
                continue;
            }

            if peers.len() == 1 {
                for protocol in peers.values() {
                    filtered.insert(
                        protocol.protocol.clone(),
                        all_routes_imported - pipe_routes_imported,
                    );
                }
            } else if pipe_routes_imported == 0 {
                // The pipe filtered every route of every peer, so the counts
                // are already known without further queries.
                for protocol in peers.values() {
                    if !is_protocol_up(&protocol.state) {
                        continue;
                    }
                    filtered.insert(protocol.protocol.clone(), protocol.routes.imported);
                }
            } else {
                // The pipe filtered only part of the routes; ask the shim
                // for the per-peer count.
                for (address, protocol) in peers {
                    let Some(pipe) = self.master_pipe_name(&protocol.table) else {
                        continue;
                    };
                    let payload = self
                        .core
                        .client
                        .get_json(&format!(
                            "/routes/pipe/filtered/count?table={}&pipe={}&address={}",
                            protocol.table, pipe, address
                        ))
                        .await?;
                    if let Some(count) = payload.get("routes").and_then(Value::as_u64) {
                        filtered.insert(protocol.protocol.clone(), count);
                    }
                }
            }
        }

        Ok(filtered)
    }
}

#[async_trait]
impl SourceAdapter for MultiTableBirdwatcher {
    async fn status(&self) -> Result<StatusResponse, SourceError> {
        self.core.fetch_status().await
    }

    async fn neighbors(&self) -> Result<NeighborsResponse, SourceError> {
        if let Some(cached) = self.core.neighbors_cache.get() {
            return Ok((*cached).clone());
        }

        let (meta, protocols) = self.core.fetch_protocols().await?;
        let mut neighbors = parse_neighbors(&protocols);

        let filtered_counts = self.pipe_filtered_counts(&protocols).await?;
        for neighbor in &mut neighbors {
            if let Some(&count) = filtered_counts.get(&neighbor.id) {
                neighbor.routes_accepted = neighbor.routes_accepted.saturating_sub(count);
                neighbor.routes_filtered += count;
            }
        }

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
        let (_, protocols) = self.core.fetch_protocols().await?;

        let payload = self
            .core
            .client
            .get_json(&format!("/routes/table/{}", self.core.config.main_table))
            .await?;
        let meta = parse_meta(&payload)?;
        let mut imported = parse_routes(&payload)?;
        sort_routes(&mut imported);

        // Collect the filtered routes of every peer; a peer that fails to
        // answer is skipped rather than failing the whole dump.
        let mut filtered = Vec::new();
        for (protocol_id, protocol) in bgp_protocols(&protocols) {
            let peer = protocol.neighbor_address.clone();
            let learnt_from = protocol.learnt_from.clone().unwrap_or_else(|| peer.clone());

            let Ok((_, peer_filtered)) = self.fetch_filtered_routes(protocol_id).await else {
                continue;
            };
            filtered.extend(filter_routes_by_peer_or_learnt_from(
                peer_filtered,
                &peer,
                &learnt_from,
            ));
        }

        Ok(RoutesResponse {
            meta,
            imported,
            filtered,
            not_exported: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::CannedClient;
    use super::*;
    use crate::source::SourceId;
    use serde_json::json;

    fn config() -> SourceConfig {
        SourceConfig {
            id: SourceId::try_from("rs1").unwrap(),
            name: "rs1.example.net".to_string(),
            backend: crate::config::SourceBackend::BirdwatcherMultiTable,
            host: String::new(),
            insecure: false,
            main_table: "master4".to_string(),
            peer_table_prefix: "T".to_string(),
            pipe_protocol_prefix: "M".to_string(),
            routes_cache_size: 16,
            routes_cache_disabled: false,
            neighbors_cache_disabled: false,
            cache_ttl_seconds: 300,
        }
    }

    fn protocols_payload() -> serde_json::Value {
        json!({
            "api": {"version": "1.2.1"},
            "protocols": {
                "R64501_1": {
                    "bird_protocol": "BGP",
                    "neighbor_address": "203.0.113.1",
                    "neighbor_as": 64501,
                    "description": "Example IXP",
                    "table": "T64501_1",
                    "state": "up",
                    "routes": {"imported": 2, "filtered": 0}
                }
            }
        })
    }

    fn route_json(network: &str, gateway: &str) -> serde_json::Value {
        json!({
            "network": network,
            "gateway": gateway,
            "from_protocol": "R64501_1",
            "bgp": {"as_path": [64501]}
        })
    }

    fn adapter(client: Arc<CannedClient>) -> MultiTableBirdwatcher {
        MultiTableBirdwatcher::new(config(), client)
    }

    fn required_routes_client() -> CannedClient {
        CannedClient::with(vec![
            ("/protocols", protocols_payload()),
            (
                "/routes/peer/203.0.113.1",
                json!({
                    "api": {"version": "1.2.1"},
                    "routes": [route_json("10.0.0.0/24", "P")]
                }),
            ),
            (
                "/routes/filtered/R64501_1",
                json!({
                    "api": {"version": "1.2.1"},
                    "routes": [route_json("10.0.0.0/24", "P")]
                }),
            ),
            (
                "/routes/pipe/filtered/?table=T64501_1&pipe=M64501_1",
                json!({
                    "api": {"version": "1.2.1"},
                    "routes": [route_json("10.0.0.0/24", "Q")]
                }),
            ),
        ])
    }

    #[tokio::test]
    async fn required_routes_are_deduplicated() {
        let client = Arc::new(required_routes_client());
        let adapter = adapter(Arc::clone(&client));

        let response = adapter.fetch_required_routes("R64501_1").await.unwrap();

        // The received announcement also appears filtered with the same
        // gateway; the stage-2 route with a foreign gateway is discarded.
        assert!(response.imported.is_empty());
        assert_eq!(response.filtered.len(), 1);
        assert_eq!(response.filtered[0].gateway, "P");
    }

    #[tokio::test]
    async fn concurrent_fetches_coalesce_into_one_upstream_call() {
        let client = Arc::new(required_routes_client());
        let adapter = Arc::new(adapter(Arc::clone(&client)));

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let adapter = Arc::clone(&adapter);
            tasks.push(tokio::spawn(async move {
                adapter.fetch_required_routes("R64501_1").await.unwrap()
            }));
        }

        let mut responses = Vec::new();
        for task in tasks {
            responses.push(task.await.unwrap());
        }

        assert_eq!(client.requests_for("/routes/peer/203.0.113.1"), 1);
        for response in &responses {
            assert_eq!(response.filtered.len(), responses[0].filtered.len());
        }
    }

    #[tokio::test]
    async fn unknown_neighbor_is_invalid() {
        let client = Arc::new(CannedClient::with(vec![(
            "/protocols",
            protocols_payload(),
        )]));
        let adapter = adapter(client);

        assert!(matches!(
            adapter.fetch_required_routes("R99999_9").await,
            Err(SourceError::InvalidNeighbor(_))
        ));
    }

    #[tokio::test]
    async fn neighbors_account_for_pipe_filtering() {
        let client = Arc::new(CannedClient::with(vec![(
            "/protocols",
            json!({
                "api": {"version": "1.2.1"},
                "protocols": {
                    "R64501_1": {
                        "bird_protocol": "BGP",
                        "neighbor_address": "203.0.113.1",
                        "neighbor_as": 64501,
                        "table": "T64501_1",
                        "state": "up",
                        "routes": {"imported": 10, "filtered": 1}
                    },
                    "M64501_1": {
                        "bird_protocol": "Pipe",
                        "table": "master4",
                        "routes": {"imported": 6}
                    }
                }
            }),
        )]));
        let adapter = adapter(client);

        let response = adapter.neighbors().await.unwrap();
        assert_eq!(response.neighbors.len(), 1);
        // 10 imported into the peer table, 6 made it through the pipe.
        assert_eq!(response.neighbors[0].routes_accepted, 6);
        assert_eq!(response.neighbors[0].routes_filtered, 5);
    }

    #[tokio::test]
    async fn neighbors_response_is_cached() {
        let client = Arc::new(CannedClient::with(vec![(
            "/protocols",
            protocols_payload(),
        )]));
        let adapter = adapter(Arc::clone(&client));

        adapter.neighbors().await.unwrap();
        adapter.neighbors().await.unwrap();
        assert_eq!(client.requests_for("/protocols"), 1);
    }
}
