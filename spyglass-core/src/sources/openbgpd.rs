//! Adapter for OpenBGPD route servers.
//!
//! Consumes structured bgpctl output served over HTTP by an
//! `openbgpd-state-server`. The state server exposes neither filtered nor
//! not-exported routes, so those queries return empty sets.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use crate::api::{
    sort_neighbors, sort_routes, BgpInfo, CacheStatus, Community, LargeCommunity, Meta, Neighbor,
    NeighborsResponse, Route, RoutesResponse,
};
use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::source::{ServerStatus, SourceAdapter, StatusResponse};
use crate::sources::http::JsonApi;

const SOURCE_VERSION: &str = "1.0";

pub struct OpenBgpd {
    config: SourceConfig,
    client: Arc<dyn JsonApi>,
}

impl OpenBgpd {
    pub fn new(config: SourceConfig, client: Arc<dyn JsonApi>) -> Self {
        Self { config, client }
    }

    /// The state server reports no snapshot time, so responses are stamped
    /// with the request time and the configured TTL.
    fn meta(&self) -> Meta {
        let now = Utc::now();
        Meta {
            version: SOURCE_VERSION.to_string(),
            cache_status: CacheStatus { cached_at: now },
            result_from_cache: false,
            ttl: now + self.config.cache_ttl(),
        }
    }

    async fn fetch_neighbors(&self) -> Result<Vec<Neighbor>, SourceError> {
        let payload = self.client.get_json("/v1/bgpd/show/neighbor").await?;
        decode_neighbors(&payload)
    }

    async fn fetch_rib(&self, path: &str) -> Result<Vec<Route>, SourceError> {
        let payload = self.client.get_json(path).await?;
        decode_routes(&payload)
    }

    fn empty_response(&self) -> RoutesResponse {
        RoutesResponse {
            meta: self.meta(),
            ..RoutesResponse::default()
        }
    }
}

#[async_trait]
impl SourceAdapter for OpenBgpd {
    async fn status(&self) -> Result<StatusResponse, SourceError> {
        let payload = self.client.get_json("/v1/status").await?;
        let version = payload
            .pointer("/status/version")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(StatusResponse {
            meta: self.meta(),
            status: ServerStatus {
                backend: "openbgpd".to_string(),
                version,
                message: None,
            },
        })
    }

    async fn neighbors(&self) -> Result<NeighborsResponse, SourceError> {
        let neighbors = self.fetch_neighbors().await?;
        Ok(NeighborsResponse {
            meta: self.meta(),
            neighbors,
        })
    }

    async fn routes(&self, neighbor_id: &str) -> Result<RoutesResponse, SourceError> {
        self.routes_received(neighbor_id).await
    }

    async fn routes_received(&self, neighbor_id: &str) -> Result<RoutesResponse, SourceError> {
        let neighbors = self.fetch_neighbors().await?;
        if !neighbors.iter().any(|n| n.id == neighbor_id) {
            return Err(SourceError::InvalidNeighbor(neighbor_id.to_string()));
        }

        let imported = self
            .fetch_rib(&format!("/v1/bgpd/show/rib/in/neighbor/{neighbor_id}"))
            .await?;
        Ok(RoutesResponse {
            meta: self.meta(),
            imported,
            filtered: Vec::new(),
            not_exported: Vec::new(),
        })
    }

    async fn routes_filtered(&self, _neighbor_id: &str) -> Result<RoutesResponse, SourceError> {
        Ok(self.empty_response())
    }

    async fn routes_not_exported(&self, _neighbor_id: &str) -> Result<RoutesResponse, SourceError> {
        Ok(self.empty_response())
    }

    async fn all_routes(&self) -> Result<RoutesResponse, SourceError> {
        let imported = self.fetch_rib("/v1/bgpd/show/rib").await?;
        Ok(RoutesResponse {
            meta: self.meta(),
            imported,
            filtered: Vec::new(),
            not_exported: Vec::new(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NeighborsPayload {
    neighbors: Vec<NeighborPayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NeighborPayload {
    remote_as: u32,
    remote_addr: String,
    description: String,
    state: String,
    stats: NeighborStats,
    #[serde(flatten)]
    details: serde_json::Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NeighborStats {
    prefixes: PrefixStats,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PrefixStats {
    received: u64,
}

/// Collapse the BGP FSM state into the three states the UI knows.
fn session_state(raw: &str) -> &'static str {
    match raw.to_lowercase().as_str() {
        "established" => "up",
        "active" | "connect" | "opensent" | "openconfirm" => "start",
        _ => "down",
    }
}

fn decode_neighbors(payload: &Value) -> Result<Vec<Neighbor>, SourceError> {
    let decoded: NeighborsPayload =
        serde_json::from_value(payload.clone()).map_err(protocol_error)?;

    let mut neighbors: Vec<Neighbor> = decoded
        .neighbors
        .into_iter()
        .map(|n| Neighbor {
            id: n.remote_addr.clone(),
            address: n.remote_addr,
            asn: n.remote_as,
            state: session_state(&n.state).to_string(),
            description: n.description,
            routes_received: n.stats.prefixes.received,
            routes_accepted: n.stats.prefixes.received,
            routes_filtered: 0,
            session_count: 1,
            details: n.details,
        })
        .collect();
    sort_neighbors(&mut neighbors);
    Ok(neighbors)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RibPayload {
    rib: Vec<RibEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RibEntry {
    prefix: String,
    exit_nexthop: String,
    true_nexthop: String,
    aspath: String,
    origin: String,
    communities: Vec<String>,
    large_communities: Vec<String>,
    localpref: u32,
    metric: u32,
    neighbor: RibNeighbor,
    #[serde(flatten)]
    details: serde_json::Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RibNeighbor {
    remote_addr: String,
}

fn decode_routes(payload: &Value) -> Result<Vec<Route>, SourceError> {
    let decoded: RibPayload = serde_json::from_value(payload.clone()).map_err(protocol_error)?;

    let mut routes: Vec<Route> = decoded
        .rib
        .into_iter()
        .map(|entry| {
            let learnt_from = if entry.true_nexthop.is_empty()
                || entry.true_nexthop == entry.exit_nexthop
            {
                None
            } else {
                Some(entry.true_nexthop)
            };
            Route {
                neighbor_id: entry.neighbor.remote_addr,
                network: entry.prefix,
                gateway: entry.exit_nexthop,
                metric: entry.metric,
                bgp: BgpInfo {
                    origin: entry.origin,
                    as_path: decode_as_path(&entry.aspath),
                    next_hop: String::new(),
                    communities: decode_communities(&entry.communities),
                    ext_communities: Vec::new(),
                    large_communities: decode_large_communities(&entry.large_communities),
                    local_pref: entry.localpref,
                    med: entry.metric,
                },
                learnt_from,
                details: entry.details,
            }
        })
        .collect();
    sort_routes(&mut routes);
    Ok(routes)
}

fn decode_as_path(raw: &str) -> Vec<u32> {
    raw.split_whitespace()
        .filter_map(|asn| asn.parse().ok())
        .collect()
}

fn decode_communities(raw: &[String]) -> Vec<Community> {
    raw.iter()
        .filter_map(|community| {
            let mut parts = community.split(':');
            let a = parts.next()?.parse().ok()?;
            let b = parts.next()?.parse().ok()?;
            Some([a, b])
        })
        .collect()
}

fn decode_large_communities(raw: &[String]) -> Vec<LargeCommunity> {
    raw.iter()
        .filter_map(|community| {
            let mut parts = community.split(':');
            let a = parts.next()?.parse().ok()?;
            let b = parts.next()?.parse().ok()?;
            let c = parts.next()?.parse().ok()?;
            Some([a, b, c])
        })
        .collect()
}

fn protocol_error(err: serde_json::Error) -> SourceError {
    SourceError::Protocol(err.to_string())
}
