//! Typed decoding of birdwatcher JSON payloads.
//!
//! Upstream responses are loosely typed nested maps; everything is parsed
//! into typed records here, once, at the adapter boundary. Fields we do not
//! model end up in the opaque `details` maps.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::api::{sort_neighbors, BgpInfo, CacheStatus, Meta, Neighbor, Route};
use crate::error::SourceError;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CacheStatusPayload {
    cached_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiPayload {
    version: String,
    result_from_cache: bool,
    cache_status: CacheStatusPayload,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MetaEnvelope {
    api: ApiPayload,
    ttl: Option<DateTime<Utc>>,
}

/// Extract the API status envelope present on every birdwatcher response.
pub(crate) fn parse_meta(payload: &Value) -> Result<Meta, SourceError> {
    let envelope: MetaEnvelope =
        serde_json::from_value(payload.clone()).map_err(protocol_error)?;
    Ok(Meta {
        version: envelope.api.version,
        cache_status: CacheStatus {
            cached_at: envelope.api.cache_status.cached_at.unwrap_or_else(Utc::now),
        },
        result_from_cache: envelope.api.result_from_cache,
        ttl: envelope.ttl.unwrap_or_else(Utc::now),
    })
}

/// One bird protocol as reported by `/protocols`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ProtocolInfo {
    pub bird_protocol: String,
    /// Protocol identifier; backfilled from the map key when absent.
    pub protocol: String,
    pub neighbor_address: String,
    pub neighbor_as: u32,
    pub description: String,
    pub table: String,
    pub state: String,
    pub routes: RouteCounts,
    pub learnt_from: Option<String>,
    #[serde(flatten)]
    pub details: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RouteCounts {
    pub imported: u64,
    pub filtered: u64,
    pub exported: u64,
    pub preferred: u64,
}

pub(crate) fn is_protocol_up(state: &str) -> bool {
    state.eq_ignore_ascii_case("up")
}

/// Decode the protocol map of a `/protocols` response.
pub(crate) fn parse_protocols(
    payload: &Value,
) -> Result<HashMap<String, ProtocolInfo>, SourceError> {
    let protocols = payload
        .get("protocols")
        .ok_or_else(|| SourceError::Protocol("missing protocols".to_string()))?;
    let mut parsed: HashMap<String, ProtocolInfo> =
        serde_json::from_value(protocols.clone()).map_err(protocol_error)?;
    for (id, protocol) in &mut parsed {
        if protocol.protocol.is_empty() {
            protocol.protocol.clone_from(id);
        }
    }
    Ok(parsed)
}

/// The BGP sessions within a protocol map.
pub(crate) fn bgp_protocols(
    protocols: &HashMap<String, ProtocolInfo>,
) -> impl Iterator<Item = (&String, &ProtocolInfo)> {
    protocols
        .iter()
        .filter(|(_, p)| p.bird_protocol == "BGP")
}

/// The pipe protocols within a protocol map, keyed by protocol name.
pub(crate) fn pipe_protocols(
    protocols: &HashMap<String, ProtocolInfo>,
) -> HashMap<&str, &ProtocolInfo> {
    protocols
        .iter()
        .filter(|(_, p)| p.bird_protocol == "Pipe")
        .map(|(id, p)| (id.as_str(), p))
        .collect()
}

/// Build neighbor records from the BGP protocols of a snapshot.
pub(crate) fn parse_neighbors(protocols: &HashMap<String, ProtocolInfo>) -> Vec<Neighbor> {
    let mut sessions: HashMap<&str, u32> = HashMap::new();
    for (_, protocol) in bgp_protocols(protocols) {
        *sessions.entry(protocol.neighbor_address.as_str()).or_default() += 1;
    }

    let mut neighbors: Vec<Neighbor> = bgp_protocols(protocols)
        .map(|(id, protocol)| Neighbor {
            id: id.clone(),
            address: protocol.neighbor_address.clone(),
            asn: protocol.neighbor_as,
            state: protocol.state.to_lowercase(),
            description: protocol.description.clone(),
            routes_received: protocol.routes.imported + protocol.routes.filtered,
            routes_accepted: protocol.routes.imported,
            routes_filtered: protocol.routes.filtered,
            session_count: sessions
                .get(protocol.neighbor_address.as_str())
                .copied()
                .unwrap_or(1),
            details: protocol.details.clone(),
        })
        .collect();
    sort_neighbors(&mut neighbors);
    neighbors
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RoutePayload {
    network: String,
    gateway: String,
    metric: u32,
    from_protocol: String,
    learnt_from: Option<String>,
    bgp: BgpInfo,
    #[serde(flatten)]
    details: serde_json::Map<String, Value>,
}

impl From<RoutePayload> for Route {
    fn from(payload: RoutePayload) -> Self {
        Route {
            neighbor_id: payload.from_protocol,
            network: payload.network,
            gateway: payload.gateway,
            metric: payload.metric,
            bgp: payload.bgp,
            learnt_from: payload.learnt_from,
            details: payload.details,
        }
    }
}

/// Decode the `routes` list of a routes response.
pub(crate) fn parse_routes(payload: &Value) -> Result<Vec<Route>, SourceError> {
    let routes = payload
        .get("routes")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::Protocol("missing routes".to_string()))?;
    parse_routes_data(routes)
}

/// Decode a list of raw route objects.
pub(crate) fn parse_routes_data(routes: &[Value]) -> Result<Vec<Route>, SourceError> {
    routes
        .iter()
        .map(|raw| {
            serde_json::from_value::<RoutePayload>(raw.clone())
                .map(Route::from)
                .map_err(protocol_error)
        })
        .collect()
}

fn protocol_error(err: serde_json::Error) -> SourceError {
    SourceError::Protocol(err.to_string())
}
