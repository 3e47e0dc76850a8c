//! Adapters for bird route servers fronted by a birdwatcher HTTP shim.
//!
//! Two flavours exist: multi-table setups with one bird table per peer and
//! pipes towards a master table, and single-table setups where all peers
//! share one table. Both share the transport, response caches and the
//! per-neighbor single-flight lock.

mod multi_table;
mod parse;
mod single_table;

pub use multi_table::MultiTableBirdwatcher;
pub use single_table::SingleTableBirdwatcher;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use crate::api::{sort_routes, Meta, Route};
use crate::caches::{NeighborsCache, RoutesCache};
use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::keyed_lock::KeyedLock;
use crate::source::{ServerStatus, StatusResponse};
use crate::sources::http::JsonApi;

use parse::{parse_meta, parse_protocols, ProtocolInfo};

/// State shared by both birdwatcher flavours.
pub(crate) struct BirdwatcherCore {
    pub(crate) config: SourceConfig,
    pub(crate) client: Arc<dyn JsonApi>,
    pub(crate) neighbors_cache: NeighborsCache,
    pub(crate) routes_required_cache: RoutesCache,
    pub(crate) routes_not_exported_cache: RoutesCache,
    pub(crate) fetch_lock: KeyedLock<String>,
}

impl BirdwatcherCore {
    pub(crate) fn new(config: SourceConfig, client: Arc<dyn JsonApi>) -> Self {
        let ttl = config.cache_ttl();
        Self {
            neighbors_cache: NeighborsCache::new(config.neighbors_cache_disabled, ttl),
            routes_required_cache: RoutesCache::new(
                config.routes_cache_disabled,
                config.routes_cache_size,
                ttl,
            ),
            routes_not_exported_cache: RoutesCache::new(
                config.routes_cache_disabled,
                config.routes_cache_size,
                ttl,
            ),
            fetch_lock: KeyedLock::new(),
            config,
            client,
        }
    }

    /// Fetch and decode `/protocols`, the entry point for most queries.
    pub(crate) async fn fetch_protocols(
        &self,
    ) -> Result<(Meta, HashMap<String, ProtocolInfo>), SourceError> {
        let payload = self.client.get_json("/protocols").await?;
        let meta = parse_meta(&payload)?;
        let protocols = parse_protocols(&payload)?;
        Ok((meta, protocols))
    }

    pub(crate) async fn fetch_status(&self) -> Result<StatusResponse, SourceError> {
        let payload = self.client.get_json("/status").await?;
        let meta = parse_meta(&payload)?;
        let version = payload
            .pointer("/status/version")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let message = payload
            .pointer("/status/message")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(StatusResponse {
            meta,
            status: ServerStatus {
                backend: "bird".to_string(),
                version,
                message,
            },
        })
    }
}

/// Keep only filtered routes that belong to the neighbor: announced via
/// its gateway, or learned from the peer or its reflector address.
pub(crate) fn filter_routes_by_peer_or_learnt_from(
    routes: Vec<Route>,
    peer: &str,
    learnt_from: &str,
) -> Vec<Route> {
    let mut kept: Vec<Route> = routes
        .into_iter()
        .filter(|route| {
            route.gateway == peer
                || route.learnt_from.as_deref() == Some(peer)
                || route.learnt_from.as_deref() == Some(learnt_from)
        })
        .collect();
    sort_routes(&mut kept);
    kept
}

/// Drop received routes that also appear in the filtered set, comparing by
/// announcement pair (network, gateway).
pub(crate) fn filter_routes_by_duplicates(received: Vec<Route>, filtered: &[Route]) -> Vec<Route> {
    let filtered_pairs: HashSet<(&str, &str)> = filtered
        .iter()
        .map(|route| (route.network.as_str(), route.gateway.as_str()))
        .collect();
    let mut kept: Vec<Route> = received
        .into_iter()
        .filter(|route| !filtered_pairs.contains(&(route.network.as_str(), route.gateway.as_str())))
        .collect();
    sort_routes(&mut kept);
    kept
}

/// Apply the route deduplication between the received and filtered sets.
///
/// The first received route determines the peer and learnt-from addresses;
/// with nothing received the imported set stays empty and the filtered set
/// is passed through untouched.
pub(crate) fn dedup_required(
    received: Vec<Route>,
    mut filtered: Vec<Route>,
) -> (Vec<Route>, Vec<Route>) {
    let mut imported = Vec::new();
    if !received.is_empty() {
        let peer = received[0].gateway.clone();
        let learnt_from = received[0]
            .learnt_from
            .clone()
            .unwrap_or_else(|| peer.clone());
        filtered = filter_routes_by_peer_or_learnt_from(filtered, &peer, &learnt_from);
        imported = filter_routes_by_duplicates(received, &filtered);
    }
    (imported, filtered)
}


#[cfg(test)]
mod tests {
    use super::*;

    fn route(network: &str, gateway: &str, learnt_from: Option<&str>) -> Route {
        Route {
            network: network.to_string(),
            gateway: gateway.to_string(),
            learnt_from: learnt_from.map(str::to_string),
            ..Route::default()
        }
    }

    #[test]
    fn filtered_set_is_restricted_to_the_peer() {
        let filtered = vec![
            route("10.0.0.0/24", "P", None),
            route("10.0.0.0/24", "Q", None),
            route("10.0.1.0/24", "R", Some("P")),
        ];
        let kept = filter_routes_by_peer_or_learnt_from(filtered, "P", "P");
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|r| r.gateway == "P" || r.learnt_from.as_deref() == Some("P")));
    }

    #[test]
    fn gateway_matching_the_reflector_address_is_not_enough() {
        // Peer P learns its routes from reflector L. A filtered entry
        // announced via gateway L belongs to the reflector's own session,
        // not to this neighbor, unless its learnt-from address says so.
        let filtered = vec![
            route("10.0.0.0/24", "P", None),
            route("10.0.1.0/24", "L", None),
            route("10.0.2.0/24", "X", Some("L")),
            route("10.0.3.0/24", "X", Some("P")),
        ];
        let kept = filter_routes_by_peer_or_learnt_from(filtered, "P", "L");

        let networks: Vec<&str> = kept.iter().map(|r| r.network.as_str()).collect();
        assert_eq!(networks, vec!["10.0.0.0/24", "10.0.2.0/24", "10.0.3.0/24"]);
        assert!(!networks.contains(&"10.0.1.0/24"));
    }

    #[test]
    fn received_routes_matching_filtered_are_dropped() {
        let received = vec![route("10.0.0.0/24", "P", Some("P"))];
        let filtered = vec![
            route("10.0.0.0/24", "P", None),
            route("10.0.0.0/24", "Q", None),
        ];
        let (imported, filtered) = dedup_required(received, filtered);

        // The received entry matches a filtered announcement with the same
        // network and gateway, so nothing remains imported.
        assert!(imported.is_empty());
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].gateway, "P");
    }

    #[test]
    fn empty_received_passes_filtered_through() {
        let filtered = vec![route("10.0.0.0/24", "Q", None)];
        let (imported, filtered) = dedup_required(Vec::new(), filtered);
        assert!(imported.is_empty());
        assert_eq!(filtered.len(), 1);
    }
}
