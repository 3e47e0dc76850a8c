//! Route records as produced by adapters and stored for lookups.

use serde::{Deserialize, Serialize};

use crate::api::neighbors::Neighbor;
use crate::api::response::Meta;
use crate::source::SourceId;

/// Regular BGP community, e.g. `[64501, 666]`.
pub type Community = [u32; 2];

/// Large BGP community, e.g. `[64501, 1, 2]`.
pub type LargeCommunity = [u32; 3];

/// Extended community: a type tag plus two numeric fields, serialized as a
/// three-element array (`["rt", 64501, 1]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtCommunity(pub String, pub u64, pub u64);

/// BGP path attributes attached to a route.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BgpInfo {
    pub origin: String,
    pub as_path: Vec<u32>,
    pub next_hop: String,
    pub communities: Vec<Community>,
    pub ext_communities: Vec<ExtCommunity>,
    pub large_communities: Vec<LargeCommunity>,
    pub local_pref: u32,
    pub med: u32,
}

/// A single route as learned from a route server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Route {
    pub neighbor_id: String,
    /// Announced prefix, e.g. `10.0.0.0/24`.
    pub network: String,
    pub gateway: String,
    #[serde(default)]
    pub metric: u32,
    #[serde(default)]
    pub bgp: BgpInfo,
    /// Address the route server learned the route from, when it differs
    /// from the gateway (route reflection setups).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learnt_from: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Sort routes deterministically: by network, then gateway.
pub fn sort_routes(routes: &mut [Route]) {
    routes.sort_by(|a, b| {
        a.network
            .cmp(&b.network)
            .then_with(|| a.gateway.cmp(&b.gateway))
    });
}

/// Import state of a route with respect to the route server's policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteState {
    Imported,
    Filtered,
}

/// Reference to the route server a lookup route was learned at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteServerRef {
    pub id: SourceId,
    pub name: String,
}

/// A route annotated for the cross-source lookup index: the neighbor
/// snapshot it was learned from and the route server it lives on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupRoute {
    #[serde(flatten)]
    pub route: Route,
    pub state: RouteState,
    pub neighbor: Neighbor,
    pub route_server: RouteServerRef,
}

/// Sort lookup routes by the total order used for result pagination:
/// network, then neighbor, then route server.
pub fn sort_lookup_routes(routes: &mut [LookupRoute]) {
    routes.sort_by(|a, b| {
        a.route
            .network
            .cmp(&b.route.network)
            .then_with(|| a.route.neighbor_id.cmp(&b.route.neighbor_id))
            .then_with(|| a.route_server.id.cmp(&b.route_server.id))
    });
}

/// Routes of one neighbor (or a whole source) split by import state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutesResponse {
    pub meta: Meta,
    pub imported: Vec<Route>,
    pub filtered: Vec<Route>,
    pub not_exported: Vec<Route>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_sort_is_stable_on_network_then_gateway() {
        let mut routes = vec![
            Route {
                network: "10.0.0.0/24".into(),
                gateway: "b".into(),
                ..Route::default()
            },
            Route {
                network: "10.0.0.0/24".into(),
                gateway: "a".into(),
                ..Route::default()
            },
            Route {
                network: "10.0.0.0/23".into(),
                gateway: "z".into(),
                ..Route::default()
            },
        ];
        sort_routes(&mut routes);
        assert_eq!(routes[0].network, "10.0.0.0/23");
        assert_eq!(routes[1].gateway, "a");
        assert_eq!(routes[2].gateway, "b");
    }
}
