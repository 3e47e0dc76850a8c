//! Neighbor records and the structured neighbor filter.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::api::response::Meta;
use crate::source::SourceId;

/// One BGP session from the route server's point of view.
///
/// Replaced atomically per source on each successful neighbors refresh.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Neighbor {
    /// Stable within a source (e.g. the bird protocol name).
    pub id: String,
    pub address: String,
    pub asn: u32,
    /// Session state as reported upstream: "up", "start" or "down".
    pub state: String,
    pub description: String,
    pub routes_received: u64,
    pub routes_accepted: u64,
    pub routes_filtered: u64,
    /// Number of sessions the peer holds towards this route server.
    pub session_count: u32,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Sort neighbors for stable presentation: by ASN, then identifier.
pub fn sort_neighbors(neighbors: &mut [Neighbor]) {
    neighbors.sort_by(|a, b| a.asn.cmp(&b.asn).then_with(|| a.id.cmp(&b.id)));
}

/// Full neighbors list of one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborsResponse {
    pub meta: Meta,
    pub neighbors: Vec<Neighbor>,
}

/// Per-source results of a fan-out neighbor lookup.
pub type NeighborsLookupResults = HashMap<SourceId, Vec<Neighbor>>;

/// Structured refinement for neighbor queries.
///
/// Criteria are OR-combined; an empty filter matches nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NeighborFilter {
    #[serde(default)]
    pub asns: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl NeighborFilter {
    /// Build a filter from query parameters: `asn` is a comma separated
    /// list of AS numbers, `name` a case-insensitive description substring.
    #[must_use]
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let asns = params
            .get("asn")
            .map(|raw| {
                raw.split(',')
                    .filter_map(|s| s.trim().parse::<u32>().ok())
                    .collect()
            })
            .unwrap_or_default();
        let name = params
            .get("name")
            .map(|n| n.trim().to_lowercase())
            .filter(|n| !n.is_empty());
        Self { asns, name }
    }

    #[must_use]
    pub fn matches(&self, neighbor: &Neighbor) -> bool {
        if !self.asns.is_empty() && self.asns.contains(&neighbor.asn) {
            return true;
        }
        if let Some(name) = &self.name {
            if neighbor.description.to_lowercase().contains(name) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neighbor(asn: u32, description: &str) -> Neighbor {
        Neighbor {
            id: format!("R{asn}"),
            asn,
            description: description.to_string(),
            ..Neighbor::default()
        }
    }

    #[test]
    fn filter_matches_asn_or_name() {
        let mut params = HashMap::new();
        params.insert("asn".to_string(), "64501,64502".to_string());
        params.insert("name".to_string(), "ixp".to_string());
        let filter = NeighborFilter::from_params(&params);

        assert!(filter.matches(&neighbor(64501, "Other")));
        assert!(filter.matches(&neighbor(65000, "Example IXP")));
        assert!(!filter.matches(&neighbor(65000, "Transit")));
    }

    #[test]
    fn empty_filter_matches_nothing() {
        let filter = NeighborFilter::default();
        assert!(!filter.matches(&neighbor(64501, "Example IXP")));
    }
}
