//! Facet filters layered onto the free-text lookup.
//!
//! A query carries the applied filters; while results are collected the
//! pipeline accumulates the facets still available, then subtracts the
//! applied set before answering.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::routes::{Community, ExtCommunity, LargeCommunity, LookupRoute};
use crate::source::SourceId;

/// A facet value with its display name and number of matching routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facet<T> {
    pub value: T,
    pub name: String,
    pub cardinality: usize,
}

/// One group of facets of the same kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterGroup<T> {
    pub filters: Vec<Facet<T>>,
}

impl<T> Default for FilterGroup<T> {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
        }
    }
}

impl<T: PartialEq + Clone> FilterGroup<T> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        self.filters.iter().any(|f| &f.value == value)
    }

    /// Record a facet occurrence, bumping the cardinality of an existing
    /// entry or appending a new one.
    pub fn add(&mut self, value: T, name: impl Into<String>) {
        if let Some(existing) = self.filters.iter_mut().find(|f| f.value == value) {
            existing.cardinality += 1;
            return;
        }
        self.filters.push(Facet {
            value,
            name: name.into(),
            cardinality: 1,
        });
    }

    /// Facets of `self` that are not present in `other`.
    #[must_use]
    pub fn sub(&self, other: &Self) -> Self {
        Self {
            filters: self
                .filters
                .iter()
                .filter(|f| !other.contains(&f.value))
                .cloned()
                .collect(),
        }
    }

    /// Copy display names for values that `other` knows about. Applied
    /// filters arrive from the query string as bare values.
    pub fn fill_names_from(&mut self, other: &Self) {
        for facet in &mut self.filters {
            if let Some(known) = other.filters.iter().find(|f| f.value == facet.value) {
                facet.name.clone_from(&known.name);
            }
        }
    }
}

/// A facet filter value could not be parsed from the query string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value for filter parameter {param}: {value}")]
pub struct FilterError {
    pub param: String,
    pub value: String,
}

/// All facet groups supported by the lookup pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    pub sources: FilterGroup<SourceId>,
    pub asns: FilterGroup<u32>,
    pub communities: FilterGroup<Community>,
    pub ext_communities: FilterGroup<ExtCommunity>,
    pub large_communities: FilterGroup<LargeCommunity>,
}

impl SearchFilters {
    /// Parse applied filters from query parameters. Each parameter holds a
    /// comma separated list: `sources=rs1,rs2&asns=64501&communities=64501:1`.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, FilterError> {
        let mut filters = Self::default();

        for value in split_param(params, "sources") {
            let id = SourceId::try_from(value.as_str()).map_err(|_| FilterError {
                param: "sources".to_string(),
                value: value.clone(),
            })?;
            filters.sources.add(id, value);
        }
        for value in split_param(params, "asns") {
            let asn: u32 = value.parse().map_err(|_| FilterError {
                param: "asns".to_string(),
                value: value.clone(),
            })?;
            filters.asns.add(asn, value);
        }
        for value in split_param(params, "communities") {
            let community = parse_community(&value).ok_or_else(|| FilterError {
                param: "communities".to_string(),
                value: value.clone(),
            })?;
            filters.communities.add(community, value);
        }
        for value in split_param(params, "ext_communities") {
            let community = parse_ext_community(&value).ok_or_else(|| FilterError {
                param: "ext_communities".to_string(),
                value: value.clone(),
            })?;
            filters.ext_communities.add(community, value);
        }
        for value in split_param(params, "large_communities") {
            let community = parse_large_community(&value).ok_or_else(|| FilterError {
                param: "large_communities".to_string(),
                value: value.clone(),
            })?;
            filters.large_communities.add(community, value);
        }

        Ok(filters)
    }

    /// Whether a route passes every applied group. Groups combine with AND;
    /// within the community groups each applied value must be present on
    /// the route.
    #[must_use]
    pub fn match_route(&self, route: &LookupRoute) -> bool {
        if !self.sources.is_empty() && !self.sources.contains(&route.route_server.id) {
            return false;
        }
        if !self.asns.is_empty() && !self.asns.contains(&route.neighbor.asn) {
            return false;
        }
        if !self
            .communities
            .filters
            .iter()
            .all(|f| route.route.bgp.communities.contains(&f.value))
        {
            return false;
        }
        if !self
            .ext_communities
            .filters
            .iter()
            .all(|f| route.route.bgp.ext_communities.contains(&f.value))
        {
            return false;
        }
        if !self
            .large_communities
            .filters
            .iter()
            .all(|f| route.route.bgp.large_communities.contains(&f.value))
        {
            return false;
        }
        true
    }

    /// Accumulate the facets a matching route contributes.
    pub fn update_from_route(&mut self, route: &LookupRoute) {
        self.sources.add(
            route.route_server.id.clone(),
            route.route_server.name.clone(),
        );
        self.asns
            .add(route.neighbor.asn, route.neighbor.description.clone());
        for community in &route.route.bgp.communities {
            self.communities.add(*community, format_community(community));
        }
        for community in &route.route.bgp.ext_communities {
            self.ext_communities
                .add(community.clone(), format_ext_community(community));
        }
        for community in &route.route.bgp.large_communities {
            self.large_communities
                .add(*community, format_large_community(community));
        }
    }

    /// Copy display names from the accumulated facets onto the applied set.
    pub fn merge_properties(&mut self, available: &Self) {
        self.sources.fill_names_from(&available.sources);
        self.asns.fill_names_from(&available.asns);
        self.communities.fill_names_from(&available.communities);
        self.ext_communities
            .fill_names_from(&available.ext_communities);
        self.large_communities
            .fill_names_from(&available.large_communities);
    }

    /// The facets still available after removing the applied ones.
    #[must_use]
    pub fn sub(&self, applied: &Self) -> Self {
        Self {
            sources: self.sources.sub(&applied.sources),
            asns: self.asns.sub(&applied.asns),
            communities: self.communities.sub(&applied.communities),
            ext_communities: self.ext_communities.sub(&applied.ext_communities),
            large_communities: self.large_communities.sub(&applied.large_communities),
        }
    }
}

fn split_param(params: &HashMap<String, String>, key: &str) -> Vec<String> {
    params
        .get(key)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_community(value: &str) -> Option<Community> {
    let mut parts = value.split(':');
    let a = parts.next()?.parse().ok()?;
    let b = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some([a, b])
}

fn parse_large_community(value: &str) -> Option<LargeCommunity> {
    let mut parts = value.split(':');
    let a = parts.next()?.parse().ok()?;
    let b = parts.next()?.parse().ok()?;
    let c = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some([a, b, c])
}

fn parse_ext_community(value: &str) -> Option<ExtCommunity> {
    let mut parts = value.split(':');
    let tag = parts.next()?;
    if tag.is_empty() {
        return None;
    }
    let a = parts.next()?.parse().ok()?;
    let b = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(ExtCommunity(tag.to_string(), a, b))
}

fn format_community(community: &Community) -> String {
    format!("{}:{}", community[0], community[1])
}

fn format_large_community(community: &LargeCommunity) -> String {
    format!("{}:{}:{}", community[0], community[1], community[2])
}

fn format_ext_community(community: &ExtCommunity) -> String {
    format!("{}:{}:{}", community.0, community.1, community.2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::{BgpInfo, Route, RouteServerRef, RouteState};
    use crate::api::Neighbor;

    fn lookup_route(source: &str, asn: u32, communities: Vec<Community>) -> LookupRoute {
        LookupRoute {
            route: Route {
                network: "10.0.0.0/24".into(),
                bgp: BgpInfo {
                    communities,
                    ..BgpInfo::default()
                },
                ..Route::default()
            },
            state: RouteState::Imported,
            neighbor: Neighbor {
                asn,
                description: format!("AS{asn} peer"),
                ..Neighbor::default()
            },
            route_server: RouteServerRef {
                id: SourceId::try_from(source).unwrap(),
                name: source.to_uppercase(),
            },
        }
    }

    #[test]
    fn parses_filters_from_params() {
        let mut params = HashMap::new();
        params.insert("asns".to_string(), "64501,64502".to_string());
        params.insert("communities".to_string(), "64501:1".to_string());
        params.insert("large_communities".to_string(), "64501:1:2".to_string());
        let filters = SearchFilters::from_params(&params).unwrap();

        assert_eq!(filters.asns.filters.len(), 2);
        assert_eq!(filters.communities.filters[0].value, [64501, 1]);
        assert_eq!(filters.large_communities.filters[0].value, [64501, 1, 2]);
    }

    #[test]
    fn rejects_malformed_community() {
        let mut params = HashMap::new();
        params.insert("communities".to_string(), "64501".to_string());
        let err = SearchFilters::from_params(&params).unwrap_err();
        assert_eq!(err.param, "communities");
    }

    #[test]
    fn match_route_requires_all_groups() {
        let mut params = HashMap::new();
        params.insert("asns".to_string(), "64501".to_string());
        params.insert("communities".to_string(), "64501:1".to_string());
        let filters = SearchFilters::from_params(&params).unwrap();

        assert!(filters.match_route(&lookup_route("rs1", 64501, vec![[64501, 1], [64501, 2]])));
        assert!(!filters.match_route(&lookup_route("rs1", 64501, vec![[64501, 2]])));
        assert!(!filters.match_route(&lookup_route("rs1", 64999, vec![[64501, 1]])));
    }

    #[test]
    fn accumulate_and_subtract_facets() {
        let mut available = SearchFilters::default();
        available.update_from_route(&lookup_route("rs1", 64501, vec![[64501, 1]]));
        available.update_from_route(&lookup_route("rs1", 64501, vec![[64501, 1]]));
        available.update_from_route(&lookup_route("rs2", 64502, vec![]));

        assert_eq!(available.asns.filters[0].cardinality, 2);
        assert_eq!(available.sources.filters.len(), 2);

        let mut params = HashMap::new();
        params.insert("asns".to_string(), "64501".to_string());
        let applied = SearchFilters::from_params(&params).unwrap();
        let remaining = available.sub(&applied);

        assert!(!remaining.asns.contains(&64501));
        assert!(remaining.asns.contains(&64502));
        assert_eq!(remaining.sources.filters.len(), 2);
    }
}
