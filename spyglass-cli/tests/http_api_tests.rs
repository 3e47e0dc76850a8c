//! Tests for the HTTP API: validation, global lookup and observability
//! endpoints, driven against mock adapters through the axum router.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tokio::sync::watch;
use tower::ServiceExt; // for `oneshot`

use spyglass_cli::api::{create_api_routes, ApiState};
use spyglass_core::api::{Meta, Neighbor, NeighborsResponse, Route, RoutesResponse};
use spyglass_core::source::StatusResponse;
use spyglass_core::sources::gobgp::GoBgp;
use spyglass_core::{
    Config, InMemoryNeighborsBackend, InMemoryRoutesBackend, NeighborsStore, RoutesStore, Source,
    SourceAdapter, SourceBackend, SourceError, SourceId,
};

struct MockAdapter {
    neighbors: Vec<Neighbor>,
    imported: Vec<Route>,
    filtered: Vec<Route>,
}

#[async_trait]
impl SourceAdapter for MockAdapter {
    async fn status(&self) -> Result<StatusResponse, SourceError> {
        Err(SourceError::NotImplemented)
    }

    async fn neighbors(&self) -> Result<NeighborsResponse, SourceError> {
        Ok(NeighborsResponse {
            meta: Meta::default(),
            neighbors: self.neighbors.clone(),
        })
    }

    async fn routes(&self, neighbor_id: &str) -> Result<RoutesResponse, SourceError> {
        if !self.neighbors.iter().any(|n| n.id == neighbor_id) {
            return Err(SourceError::InvalidNeighbor(neighbor_id.to_string()));
        }
        Ok(RoutesResponse {
            meta: Meta::default(),
            imported: self
                .imported
                .iter()
                .filter(|r| r.neighbor_id == neighbor_id)
                .cloned()
                .collect(),
            filtered: Vec::new(),
            not_exported: Vec::new(),
        })
    }

    async fn routes_received(&self, neighbor_id: &str) -> Result<RoutesResponse, SourceError> {
        self.routes(neighbor_id).await
    }

    async fn routes_filtered(&self, _: &str) -> Result<RoutesResponse, SourceError> {
        Ok(RoutesResponse::default())
    }

    async fn routes_not_exported(&self, _: &str) -> Result<RoutesResponse, SourceError> {
        Ok(RoutesResponse::default())
    }

    async fn all_routes(&self) -> Result<RoutesResponse, SourceError> {
        Ok(RoutesResponse {
            meta: Meta::default(),
            imported: self.imported.clone(),
            filtered: self.filtered.clone(),
            not_exported: Vec::new(),
        })
    }
}

fn neighbor(id: &str, asn: u32, description: &str) -> Neighbor {
    Neighbor {
        id: id.to_string(),
        asn,
        description: description.to_string(),
        state: "up".to_string(),
        ..Neighbor::default()
    }
}

fn route(neighbor_id: &str, network: &str, communities: Vec<[u32; 2]>) -> Route {
    Route {
        neighbor_id: neighbor_id.to_string(),
        network: network.to_string(),
        gateway: "203.0.113.1".to_string(),
        bgp: spyglass_core::api::BgpInfo {
            communities,
            ..Default::default()
        },
        ..Route::default()
    }
}

fn source_id(raw: &str) -> SourceId {
    SourceId::try_from(raw).unwrap()
}

async fn build_router(config: Config) -> Router {
    let adapter_a = Arc::new(MockAdapter {
        neighbors: vec![neighbor("N1", 64501, "Example IXP")],
        imported: vec![route("N1", "10.0.0.0/24", vec![[64501, 1]])],
        filtered: vec![],
    });
    let adapter_b = Arc::new(MockAdapter {
        neighbors: vec![
            neighbor("N2", 64502, "Other"),
            neighbor("N3", 64501, "Example Transit"),
        ],
        imported: vec![],
        filtered: vec![route("N2", "10.0.0.0/24", vec![[64502, 666]])],
    });

    let sources = vec![
        Arc::new(Source::new(source_id("rs-a"), "RS A", adapter_a)),
        Arc::new(Source::new(source_id("rs-b"), "RS B", adapter_b)),
        Arc::new(Source::new(
            source_id("rs-gobgp"),
            "RS GoBGP",
            Arc::new(GoBgp::new(gobgp_config())),
        )),
    ];

    let config = Arc::new(config);
    let neighbors_backend = Arc::new(InMemoryNeighborsBackend::new());
    let routes_backend = Arc::new(InMemoryRoutesBackend::new());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let neighbors = Arc::new(
        NeighborsStore::new(&config, sources.clone(), neighbors_backend)
            .with_jitter(Duration::ZERO),
    );
    let routes = Arc::new(
        RoutesStore::new(
            &config,
            sources.clone(),
            routes_backend,
            Arc::clone(&neighbors),
            shutdown_rx,
        )
        .with_jitter(Duration::ZERO),
    );

    // One full refresh pass; the GoBGP skeleton ends up in error state and
    // must not break anything below.
    for id in ["rs-a", "rs-b", "rs-gobgp"] {
        Arc::clone(&neighbors).safe_update_source(source_id(id)).await;
        Arc::clone(&routes).safe_update_source(source_id(id)).await;
    }

    let state = ApiState::new(config, sources, neighbors, routes);
    create_api_routes().with_state(state)
}

fn gobgp_config() -> spyglass_core::SourceConfig {
    spyglass_core::SourceConfig {
        id: source_id("rs-gobgp"),
        name: "RS GoBGP".to_string(),
        backend: SourceBackend::Gobgp,
        host: "192.0.2.1:50051".to_string(),
        insecure: false,
        main_table: "master4".to_string(),
        peer_table_prefix: "T".to_string(),
        pipe_protocol_prefix: "M".to_string(),
        routes_cache_size: 128,
        routes_cache_disabled: false,
        neighbors_cache_disabled: false,
        cache_ttl_seconds: 300,
    }
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn lookup_requires_a_query() {
    let router = build_router(Config::default()).await;

    let (status, body) = get(&router, "/api/v1/lookup/prefix").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["param"], "q");

    let (status, body) = get(&router, "/api/v1/lookup/prefix?q=a").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["reason"], "the query is too short");

    let (status, body) = get(&router, "/api/v1/lookup/prefix?q=foo").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["reason"],
        "a prefix query must contain at least a '.' or ':'"
    );
}

#[tokio::test]
async fn global_prefix_lookup_splits_by_state() {
    let router = build_router(Config::default()).await;

    let (status, body) = get(&router, "/api/v1/lookup/prefix?q=10.0.0.0/24").await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(body["imported"]["routes"].as_array().unwrap().len(), 1);
    assert_eq!(
        body["imported"]["routes"][0]["route_server"]["id"],
        "rs-a"
    );
    assert_eq!(body["filtered"]["routes"].as_array().unwrap().len(), 1);
    assert_eq!(
        body["filtered"]["routes"][0]["route_server"]["id"],
        "rs-b"
    );
    assert_eq!(body["meta"]["result_from_cache"], true);

    // Both origin ASNs show up as available facets.
    let asns: Vec<u64> = body["filters_available"]["asns"]["filters"]
        .as_array()
        .unwrap()
        .iter()
        .map(|facet| facet["value"].as_u64().unwrap())
        .collect();
    assert!(asns.contains(&64501));
    assert!(asns.contains(&64502));
}

#[tokio::test]
async fn as_queries_resolve_neighbors_first() {
    let router = build_router(Config::default()).await;

    // AS64501 matches N1 on rs-a and N3 on rs-b; only N1 announces routes.
    let (status, body) = get(&router, "/api/v1/lookup/prefix?q=AS64501").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["imported"]["routes"].as_array().unwrap().len(), 1);
    assert_eq!(body["imported"]["routes"][0]["neighbor"]["asn"], 64501);
    assert_eq!(body["filtered"]["routes"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn facet_filters_narrow_the_results() {
    let router = build_router(Config::default()).await;

    let (status, body) =
        get(&router, "/api/v1/lookup/prefix?q=10.0.0.0/24&asns=64501").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["imported"]["routes"].as_array().unwrap().len(), 1);
    assert_eq!(body["filtered"]["routes"].as_array().unwrap().len(), 0);

    // The applied ASN is no longer available.
    let available: Vec<u64> = body["filters_available"]["asns"]["filters"]
        .as_array()
        .unwrap()
        .iter()
        .map(|facet| facet["value"].as_u64().unwrap())
        .collect();
    assert!(!available.contains(&64501));
}

#[tokio::test]
async fn prefix_lookup_can_be_disabled() {
    let mut config = Config::default();
    config.server.enable_prefix_lookup = false;
    let router = build_router(config).await;

    let (status, _) = get(&router, "/api/v1/lookup/prefix?q=10.0.0.0/24").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn neighbor_lookup_endpoint_filters_by_asn() {
    let router = build_router(Config::default()).await;

    let (status, body) = get(&router, "/api/v1/lookup/neighbors?asn=64501").await;
    assert_eq!(status, StatusCode::OK);
    let neighbors = body["neighbors"].as_array().unwrap();
    assert_eq!(neighbors.len(), 2);
    assert!(neighbors.iter().all(|n| n["asn"] == 64501));
}

#[tokio::test]
async fn source_neighbors_are_served_from_the_store() {
    let router = build_router(Config::default()).await;

    let (status, body) = get(&router, "/api/v1/routeservers/rs-b/neighbors").await;
    assert_eq!(status, StatusCode::OK);
    let neighbors = body["neighbors"].as_array().unwrap();
    assert_eq!(neighbors.len(), 2);
    // Sorted by ASN.
    assert_eq!(neighbors[0]["id"], "N3");
    assert_eq!(neighbors[1]["id"], "N2");
}

#[tokio::test]
async fn per_neighbor_routes_come_from_the_adapter() {
    let router = build_router(Config::default()).await;

    let (status, body) =
        get(&router, "/api/v1/routeservers/rs-a/neighbors/N1/routes").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["imported"].as_array().unwrap().len(), 1);

    let (status, _) =
        get(&router, "/api/v1/routeservers/rs-a/neighbors/nope/routes").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn overlong_source_ids_are_rejected_before_the_stores() {
    let router = build_router(Config::default()).await;
    let long_id = "x".repeat(64);

    let (status, body) =
        get(&router, &format!("/api/v1/routeservers/{long_id}/neighbors")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["param"], "id");
}

#[tokio::test]
async fn unknown_sources_are_not_found() {
    let router = build_router(Config::default()).await;

    let (status, _) = get(&router, "/api/v1/routeservers/rs-z/neighbors").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unimplemented_backends_degrade_gracefully() {
    let router = build_router(Config::default()).await;

    // The status passthrough reports the typed error.
    let (status, _) = get(&router, "/api/v1/routeservers/rs-gobgp/status").await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);

    // The aggregate status still answers and carries the error state.
    let (status, body) = get(&router, "/api/v1/status").await;
    assert_eq!(status, StatusCode::OK);
    let servers = body["routes"]["route_servers"].as_array().unwrap();
    let gobgp = servers
        .iter()
        .find(|server| server["name"] == "RS GoBGP")
        .unwrap();
    assert_eq!(gobgp["state"], "error");

    assert_eq!(body["routes"]["total_routes"]["imported"], 1);
    assert_eq!(body["routes"]["total_routes"]["filtered"], 1);
    assert_eq!(body["neighbors"]["total_neighbors"], 3);
}

#[tokio::test]
async fn config_endpoint_reports_lookup_availability() {
    let router = build_router(Config::default()).await;

    let (status, body) = get(&router, "/api/v1/config").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prefix_lookup_enabled"], true);
}
