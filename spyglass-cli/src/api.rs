//! HTTP API: global lookup, per-source inspection and observability.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use spyglass_core::api::{
    paginate, sort_lookup_routes, sort_neighbors, CacheStatus, Meta, NeighborFilter,
    NeighborsResponse, NeighborsStoreStats, PaginatedRoutesLookupResponse, RouteState,
    RoutesLookup, RoutesResponse, RoutesStoreStats, SearchFilters,
};
use spyglass_core::decoders::maybe_prefix;
use spyglass_core::source::StatusResponse;
use spyglass_core::{
    Config, NeighborsStore, RoutesStore, Source, SourceAdapter, SourceBackend, SourceError,
    SourceId, StoreError,
};

use crate::validators::{
    validate_prefix_query, validate_query_string, validate_source_id, ValidationError,
};

/// Page size for each half of the global lookup result.
const LOOKUP_PAGE_SIZE: usize = 250;

/// Shared state behind all handlers.
#[derive(Clone)]
pub struct ApiState {
    config: Arc<Config>,
    sources: Arc<Vec<Arc<Source>>>,
    neighbors: Arc<NeighborsStore>,
    routes: Arc<RoutesStore>,
}

impl ApiState {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        sources: Vec<Arc<Source>>,
        neighbors: Arc<NeighborsStore>,
        routes: Arc<RoutesStore>,
    ) -> Self {
        Self {
            config,
            sources: Arc::new(sources),
            neighbors,
            routes,
        }
    }

    fn source(&self, id: &SourceId) -> Result<Arc<Source>, ApiError> {
        self.sources
            .iter()
            .find(|source| &source.id == id)
            .cloned()
            .ok_or_else(|| ApiError::SourceNotFound(id.to_string()))
    }
}

/// Build the API router.
pub fn create_api_routes() -> Router<ApiState> {
    Router::new()
        .route("/api/v1/status", get(app_status))
        .route("/api/v1/status/:id", get(source_status))
        .route("/api/v1/config", get(show_config))
        .route("/api/v1/routeservers", get(list_route_servers))
        .route("/api/v1/routeservers/:id/status", get(source_status))
        .route("/api/v1/routeservers/:id/neighbors", get(source_neighbors))
        .route(
            "/api/v1/routeservers/:id/neighbors/:neighbor_id/routes",
            get(neighbor_routes),
        )
        .route(
            "/api/v1/routeservers/:id/neighbors/:neighbor_id/routes/received",
            get(neighbor_routes_received),
        )
        .route(
            "/api/v1/routeservers/:id/neighbors/:neighbor_id/routes/filtered",
            get(neighbor_routes_filtered),
        )
        .route(
            "/api/v1/routeservers/:id/neighbors/:neighbor_id/routes/not-exported",
            get(neighbor_routes_not_exported),
        )
        .route("/api/v1/lookup/prefix", get(lookup_prefix))
        .route("/api/v1/lookup/neighbors", get(lookup_neighbors))
}

/// Errors surfaced by the HTTP layer.
#[derive(Debug)]
pub enum ApiError {
    Validation(ValidationError),
    NotFound(String),
    SourceNotFound(String),
    NeighborNotFound(String),
    NotImplemented,
    Unreachable(String),
    Protocol(String),
    Internal(String),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

impl From<SourceError> for ApiError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Unreachable(msg) => Self::Unreachable(msg),
            SourceError::Protocol(msg) => Self::Protocol(msg),
            SourceError::InvalidNeighbor(id) => Self::NeighborNotFound(id),
            SourceError::NotImplemented => Self::NotImplemented,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SourceNotFound(id) => Self::SourceNotFound(id.to_string()),
            StoreError::NeighborNotFound(id) => Self::NeighborNotFound(id),
            StoreError::Source(err) => Self::from(err),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            Self::Validation(err) => (
                StatusCode::BAD_REQUEST,
                Json(json!({"param": err.param, "reason": err.reason})),
            )
                .into_response(),
            Self::NotFound(msg) => {
                (StatusCode::NOT_FOUND, Json(json!({"error": msg}))).into_response()
            }
            Self::SourceNotFound(id) => (
                StatusCode::NOT_FOUND,
                Json(json!({"error": format!("source not found: {id}")})),
            )
                .into_response(),
            Self::NeighborNotFound(id) => (
                StatusCode::NOT_FOUND,
                Json(json!({"error": format!("neighbor not found: {id}")})),
            )
                .into_response(),
            Self::NotImplemented => (
                StatusCode::NOT_IMPLEMENTED,
                Json(json!({"error": "not implemented by this source backend"})),
            )
                .into_response(),
            Self::Unreachable(msg) | Self::Protocol(msg) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": msg})),
            )
                .into_response(),
            Self::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": msg})),
            )
                .into_response(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ServiceInfo {
    name: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct AppStatusResponse {
    service: ServiceInfo,
    routes: RoutesStoreStats,
    neighbors: NeighborsStoreStats,
}

async fn app_status(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let response = AppStatusResponse {
        service: ServiceInfo {
            name: "spyglass",
            version: env!("CARGO_PKG_VERSION"),
        },
        routes: state.routes.stats().await,
        neighbors: state.neighbors.stats().await,
    };
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct RouteServerInfo {
    id: SourceId,
    name: String,
    backend: &'static str,
}

fn route_server_infos(config: &Config) -> Vec<RouteServerInfo> {
    config
        .sources
        .iter()
        .map(|source| RouteServerInfo {
            id: source.id.clone(),
            name: source.name.clone(),
            backend: SourceBackend::as_str(source.backend),
        })
        .collect()
}

async fn show_config(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(json!({
        "prefix_lookup_enabled": state.config.server.enable_prefix_lookup,
        "route_servers": route_server_infos(&state.config),
    })))
}

async fn list_route_servers(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        json!({"route_servers": route_server_infos(&state.config)}),
    ))
}

async fn source_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let source_id = validate_source_id(&id)?;
    let source = state.source(&source_id)?;

    match source.adapter.status().await {
        Ok(status) => Ok(Json(status)),
        Err(err) => {
            warn!(source = %source_id, error = %err, "status request failed");
            Err(err.into())
        }
    }
}

/// Response metadata for results served from a store.
fn store_meta(cached_at: Option<DateTime<Utc>>, ttl: Option<DateTime<Utc>>) -> Meta {
    Meta {
        version: env!("CARGO_PKG_VERSION").to_string(),
        cache_status: CacheStatus {
            cached_at: cached_at.unwrap_or(DateTime::UNIX_EPOCH),
        },
        result_from_cache: true,
        ttl: ttl.unwrap_or_else(Utc::now),
    }
}

async fn source_neighbors(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<NeighborsResponse>, ApiError> {
    let source_id = validate_source_id(&id)?;
    let mut neighbors = state.neighbors.get_neighbors_at(&source_id).await?;
    sort_neighbors(&mut neighbors);

    Ok(Json(NeighborsResponse {
        meta: store_meta(
            state.neighbors.source_cached_at(&source_id),
            state.neighbors.source_cache_ttl(&source_id),
        ),
        neighbors,
    }))
}

async fn neighbor_routes(
    State(state): State<ApiState>,
    Path((id, neighbor_id)): Path<(String, String)>,
) -> Result<Json<RoutesResponse>, ApiError> {
    let source_id = validate_source_id(&id)?;
    let source = state.source(&source_id)?;
    Ok(Json(source.adapter.routes(&neighbor_id).await?))
}

async fn neighbor_routes_received(
    State(state): State<ApiState>,
    Path((id, neighbor_id)): Path<(String, String)>,
) -> Result<Json<RoutesResponse>, ApiError> {
    let source_id = validate_source_id(&id)?;
    let source = state.source(&source_id)?;
    Ok(Json(source.adapter.routes_received(&neighbor_id).await?))
}

async fn neighbor_routes_filtered(
    State(state): State<ApiState>,
    Path((id, neighbor_id)): Path<(String, String)>,
) -> Result<Json<RoutesResponse>, ApiError> {
    let source_id = validate_source_id(&id)?;
    let source = state.source(&source_id)?;
    Ok(Json(source.adapter.routes_filtered(&neighbor_id).await?))
}

async fn neighbor_routes_not_exported(
    State(state): State<ApiState>,
    Path((id, neighbor_id)): Path<(String, String)>,
) -> Result<Json<RoutesResponse>, ApiError> {
    let source_id = validate_source_id(&id)?;
    let source = state.source(&source_id)?;
    Ok(Json(
        source.adapter.routes_not_exported(&neighbor_id).await?,
    ))
}

fn query_page(params: &HashMap<String, String>, key: &str) -> usize {
    params
        .get(key)
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0)
}

/// Global lookup: prefix queries hit the routes index directly, anything
/// else is resolved to neighbors first and their routes collected.
async fn lookup_prefix(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<PaginatedRoutesLookupResponse>, ApiError> {
    if !state.config.server.enable_prefix_lookup {
        return Err(ApiError::NotFound("prefix lookup is disabled".to_string()));
    }

    let q = validate_query_string(&params, "q")?;
    let q = validate_prefix_query(&q)?;
    let mut filters_applied =
        SearchFilters::from_params(&params).map_err(ValidationError::from)?;

    let start = Instant::now();

    let routes = if maybe_prefix(q) {
        state.routes.lookup_prefix(q).await?
    } else {
        let neighbors = state.neighbors.lookup_neighbors(q).await;
        state.routes.lookup_prefix_for_neighbors(&neighbors).await?
    };

    // Split the results by state, apply the facet filters and collect the
    // facets still available on the way.
    let mut imported = Vec::new();
    let mut filtered = Vec::new();
    let mut filters_available = SearchFilters::default();
    for route in routes {
        if !filters_applied.match_route(&route) {
            continue;
        }
        filters_available.update_from_route(&route);
        match route.state {
            RouteState::Imported => imported.push(route),
            RouteState::Filtered => filtered.push(route),
        }
    }

    filters_applied.merge_properties(&filters_available);
    let filters_available = filters_available.sub(&filters_applied);

    sort_lookup_routes(&mut imported);
    sort_lookup_routes(&mut filtered);

    let (imported_page, imported_pagination) = paginate(
        &imported,
        query_page(&params, "page_imported"),
        LOOKUP_PAGE_SIZE,
    );
    let (filtered_page, filtered_pagination) = paginate(
        &filtered,
        query_page(&params, "page_filtered"),
        LOOKUP_PAGE_SIZE,
    );

    Ok(Json(PaginatedRoutesLookupResponse {
        meta: store_meta(state.routes.cached_at(), state.routes.cache_ttl()),
        request_duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        imported: RoutesLookup {
            routes: imported_page,
            pagination: imported_pagination,
        },
        filtered: RoutesLookup {
            routes: filtered_page,
            pagination: filtered_pagination,
        },
        filters_applied,
        filters_available,
    }))
}

/// Global neighbor filter across all route servers.
async fn lookup_neighbors(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<NeighborsResponse>, ApiError> {
    let filter = NeighborFilter::from_params(&params);
    let mut neighbors = state.neighbors.filter_neighbors(&filter).await;
    sort_neighbors(&mut neighbors);

    Ok(Json(NeighborsResponse {
        meta: store_meta(state.neighbors.cached_at(), state.neighbors.cache_ttl()),
        neighbors,
    }))
}
