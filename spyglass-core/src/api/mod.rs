//! Plain data records exchanged between adapters, stores and the HTTP layer.

mod neighbors;
mod response;
mod routes;
mod search_filters;
mod stats;

pub use neighbors::{
    sort_neighbors, Neighbor, NeighborFilter, NeighborsLookupResults, NeighborsResponse,
};
pub use response::{
    paginate, CacheStatus, Meta, PaginatedRoutesLookupResponse, Pagination, RoutesLookup,
};
pub use routes::{
    sort_lookup_routes, sort_routes, BgpInfo, Community, ExtCommunity, LargeCommunity,
    LookupRoute, Route, RouteServerRef, RouteState, RoutesResponse,
};
pub use search_filters::{Facet, FilterError, FilterGroup, SearchFilters};
pub use stats::{
    NeighborsStoreStats, RouteServerNeighborsStats, RouteServerRoutesStats, RoutesStats,
    RoutesStoreStats,
};
