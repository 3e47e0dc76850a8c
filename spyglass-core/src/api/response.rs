//! Response envelopes: cache metadata and pagination.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::routes::LookupRoute;
use crate::api::search_filters::SearchFilters;

/// Freshness of the data a response was served from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatus {
    pub cached_at: DateTime<Utc>,
}

/// Metadata attached to every response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub cache_status: CacheStatus,
    #[serde(default)]
    pub result_from_cache: bool,
    /// When the served snapshot is due for replacement.
    pub ttl: DateTime<Utc>,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            version: String::new(),
            cache_status: CacheStatus::default(),
            result_from_cache: false,
            ttl: DateTime::UNIX_EPOCH,
        }
    }
}

/// Pagination summary for one result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub total_results: usize,
}

/// Slice `items` into the requested page. A page size of zero disables
/// pagination and returns everything.
pub fn paginate<T: Clone>(items: &[T], page: usize, page_size: usize) -> (Vec<T>, Pagination) {
    let total_results = items.len();
    if page_size == 0 {
        return (
            items.to_vec(),
            Pagination {
                page: 0,
                page_size: 0,
                total_pages: 1,
                total_results,
            },
        );
    }

    let total_pages = total_results.div_ceil(page_size);
    let offset = page.saturating_mul(page_size).min(total_results);
    let end = offset.saturating_add(page_size).min(total_results);
    (
        items[offset..end].to_vec(),
        Pagination {
            page,
            page_size,
            total_pages,
            total_results,
        },
    )
}

/// One half (imported or filtered) of a paginated lookup result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutesLookup {
    pub routes: Vec<LookupRoute>,
    pub pagination: Pagination,
}

/// Result of the global prefix/neighbor lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedRoutesLookupResponse {
    pub meta: Meta,
    pub request_duration_ms: f64,
    pub imported: RoutesLookup,
    pub filtered: RoutesLookup,
    pub filters_applied: SearchFilters,
    pub filters_available: SearchFilters,
}
