//! Skeleton adapter for GoBGP daemons.
//!
//! The gRPC client wiring is not implemented yet; every operation reports a
//! typed [`SourceError::NotImplemented`]. The stores record the error in the
//! source status and the query pipeline skips such sources, so a configured
//! GoBGP source degrades gracefully instead of breaking the aggregate.

use async_trait::async_trait;

use crate::api::{NeighborsResponse, RoutesResponse};
use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::source::{SourceAdapter, StatusResponse};

pub struct GoBgp {
    #[allow(dead_code)]
    config: SourceConfig,
}

impl GoBgp {
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SourceAdapter for GoBgp {
    async fn status(&self) -> Result<StatusResponse, SourceError> {
        Err(SourceError::NotImplemented)
    }

    async fn neighbors(&self) -> Result<NeighborsResponse, SourceError> {
        Err(SourceError::NotImplemented)
    }

    async fn routes(&self, _neighbor_id: &str) -> Result<RoutesResponse, SourceError> {
        Err(SourceError::NotImplemented)
    }

    async fn routes_received(&self, _neighbor_id: &str) -> Result<RoutesResponse, SourceError> {
        Err(SourceError::NotImplemented)
    }

    async fn routes_filtered(&self, _neighbor_id: &str) -> Result<RoutesResponse, SourceError> {
        Err(SourceError::NotImplemented)
    }

    async fn routes_not_exported(&self, _neighbor_id: &str) -> Result<RoutesResponse, SourceError> {
        Err(SourceError::NotImplemented)
    }

    async fn all_routes(&self) -> Result<RoutesResponse, SourceError> {
        Err(SourceError::NotImplemented)
    }
}
