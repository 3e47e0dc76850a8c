//! The source adapter contract and the per-source identity.
//!
//! A [`Source`] couples a validated identifier and human label with the
//! adapter instance speaking the backend's wire protocol. Everything above
//! this module only ever sees parsed neighbor and route records.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::{Meta, NeighborsResponse, RoutesResponse};
use crate::error::SourceError;

/// Upper bound for source identifiers, enforced at config load and again at
/// the HTTP boundary before any store lookup.
pub const MAX_SOURCE_ID_LEN: usize = 42;

/// Validation failures for [`SourceId`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceIdError {
    #[error("source ID must not be empty")]
    Empty,
    #[error("source ID too long with length: {0}")]
    TooLong(usize),
}

/// Short stable identifier of a configured route server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceId(String);

impl SourceId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SourceId {
    type Error = SourceIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(SourceIdError::Empty);
        }
        if value.len() > MAX_SOURCE_ID_LEN {
            return Err(SourceIdError::TooLong(value.len()));
        }
        Ok(Self(value))
    }
}

impl TryFrom<&str> for SourceId {
    type Error = SourceIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

impl From<SourceId> for String {
    fn from(id: SourceId) -> Self {
        id.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status reported by the route server itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerStatus {
    pub backend: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Response of [`SourceAdapter::status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub meta: Meta,
    pub status: ServerStatus,
}

/// Contract implemented by every route-server backend.
///
/// Implementations never mutate remote state. Returned route lists are
/// deterministically sorted, `meta.cached_at` reflects the upstream snapshot
/// time, and an unknown neighbor yields [`SourceError::InvalidNeighbor`]
/// rather than an empty success.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Availability and version of the route server.
    async fn status(&self) -> Result<StatusResponse, SourceError>;

    /// Full list of BGP sessions the route server holds.
    async fn neighbors(&self) -> Result<NeighborsResponse, SourceError>;

    /// Received, filtered and not-exported routes for one neighbor.
    async fn routes(&self, neighbor_id: &str) -> Result<RoutesResponse, SourceError>;

    /// Routes accepted from the neighbor into the RIB.
    async fn routes_received(&self, neighbor_id: &str) -> Result<RoutesResponse, SourceError>;

    /// Routes rejected by import policy but retained for diagnostics.
    async fn routes_filtered(&self, neighbor_id: &str) -> Result<RoutesResponse, SourceError>;

    /// Routes in the RIB that are not announced onward to the neighbor.
    async fn routes_not_exported(&self, neighbor_id: &str) -> Result<RoutesResponse, SourceError>;

    /// Complete routes dump used to build the lookup index.
    async fn all_routes(&self) -> Result<RoutesResponse, SourceError>;
}

/// A configured route server: identity plus adapter instance.
///
/// Created once at startup from the configuration and immutable afterwards.
#[derive(Clone)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub adapter: Arc<dyn SourceAdapter>,
}

impl Source {
    pub fn new(id: SourceId, name: impl Into<String>, adapter: Arc<dyn SourceAdapter>) -> Self {
        Self {
            id,
            name: name.into(),
            adapter,
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_id_rejects_empty_and_overlong() {
        assert_eq!(SourceId::try_from(""), Err(SourceIdError::Empty));
        let long = "x".repeat(MAX_SOURCE_ID_LEN + 1);
        assert_eq!(
            SourceId::try_from(long.as_str()),
            Err(SourceIdError::TooLong(MAX_SOURCE_ID_LEN + 1))
        );
        assert!(SourceId::try_from("rs1-example").is_ok());
    }
}
