//! Stores feeding the query layer: refresh scheduling, neighbors and
//! routes, plus the reference in-memory backends.

mod memory;
mod neighbors_store;
mod routes_store;
mod sources_store;

pub use memory::{InMemoryNeighborsBackend, InMemoryRoutesBackend};
pub use neighbors_store::{NeighborsStore, NeighborsStoreBackend};
pub use routes_store::{RoutesStore, RoutesStoreBackend};
pub use sources_store::{SourceState, SourceStatus, SourcesStore};

use std::time::Duration;

/// Upper bound of the random delay applied before each per-source refresh,
/// desynchronizing fleets of aggregator instances.
pub(crate) const DEFAULT_REFRESH_JITTER: Duration = Duration::from_secs(30);
