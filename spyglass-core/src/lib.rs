//! Core of the spyglass looking-glass aggregator.
//!
//! Federates heterogeneous BGP route-server backends behind a uniform query
//! API: source adapters produce plain neighbor/route records, per-source
//! refresh schedulers feed in-memory stores, and the lookup layer serves
//! cross-source prefix and neighbor searches from those stores.

pub mod api;
pub mod caches;
pub mod config;
pub mod decoders;
pub mod error;
pub mod keyed_lock;
pub mod source;
pub mod sources;
pub mod store;

pub use config::{Config, ServerConfig, SourceBackend, SourceConfig};
pub use error::{SourceError, StoreError};
pub use source::{Source, SourceAdapter, SourceId, SourceIdError};
pub use store::{
    InMemoryNeighborsBackend, InMemoryRoutesBackend, NeighborsStore, NeighborsStoreBackend,
    RoutesStore, RoutesStoreBackend, SourceState, SourceStatus, SourcesStore,
};
