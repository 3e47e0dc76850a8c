//! Error taxonomy shared by the adapters and stores.
//!
//! Refresh paths swallow these into the per-source status; read paths return
//! them to the caller. Anything reaching the HTTP layer is mapped to a status
//! code there.

use thiserror::Error;

use crate::source::SourceId;

/// Errors produced by a source adapter while talking to its route server.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The route server (or its HTTP shim) could not be reached.
    #[error("route server unreachable: {0}")]
    Unreachable(String),

    /// The route server answered with something we could not make sense of.
    #[error("malformed route server response: {0}")]
    Protocol(String),

    /// The requested neighbor is not configured on the route server.
    #[error("invalid neighbor: {0}")]
    InvalidNeighbor(String),

    /// The backend type does not support this operation.
    #[error("not implemented by this source backend")]
    NotImplemented,
}

/// Errors produced by the stores and their refresh scheduling.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No source is registered under the given ID.
    #[error("source not found: {0}")]
    SourceNotFound(SourceId),

    /// The neighbor is not present in the current snapshot of the source.
    #[error("neighbor not found: {0}")]
    NeighborNotFound(String),

    /// A refresh for this source is already in flight.
    #[error("source {0} is already locked for refresh")]
    SourceAlreadyLocked(SourceId),

    /// All refresh slots are taken; the source is skipped this tick.
    #[error("refresh parallelism exhausted")]
    ParallelismExhausted,

    /// The store is shutting down; the operation was abandoned.
    #[error("operation cancelled by shutdown")]
    Cancelled,

    /// An adapter failed while the store was refreshing or force-refreshing.
    #[error(transparent)]
    Source(#[from] SourceError),
}
