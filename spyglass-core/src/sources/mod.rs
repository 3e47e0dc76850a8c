//! Route-server backend implementations.

pub mod birdwatcher;
pub mod gobgp;
pub mod http;
pub mod openbgpd;

use std::sync::Arc;

use crate::config::{SourceBackend, SourceConfig};
use crate::error::SourceError;
use crate::source::Source;

use birdwatcher::{MultiTableBirdwatcher, SingleTableBirdwatcher};
use gobgp::GoBgp;
use http::RestClient;
use openbgpd::OpenBgpd;

/// Instantiate the adapter configured for a source.
pub fn create_source(cfg: &SourceConfig) -> Result<Source, SourceError> {
    let adapter: Arc<dyn crate::source::SourceAdapter> = match cfg.backend {
        SourceBackend::BirdwatcherMultiTable => {
            let client = Arc::new(RestClient::new(&cfg.host, cfg.insecure)?);
            Arc::new(MultiTableBirdwatcher::new(cfg.clone(), client))
        }
        SourceBackend::BirdwatcherSingleTable => {
            let client = Arc::new(RestClient::new(&cfg.host, cfg.insecure)?);
            Arc::new(SingleTableBirdwatcher::new(cfg.clone(), client))
        }
        SourceBackend::Openbgpd => {
            let client = Arc::new(RestClient::new(&cfg.host, cfg.insecure)?);
            Arc::new(OpenBgpd::new(cfg.clone(), client))
        }
        SourceBackend::Gobgp => Arc::new(GoBgp::new(cfg.clone())),
    };
    Ok(Source::new(cfg.id.clone(), cfg.name.clone(), adapter))
}
