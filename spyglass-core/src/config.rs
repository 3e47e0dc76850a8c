//! Configuration model, loaded from a TOML file with serde defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::source::SourceId;

/// Configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server-wide options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    /// Neighbor refresh cadence in minutes; zero falls back to five.
    pub neighbors_store_refresh_interval: u64,
    /// Routes refresh cadence in minutes; zero falls back to five.
    pub routes_store_refresh_interval: u64,
    /// Max concurrent routes refreshes across all sources.
    pub routes_store_refresh_parallelism: usize,
    /// Force a synchronous neighbor refresh on every read. Kept for
    /// installations that rely on it; every read then pays full upstream
    /// latency.
    pub enable_neighbors_status_refresh: bool,
    pub enable_prefix_lookup: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7340".to_string(),
            neighbors_store_refresh_interval: 5,
            routes_store_refresh_interval: 5,
            routes_store_refresh_parallelism: 1,
            enable_neighbors_status_refresh: false,
            enable_prefix_lookup: true,
        }
    }
}

impl ServerConfig {
    /// Neighbor refresh interval with the zero fallback applied.
    #[must_use]
    pub fn neighbors_refresh_interval(&self) -> Duration {
        minutes_or_default(self.neighbors_store_refresh_interval)
    }

    /// Routes refresh interval with the zero fallback applied.
    #[must_use]
    pub fn routes_refresh_interval(&self) -> Duration {
        minutes_or_default(self.routes_store_refresh_interval)
    }

    /// Routes refresh parallelism, at least one.
    #[must_use]
    pub fn routes_refresh_parallelism(&self) -> usize {
        self.routes_store_refresh_parallelism.max(1)
    }
}

fn minutes_or_default(minutes: u64) -> Duration {
    let minutes = if minutes == 0 { 5 } else { minutes };
    Duration::from_secs(minutes * 60)
}

/// Kind of route-server backend behind a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceBackend {
    BirdwatcherMultiTable,
    BirdwatcherSingleTable,
    Openbgpd,
    Gobgp,
}

impl SourceBackend {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BirdwatcherMultiTable => "birdwatcher-multi-table",
            Self::BirdwatcherSingleTable => "birdwatcher-single-table",
            Self::Openbgpd => "openbgpd",
            Self::Gobgp => "gobgp",
        }
    }
}

/// Per-source options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: SourceId,
    pub name: String,
    pub backend: SourceBackend,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub insecure: bool,
    /// Table holding the imported routes dump (multi-table birdwatcher).
    #[serde(default = "default_main_table")]
    pub main_table: String,
    /// Prefix of per-peer tables; stripped to derive the master pipe.
    #[serde(default = "default_peer_table_prefix")]
    pub peer_table_prefix: String,
    /// Prefix of pipe protocols towards the master table.
    #[serde(default = "default_pipe_protocol_prefix")]
    pub pipe_protocol_prefix: String,
    #[serde(default = "default_routes_cache_size")]
    pub routes_cache_size: usize,
    #[serde(default)]
    pub routes_cache_disabled: bool,
    #[serde(default)]
    pub neighbors_cache_disabled: bool,
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
}

impl SourceConfig {
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

fn default_main_table() -> String {
    "master4".to_string()
}

fn default_peer_table_prefix() -> String {
    "T".to_string()
}

fn default_pipe_protocol_prefix() -> String {
    "M".to_string()
}

fn default_routes_cache_size() -> usize {
    128
}

fn default_cache_ttl_seconds() -> u64 {
    300
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Parse a configuration document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Load a configuration file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sources_with_defaults() {
        let cfg = Config::from_toml_str(
            r#"
            [server]
            routes_store_refresh_parallelism = 2

            [[source]]
            id = "rs1"
            name = "rs1.example.net"
            backend = "birdwatcher-multi-table"
            host = "rs1.example.net:29184"

            [[source]]
            id = "rs2"
            name = "rs2.example.net"
            backend = "openbgpd"
            host = "rs2.example.net:29111"
            cache_ttl_seconds = 60
            "#,
        )
        .unwrap();

        assert_eq!(cfg.server.routes_refresh_parallelism(), 2);
        assert_eq!(
            cfg.server.neighbors_refresh_interval(),
            Duration::from_secs(300)
        );
        assert_eq!(cfg.sources.len(), 2);
        assert_eq!(cfg.sources[0].peer_table_prefix, "T");
        assert_eq!(cfg.sources[0].routes_cache_size, 128);
        assert_eq!(cfg.sources[1].cache_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn zero_interval_falls_back_to_five_minutes() {
        let cfg = Config::from_toml_str(
            r#"
            [server]
            neighbors_store_refresh_interval = 0
            "#,
        )
        .unwrap();
        assert_eq!(
            cfg.server.neighbors_refresh_interval(),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn rejects_overlong_source_id() {
        let long_id = "x".repeat(64);
        let raw = format!(
            r#"
            [[source]]
            id = "{long_id}"
            name = "oversized"
            backend = "gobgp"
            "#
        );
        assert!(Config::from_toml_str(&raw).is_err());
    }
}
