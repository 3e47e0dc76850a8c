//! spyglass - a looking glass aggregator for BGP route servers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use spyglass_cli::api::{create_api_routes, ApiState};
use spyglass_core::sources::create_source;
use spyglass_core::{
    Config, InMemoryNeighborsBackend, InMemoryRoutesBackend, NeighborsStore, RoutesStore, Source,
};

/// Looking glass aggregator for BGP route servers
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Set the log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the aggregator and serve the HTTP API
    Start {
        /// Path to the configuration file
        #[arg(short, long, default_value = "spyglass.toml")]
        config: PathBuf,

        /// Listen address, overriding the configuration
        #[arg(long)]
        listen: Option<String>,
    },

    /// Validate a configuration file and show the configured sources
    Check {
        /// Path to the configuration file
        #[arg(short, long, default_value = "spyglass.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level: Level = cli
        .log_level
        .parse()
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting tracing subscriber failed")?;

    match cli.command {
        Commands::Start { config, listen } => start(&config, listen).await,
        Commands::Check { config } => check(&config),
    }
}

fn load_config(path: &PathBuf) -> Result<Config> {
    Config::load(path).with_context(|| format!("loading config from {}", path.display()))
}

fn build_sources(config: &Config) -> Result<Vec<Arc<Source>>> {
    config
        .sources
        .iter()
        .map(|source_config| {
            create_source(source_config)
                .map(Arc::new)
                .with_context(|| format!("initializing source {}", source_config.id))
        })
        .collect()
}

async fn start(config_path: &PathBuf, listen_override: Option<String>) -> Result<()> {
    let config = Arc::new(load_config(config_path)?);
    let sources = build_sources(&config)?;
    info!(sources = sources.len(), "configured route servers");

    let neighbors_backend = Arc::new(InMemoryNeighborsBackend::new());
    let routes_backend = Arc::new(InMemoryRoutesBackend::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let neighbors = Arc::new(NeighborsStore::new(
        &config,
        sources.clone(),
        neighbors_backend,
    ));
    let routes = Arc::new(RoutesStore::new(
        &config,
        sources.clone(),
        routes_backend,
        Arc::clone(&neighbors),
        shutdown_rx,
    ));

    Arc::clone(&neighbors).start();
    Arc::clone(&routes).start();

    let state = ApiState::new(Arc::clone(&config), sources, neighbors, routes);
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);
    let app = create_api_routes().with_state(state).layer(cors);

    let listen = listen_override.unwrap_or_else(|| config.server.listen.clone());
    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    info!(%listen, "http api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("http server failed")?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install shutdown handler");
        return;
    }
    info!("shutting down");
    let _ = shutdown_tx.send(true);
}

fn check(config_path: &PathBuf) -> Result<()> {
    let config = load_config(config_path)?;
    println!("configuration ok: {} source(s)", config.sources.len());
    for source in &config.sources {
        println!(
            "  {} ({}) backend={} host={}",
            source.id,
            source.name,
            source.backend.as_str(),
            source.host
        );
    }
    Ok(())
}
