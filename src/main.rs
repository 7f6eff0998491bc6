//! Badekompis API Server
//!
//! Run with: cargo run --bin badekompis
//!
//! # Configuration
//!
//! Read from `--config`, or else the first of
//! `~/.config/badekompis/config.toml`, `/etc/badekompis/config.toml` and
//! `./config.toml`. `BADEKOMPIS_*` environment variables override the file
//! and `RUST_LOG` overrides the configured log level.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use badekompis::config::LoggingConfig;
use badekompis::{serve, AppState, Backend, Config};

#[derive(Parser)]
#[command(name = "badekompis")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Badekompis API server")]
struct Args {
    /// Config file (default: search the standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory, overrides the config
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Port to listen on, overrides the config
    #[arg(short, long)]
    port: Option<u16>,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter_directive()));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.is_json() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = data_dir;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }

    init_tracing(&config.logging);
    tracing::info!("Starting Badekompis API server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Data directory: {:?}", config.storage.data_dir);
    if config.geocoding.enabled {
        tracing::info!("Geocoding via {}", config.geocoding.base_url);
    } else {
        tracing::info!("Geocoding disabled, using the fixed geocoder");
    }

    let backend = Backend::open_local(&config)
        .await
        .with_context(|| format!("opening backend in {:?}", config.storage.data_dir))?;
    tracing::info!("Backend ready");

    let state = AppState::new(backend, config);
    serve(state).await?;
    Ok(())
}
