mod colour;
mod config;
mod convert;
mod download;
mod error;
mod extract;
mod http;
mod pipeline;
mod recolour;
mod resize;
mod tile;
use std::path::PathBuf;

use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os("IMAGETOOLS_CONFIG").map(PathBuf::from);
    // Load config first so we can honor logging.filter directive.
    let shared = config::ConfigManager::load(config_path).await?;
    let cfg_snapshot = config::ConfigManager::to_struct(&shared).await?;
    let filter_directive = cfg_snapshot
        .logging
        .as_ref()
        .and_then(|l| l.filter.clone())
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info,imagetools_server=debug".to_string());
    fmt()
        .with_env_filter(EnvFilter::new(filter_directive))
        .init();

    let palette = cfg_snapshot.recolour.palette();
    tracing::info!(
        pairs = palette.len(),
        tolerance = cfg_snapshot.recolour.tolerance,
        multiplier_mode = cfg_snapshot.recolour.multiplier_mode,
        "loaded recolour defaults"
    );

    let state = http::AppState { cfg: shared };
    let app = http::router(state);
    let bind = cfg_snapshot.server.and_then(|s| s.bind_address);
    http::serve(app, bind).await?;
    Ok(())
}
