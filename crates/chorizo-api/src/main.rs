//! # chorizo-api — Binary Entry Point
//!
//! Parses configuration from flags and environment, bootstraps the state,
//! and serves the router until the process is stopped.

use std::net::SocketAddr;

use chorizo_api::config::LogFormat;
use chorizo_api::AppConfig;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    let metrics = chorizo_api::metrics::install_recorder()?;
    let port = config.port;

    let state = chorizo_api::bootstrap::bootstrap(config)
        .await
        .inspect_err(|e| tracing::error!("Bootstrap failed: {e}"))?
        .with_metrics(metrics);

    let app = chorizo_api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("chorizo API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
