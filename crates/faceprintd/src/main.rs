use anyhow::{Context, Result};
use faceprint_core::{FaceEmbedder, OnnxFactory};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod routes;

use config::ServerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env().context("loading configuration")?;
    tracing::info!(
        addr = %config.addr,
        model = %config.engine.model_name,
        model_dir = %config.engine.model_dir.display(),
        "faceprintd starting"
    );

    let factory = OnnxFactory::load(&config.engine).context("loading model pack")?;
    let embedder = Arc::new(FaceEmbedder::new(Arc::new(factory), config.engine.limits));
    let app = routes::router(embedder, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("binding {}", config.addr))?;
    tracing::info!(addr = %config.addr, "faceprintd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("faceprintd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
    }
}
