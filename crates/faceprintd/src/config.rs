use anyhow::Context;
use faceprint_core::EngineConfig;
use std::net::SocketAddr;

pub const DEFAULT_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (default: 0.0.0.0:8000).
    pub addr: SocketAddr,
    /// Largest accepted request body.
    pub max_upload_bytes: usize,
    pub engine: EngineConfig,
}

impl ServerConfig {
    /// Load configuration from `FACEPRINT_*` environment variables with defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let bind = std::env::var("FACEPRINT_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
        let addr: SocketAddr = bind.parse().context("invalid FACEPRINT_ADDR")?;

        Ok(Self {
            addr,
            max_upload_bytes: env_usize("FACEPRINT_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
            engine: EngineConfig::from_env()?,
        })
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&v| v > 0)
        .unwrap_or(default)
}
