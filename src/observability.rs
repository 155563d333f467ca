// src/observability.rs
//! Logging and metrics setup

use crate::utils::config::LogFormat;
use crate::utils::errors::{Result, WorkerError};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Honours `RUST_LOG`, defaulting to `info`.
pub fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    }
    .map_err(|e| WorkerError::Observability(format!("Failed to install subscriber: {}", e)))
}

/// Serve Prometheus metrics on `addr`; without an address metrics are dropped
pub fn init_metrics(addr: Option<SocketAddr>) -> Result<()> {
    let Some(addr) = addr else {
        return Ok(());
    };

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::Observability(format!("Failed to install exporter: {}", e)))?;

    info!("Serving metrics on {}", addr);
    Ok(())
}
