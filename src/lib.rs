//! PulseWatch -- streaming anomaly detection for time-series metrics.
//!
//! Samples arrive keyed by `(source_key, metric_name)`. Each slot keeps a
//! sliding window and a running baseline; deviations are scored as z-scores,
//! classified by severity, and tracked as alerts through an
//! open / acknowledged / resolved lifecycle. Alert transitions are published
//! to an ordered delivery log that subscribers poll and acknowledge.

pub mod alert;
pub mod api;
pub mod baseline;
pub mod config;
pub mod delivery;
pub mod detect;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod replay;
pub mod storage;

#[cfg(test)]
mod testutil;

pub use config::MonitorConfig;
pub use engine::MonitorEngine;
pub use error::MonitorError;

use anyhow::{Context, Result};

/// Start the PulseWatch daemon: detection engine plus HTTP API.
pub async fn serve(config: MonitorConfig) -> Result<()> {
    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;

    let engine = MonitorEngine::open(config).await?;
    let app = api::router(api::state::AppState::new(engine));

    tracing::info!(%addr, "PulseWatch listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("PulseWatch stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
