//! Building Telemetry HTTP API
//!
//! Serves the readings stored by the pipeline.
//!
//! # Endpoints
//!
//! ## Data
//! - `GET /data/` - Thermal zone and/or site rows
//! - `GET /temperatures/` - Outdoor vs indoor temperature per timestep
//! - `DELETE /data/` - Delete both measurements
//!
//! ## Admin
//! - `GET /health` - Store health
//! - `GET /metrics` - Prometheus metrics
//!
//! Ingestion and replay counters only move in the process that ingests.
//! This binary serves them at zero; run `telemetry-pipeline run --serve` to
//! serve the API beside the live counters.
//!
//! # Configuration
//!
//! The server reads configuration from:
//! 1. `TELEMETRY_CONFIG` environment variable (path to TOML file)
//! 2. `./telemetry.toml` in current directory
//! 3. Default configuration
//!
//! followed by environment overrides such as `INFLUXDB_TOKEN`.
//!
//! # Example
//!
//! ```bash
//! INFLUXDB_TOKEN=... ./telemetry-api
//!
//! # Indoor vs outdoor, averaged over zones
//! curl "http://localhost:8000/temperatures/?aggregate=true&start_time=2005-01-01T00:00:00Z"
//!
//! # One zone's thermal rows
//! curl "http://localhost:8000/data/?data_type=thermal_zone&zone_id=BLOCK1:CORRIDOR:X1F"
//! ```

use building_telemetry::{
    api::{build_router, AppState},
    config::AppConfig,
    ingest::IngestionMetrics,
    logging,
    services::{shutdown_signal, HealthChecker, HealthConfig},
    store,
};
use std::sync::Arc;
use tracing::info;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = AppConfig::load()?;
    logging::init(&config.logging, "telemetry_api")?;

    info!("Building telemetry API starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let store = store::open(&config)?;
    info!(backend = store.backend(), "Store opened");

    let health = HealthChecker::new(HealthConfig::from(&config.health), store.clone());
    // Nothing ingests here, so these counters stay at zero
    let state = Arc::new(AppState {
        store,
        health: Arc::new(health),
        metrics: Arc::new(IngestionMetrics::new()),
    });

    let app = build_router(state);

    let addr = config.listen_addr()?;
    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
