//! Building telemetry pipeline
//!
//! Replays EnergyPlus building-simulation output over MQTT, persists the
//! readings in a time-series store and serves them over HTTP.
//!
//! ```text
//! eplusout.csv ─▶ simulation ─▶ replay ─MQTT─▶ ingest ─▶ store ◀─ api
//! ```
//!
//! # Modules
//!
//! - [`simulation`]: EnergyPlus column filtering and message construction
//! - [`mqtt`]: broker publisher and subscriber
//! - [`replay`]: filtered CSV to MQTT
//! - [`ingest`]: MQTT to store, with counters
//! - [`store`]: InfluxDB v2 and in-memory backends
//! - [`services`]: supervised long-running tasks and health checks
//! - [`api`]: HTTP query service
//! - [`stack`]: container topology and compose rendering

pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod mqtt;
pub mod replay;
pub mod services;
pub mod simulation;
pub mod stack;
pub mod store;
pub mod types;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use types::{Measurement, MetricMessage};
