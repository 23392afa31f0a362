//! Background Services Module
//!
//! Long-running parts of the pipeline and the framework that supervises
//! them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  MQTT  ┌──────────────────┐     ┌─────────────┐
//! │ Replay Service  │───────▶│  Ingest Service  │────▶│ MetricStore │
//! └─────────────────┘        └──────────────────┘     └─────────────┘
//!                                    │                       │
//!                                    ▼                       ▼
//!                            ┌──────────────────────────────────┐
//!                            │          Health Checker          │
//!                            └──────────────────────────────────┘
//! ```
//!
//! # Services
//!
//! - **ServiceManager**: Coordinates lifecycle of all services
//! - **IngestService**: Subscribes to the metric topics and persists messages
//! - **ReplayService**: Publishes a filtered simulation file once
//! - **HealthChecker**: Periodically checks store, broker and services
//!
//! # Example
//!
//! ```rust,ignore
//! use building_telemetry::services::{IngestService, ServiceManager};
//!
//! let manager = ServiceManager::new();
//! manager.register(Arc::new(IngestService::new(&config.mqtt, store, metrics)))?;
//! manager.start_all()?;
//!
//! // Graceful shutdown
//! manager.shutdown(Duration::from_secs(10)).await;
//! ```

pub mod framework;
pub mod health;
pub mod pipeline;
pub mod signal;

pub use framework::{
    topological_order, OrderError, RestartPolicy, Service, ServiceError, ServiceManager,
    ServiceStatus,
};
pub use health::{CheckResult, HealthChecker, HealthConfig, HealthReport, HealthStatus};
pub use pipeline::{IngestService, ReplayService};
pub use signal::shutdown_signal;
