//! MQTT → store ingestion

pub mod metrics;
pub mod sink;

pub use metrics::{IngestionMetrics, MetricsSnapshot};
pub use sink::{MetricSink, SinkError};
