//! Pipeline counters exported in Prometheus text format
//!
//! Counters live in a private registry so several pipelines in one process
//! (as in tests) never collide on the global one.

use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};
use tracing::{info, warn};

/// Prefix for every metric name
pub const METRIC_PREFIX: &str = "building_telemetry";

/// Content type for the text exposition format
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Counters for the subscriber and replay sides of the pipeline
pub struct IngestionMetrics {
    registry: Registry,
    messages_received: IntCounter,
    points_written: IntCounter,
    decode_errors: IntCounter,
    write_errors: IntCounter,
    unknown_topics: IntCounter,
    rows_read: IntCounter,
    rows_skipped: IntCounter,
    messages_published: IntCounter,
    publish_errors: IntCounter,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub points_written: u64,
    pub decode_errors: u64,
    pub write_errors: u64,
    pub unknown_topics: u64,
    pub rows_read: u64,
    pub rows_skipped: u64,
    pub messages_published: u64,
    pub publish_errors: u64,
}

impl MetricsSnapshot {
    /// Fraction of received messages that reached the store (0.0-1.0)
    pub fn write_success_rate(&self) -> f64 {
        if self.messages_received == 0 {
            return 1.0;
        }
        self.points_written as f64 / self.messages_received as f64
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::with_opts(Opts::new(format!("{METRIC_PREFIX}_{name}"), help))
        .expect("metric names are static and valid");
    if let Err(e) = registry.register(Box::new(counter.clone())) {
        warn!(metric = %name, error = %e, "Failed to register metric");
    }
    counter
}

impl IngestionMetrics {
    /// Create a fresh set of counters
    pub fn new() -> Self {
        let registry = Registry::new();
        Self {
            messages_received: counter(
                &registry,
                "messages_received_total",
                "MQTT messages received by the subscriber",
            ),
            points_written: counter(
                &registry,
                "points_written_total",
                "Points written to the store",
            ),
            decode_errors: counter(
                &registry,
                "decode_errors_total",
                "Messages that could not be decoded",
            ),
            write_errors: counter(&registry, "write_errors_total", "Failed store writes"),
            unknown_topics: counter(
                &registry,
                "unknown_topics_total",
                "Messages received on topics with no route",
            ),
            rows_read: counter(&registry, "replay_rows_read_total", "Simulation rows read"),
            rows_skipped: counter(
                &registry,
                "replay_rows_skipped_total",
                "Simulation rows skipped for an invalid timestamp",
            ),
            messages_published: counter(
                &registry,
                "replay_messages_published_total",
                "Messages published by the replay",
            ),
            publish_errors: counter(
                &registry,
                "replay_publish_errors_total",
                "Messages the replay failed to publish",
            ),
            registry,
        }
    }

    pub fn record_received(&self) {
        self.messages_received.inc();
    }

    pub fn record_written(&self, points: u64) {
        self.points_written.inc_by(points);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.inc();
    }

    pub fn record_write_error(&self) {
        self.write_errors.inc();
    }

    pub fn record_unknown_topic(&self) {
        self.unknown_topics.inc();
    }

    pub fn record_row_read(&self) {
        self.rows_read.inc();
    }

    pub fn record_row_skipped(&self) {
        self.rows_skipped.inc();
    }

    pub fn record_published(&self) {
        self.messages_published.inc();
    }

    pub fn record_publish_error(&self) {
        self.publish_errors.inc();
    }

    /// Copy the current counter values
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.get(),
            points_written: self.points_written.get(),
            decode_errors: self.decode_errors.get(),
            write_errors: self.write_errors.get(),
            unknown_topics: self.unknown_topics.get(),
            rows_read: self.rows_read.get(),
            rows_skipped: self.rows_skipped.get(),
            messages_published: self.messages_published.get(),
            publish_errors: self.publish_errors.get(),
        }
    }

    /// Render every counter in the text exposition format
    pub fn export(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Log the snapshot, used when a pipeline command exits
    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            messages_received = s.messages_received,
            points_written = s.points_written,
            decode_errors = s.decode_errors,
            write_errors = s.write_errors,
            unknown_topics = s.unknown_topics,
            rows_read = s.rows_read,
            rows_skipped = s.rows_skipped,
            messages_published = s.messages_published,
            publish_errors = s.publish_errors,
            write_success_rate = s.write_success_rate(),
            "Pipeline metrics"
        );
    }
}

impl Default for IngestionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_tracks_counters() {
        let metrics = IngestionMetrics::new();
        metrics.record_received();
        metrics.record_received();
        metrics.record_written(1);
        metrics.record_decode_error();
        metrics.record_row_read();
        metrics.record_published();
        metrics.record_published();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_received, 2);
        assert_eq!(snapshot.points_written, 1);
        assert_eq!(snapshot.decode_errors, 1);
        assert_eq!(snapshot.rows_read, 1);
        assert_eq!(snapshot.messages_published, 2);
        assert_eq!(snapshot.write_success_rate(), 0.5);
    }

    #[test]
    fn test_empty_success_rate() {
        assert_eq!(MetricsSnapshot::default().write_success_rate(), 1.0);
    }

    #[test]
    fn test_export_text_format() {
        let metrics = IngestionMetrics::new();
        metrics.record_written(3);

        let output = metrics.export();
        assert!(output.contains("# HELP building_telemetry_points_written_total"));
        assert!(output.contains("# TYPE building_telemetry_points_written_total counter"));
        assert!(output.contains("building_telemetry_points_written_total 3"));
        assert!(output.contains("building_telemetry_replay_rows_read_total 0"));
    }

    #[test]
    fn test_independent_registries() {
        let a = IngestionMetrics::new();
        let b = IngestionMetrics::new();
        a.record_unknown_topic();
        assert_eq!(a.snapshot().unknown_topics, 1);
        assert_eq!(b.snapshot().unknown_topics, 0);
    }
}
