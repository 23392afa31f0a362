//! Subscriber-side handler that persists MQTT messages

use super::metrics::IngestionMetrics;
use crate::error::StoreError;
use crate::mqtt::MessageHandler;
use crate::store::{MetricStore, Point};
use crate::types::{round4, Measurement, MetricMessage, ZONE_TAG};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Why a message did not reach the store
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("payload is not UTF-8")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("invalid message JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no route for topic '{0}'")]
    UnknownTopic(String),

    #[error("thermal zone message without a zone_id tag")]
    MissingZone,

    #[error("invalid zone_id {0:?}")]
    InvalidZone(String),

    #[error("invalid timestamp '{0}'")]
    InvalidTime(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Persists every message received on the metric topics
pub struct MetricSink {
    store: Arc<dyn MetricStore>,
    metrics: Arc<IngestionMetrics>,
}

impl MetricSink {
    pub fn new(store: Arc<dyn MetricStore>, metrics: Arc<IngestionMetrics>) -> Self {
        Self { store, metrics }
    }

    /// Decode, route and write one message
    pub async fn process(&self, topic: &str, payload: &[u8]) -> Result<Point, SinkError> {
        let measurement =
            Measurement::from_topic(topic).ok_or_else(|| SinkError::UnknownTopic(topic.into()))?;
        let text = std::str::from_utf8(payload)?;
        let message: MetricMessage = serde_json::from_str(text)?;
        let point = to_point(measurement, &message)?;
        self.store.write(std::slice::from_ref(&point)).await?;
        Ok(point)
    }
}

/// Build the stored point for a message received on `measurement`'s topic
///
/// Thermal points keep only the `zone_id` tag; site points carry no tags.
/// Field values are rounded to 4 decimal places.
pub fn to_point(measurement: Measurement, message: &MetricMessage) -> Result<Point, SinkError> {
    let time = parse_message_time(&message.time)?;
    let mut point = Point::new(measurement.name()).time(time);

    if measurement == Measurement::ThermalZone {
        let zone = message
            .tags
            .get(ZONE_TAG)
            .filter(|z| !z.trim().is_empty())
            .ok_or(SinkError::MissingZone)?;
        if zone.chars().any(char::is_control) {
            return Err(SinkError::InvalidZone(zone.clone()));
        }
        point = point.tag(ZONE_TAG, zone.as_str());
    }
    for (name, value) in &message.fields {
        point = point.field(name.as_str(), round4(*value));
    }
    Ok(point)
}

/// RFC 3339, or a naive ISO date-time taken as UTC
pub fn parse_message_time(raw: &str) -> Result<DateTime<Utc>, SinkError> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|t| t.and_utc())
        .map_err(|_| SinkError::InvalidTime(raw.to_string()))
}

#[async_trait]
impl MessageHandler for MetricSink {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        self.metrics.record_received();
        match self.process(topic, payload).await {
            Ok(point) => {
                self.metrics.record_written(1);
                debug!(topic = %topic, measurement = %point.measurement, "Stored message");
            }
            Err(SinkError::UnknownTopic(t)) => {
                self.metrics.record_unknown_topic();
                warn!(topic = %t, "Ignoring message on unknown topic");
            }
            Err(SinkError::Store(e)) => {
                self.metrics.record_write_error();
                error!(topic = %topic, error = %e, "Failed to write message to store");
            }
            Err(e) => {
                self.metrics.record_decode_error();
                error!(topic = %topic, error = %e, "Failed to process message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{SITE_METRICS_TOPIC, THERMAL_ZONE_TOPIC};
    use chrono::TimeZone;

    fn sink() -> (MetricSink, Arc<MemoryStore>, Arc<IngestionMetrics>) {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(IngestionMetrics::new());
        (MetricSink::new(store.clone(), metrics.clone()), store, metrics)
    }

    #[tokio::test]
    async fn test_thermal_message_is_rounded_and_tagged() {
        let (sink, store, metrics) = sink();
        let payload = br#"{"measurement":"thermal_zone","tags":{"zone_id":"BLOCK1:CORRIDOR:X1F","extra":"x"},
            "time":"2005-01-01T01:00:00Z","fields":{"mean_air_temperature":21.123456}}"#;
        sink.handle(THERMAL_ZONE_TOPIC, payload).await;

        let points = store.points();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].measurement, "thermal_zone");
        assert_eq!(points[0].tag_value(ZONE_TAG), Some("BLOCK1:CORRIDOR:X1F"));
        assert_eq!(points[0].tags.len(), 1);
        assert_eq!(points[0].fields["mean_air_temperature"], 21.1235);
        assert_eq!(points[0].time, Utc.with_ymd_and_hms(2005, 1, 1, 1, 0, 0).unwrap());
        assert_eq!(metrics.snapshot().points_written, 1);
    }

    #[tokio::test]
    async fn test_site_message_has_no_tags() {
        let (sink, store, _) = sink();
        let payload = br#"{"measurement":"site_metrics","tags":{"zone_id":"z"},"time":"2005-01-01T01:00:00Z","fields":{"outdoor_air_temp":-2.00004}}"#;
        sink.handle(SITE_METRICS_TOPIC, payload).await;

        let points = store.points();
        assert_eq!(points[0].measurement, "site_metrics");
        assert!(points[0].tags.is_empty());
        assert_eq!(points[0].fields["outdoor_air_temp"], -2.0);
    }

    #[tokio::test]
    async fn test_routing_follows_topic() {
        let (sink, store, _) = sink();
        // measurement in the body does not override the topic
        let payload = br#"{"measurement":"thermal_zone","time":"2005-01-01T01:00:00Z","fields":{"outdoor_air_temp":1.0}}"#;
        sink.handle(SITE_METRICS_TOPIC, payload).await;
        assert_eq!(store.points()[0].measurement, "site_metrics");
    }

    #[tokio::test]
    async fn test_bad_messages_are_counted_not_stored() {
        let (sink, store, metrics) = sink();
        sink.handle(THERMAL_ZONE_TOPIC, b"not json").await;
        sink.handle(THERMAL_ZONE_TOPIC, &[0xff, 0xfe]).await;
        sink.handle(
            THERMAL_ZONE_TOPIC,
            br#"{"measurement":"thermal_zone","time":"2005-01-01T01:00:00Z","fields":{"x":1.0}}"#,
        )
        .await;
        sink.handle(
            SITE_METRICS_TOPIC,
            br#"{"measurement":"site_metrics","time":"yesterday","fields":{"x":1.0}}"#,
        )
        .await;
        sink.handle("building/other", b"{}").await;

        assert!(store.is_empty());
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_received, 5);
        assert_eq!(snapshot.decode_errors, 4);
        assert_eq!(snapshot.unknown_topics, 1);
        assert_eq!(snapshot.points_written, 0);
    }

    #[tokio::test]
    async fn test_empty_fields_is_a_write_error() {
        let (sink, _, metrics) = sink();
        let payload = br#"{"measurement":"site_metrics","time":"2005-01-01T01:00:00Z","fields":{}}"#;
        let err = sink.process(SITE_METRICS_TOPIC, payload).await.unwrap_err();
        assert!(matches!(err, SinkError::Store(StoreError::InvalidPoint(_))));

        sink.handle(SITE_METRICS_TOPIC, payload).await;
        assert_eq!(metrics.snapshot().write_errors, 1);
    }

    #[tokio::test]
    async fn test_blank_or_broken_zone_is_rejected() {
        let (sink, store, metrics) = sink();
        let blank = br#"{"measurement":"thermal_zone","tags":{"zone_id":" "},"time":"2005-01-01T01:00:00Z","fields":{"x":1.0}}"#;
        assert!(matches!(
            sink.process(THERMAL_ZONE_TOPIC, blank).await,
            Err(SinkError::MissingZone)
        ));

        let broken = br#"{"measurement":"thermal_zone","tags":{"zone_id":"BLOCK1\nx"},"time":"2005-01-01T01:00:00Z","fields":{"x":1.0}}"#;
        assert!(matches!(
            sink.process(THERMAL_ZONE_TOPIC, broken).await,
            Err(SinkError::InvalidZone(_))
        ));

        sink.handle(THERMAL_ZONE_TOPIC, blank).await;
        assert!(store.is_empty());
        assert_eq!(metrics.snapshot().decode_errors, 1);
    }

    #[tokio::test]
    async fn test_huge_value_is_stored_unrounded() {
        let (sink, store, metrics) = sink();
        let payload = br#"{"measurement":"site_metrics","time":"2005-01-01T01:00:00Z","fields":{"facility_electricity":1e305}}"#;
        sink.handle(SITE_METRICS_TOPIC, payload).await;

        assert_eq!(metrics.snapshot().write_errors, 0);
        assert_eq!(store.points()[0].fields["facility_electricity"], 1e305);
    }

    #[test]
    fn test_parse_message_time() {
        let expected = Utc.with_ymd_and_hms(2005, 1, 1, 1, 0, 0).unwrap();
        assert_eq!(parse_message_time("2005-01-01T01:00:00Z").unwrap(), expected);
        assert_eq!(parse_message_time("2005-01-01T03:00:00+02:00").unwrap(), expected);
        assert_eq!(parse_message_time("2005-01-01T01:00:00").unwrap(), expected);
        assert!(parse_message_time("01/01 01:00:00").is_err());
    }
}
