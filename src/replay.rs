//! Simulation replay: filtered CSV rows → MQTT messages

use crate::config::ReplayConfig;
use crate::error::Result;
use crate::ingest::IngestionMetrics;
use crate::mqtt::MessagePublisher;
use crate::simulation::PayloadBuilder;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Counts from one replay run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Data rows read from the file
    pub rows_read: u64,
    /// Rows skipped for an unusable timestamp
    pub rows_skipped: u64,
    /// Messages published
    pub published: u64,
    /// Messages dropped for missing or malformed values
    pub dropped: u64,
    /// Messages the broker client rejected
    pub failed: u64,
    /// Whether the run stopped on shutdown before the end of the file
    pub interrupted: bool,
}

/// Publishes every row of a filtered simulation file
pub struct ReplayPublisher {
    builder: PayloadBuilder,
    row_interval: Duration,
    metrics: Arc<IngestionMetrics>,
}

impl ReplayPublisher {
    pub fn new(config: &ReplayConfig, metrics: Arc<IngestionMetrics>) -> Self {
        Self {
            builder: PayloadBuilder::new(&config.layout, config.year),
            row_interval: config.row_interval(),
            metrics,
        }
    }

    /// Replay `csv_path` through `publisher`
    ///
    /// Zone messages go out before the row's site message. A row that cannot
    /// be decoded or has an unusable timestamp is skipped; a failed publish is
    /// logged and the replay continues.
    pub async fn run(
        &self,
        publisher: &dyn MessagePublisher,
        csv_path: &Path,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<ReplaySummary> {
        info!(path = %csv_path.display(), "Starting simulation replay");
        let started = Instant::now();

        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(csv_path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();

        let mut summary = ReplaySummary::default();
        let mut record = csv::StringRecord::new();

        loop {
            let read = reader.read_record(&mut record);
            if shutdown_requested(shutdown) {
                warn!(rows = summary.rows_read, "Replay interrupted by shutdown");
                summary.interrupted = true;
                break;
            }

            match read {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) if e.is_io_error() => return Err(e.into()),
                Err(e) => {
                    summary.rows_read += 1;
                    self.metrics.record_row_read();
                    warn!(row = summary.rows_read, error = %e, "Skipping unreadable row");
                    summary.rows_skipped += 1;
                    self.metrics.record_row_skipped();
                    continue;
                }
            }

            summary.rows_read += 1;
            self.metrics.record_row_read();

            let row: HashMap<String, String> = headers
                .iter()
                .cloned()
                .zip(record.iter().map(str::to_string))
                .collect();

            let payloads = match self.builder.build_row(&row) {
                Ok(payloads) => payloads,
                Err(e) => {
                    warn!(row = summary.rows_read, error = %e, "Skipping row");
                    summary.rows_skipped += 1;
                    self.metrics.record_row_skipped();
                    continue;
                }
            };
            summary.dropped += payloads.dropped as u64;

            for (topic, message) in payloads.messages() {
                let body = serde_json::to_vec(message)?;
                match publisher.publish(topic, body).await {
                    Ok(()) => {
                        summary.published += 1;
                        self.metrics.record_published();
                    }
                    Err(e) => {
                        summary.failed += 1;
                        self.metrics.record_publish_error();
                        error!(topic = %topic, time = %payloads.time, error = %e, "Failed to publish");
                    }
                }
            }
            debug!(time = %payloads.time, zones = payloads.zones.len(), "Published row");

            if !self.row_interval.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.row_interval) => {}
                    _ = shutdown.recv() => {
                        warn!(rows = summary.rows_read, "Replay interrupted by shutdown");
                        summary.interrupted = true;
                        break;
                    }
                }
            }
        }

        info!(
            rows = summary.rows_read,
            skipped = summary.rows_skipped,
            published = summary.published,
            dropped = summary.dropped,
            failed = summary.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Simulation replay complete"
        );
        Ok(summary)
    }
}

fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    use broadcast::error::TryRecvError;
    !matches!(shutdown.try_recv(), Err(TryRecvError::Empty))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MqttError;
    use crate::types::{MetricMessage, SITE_METRICS_TOPIC, THERMAL_ZONE_TOPIC};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::io::Write;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<(String, MetricMessage)>>,
        fail: bool,
    }

    #[async_trait]
    impl MessagePublisher for RecordingPublisher {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> std::result::Result<(), MqttError> {
            if self.fail {
                return Err(MqttError::NotConnected);
            }
            let message = serde_json::from_slice(&payload).unwrap();
            self.sent.lock().push((topic.to_string(), message));
            Ok(())
        }
    }

    const ZONE_SUFFIXES: [&str; 12] = [
        ":Zone Mean Air Temperature",
        ":Zone Operative Temperature",
        ":Zone Air Relative Humidity",
        ":Zone Air CO2 Concentration",
        ":Zone Infiltration Air Change Rate",
        ":Zone Mechanical Ventilation Air Changes per Hour",
        ":Zone Total Internal Latent Gain Energy",
        " IDEAL LOADS AIR:Zone Ideal Loads Supply Air Total Cooling Rate",
        " IDEAL LOADS AIR:Zone Ideal Loads Supply Air Total Heating Rate",
        ":Zone People Sensible Heating Rate",
        ":Zone Thermal Comfort Fanger Model PMV",
        ":Zone Thermal Comfort Fanger Model PPD",
    ];

    fn header_for(prefix: &str, suffix: &str) -> String {
        if suffix.starts_with(":Zone Thermal Comfort") {
            format!("PEOPLE {prefix}{suffix}")
        } else {
            format!("{prefix}{suffix}")
        }
    }

    fn write_filtered_csv(dir: &TempDir, times: &[&str]) -> std::path::PathBuf {
        let prefix = "BLOCK1:CORRIDORX1F";
        let mut headers = vec!["DateTime".to_string()];
        headers.extend(ZONE_SUFFIXES.iter().map(|s| header_for(prefix, s)));
        headers.extend(
            [
                "InteriorLights:Electricity",
                "Electricity:Facility",
                "Site Site Outdoor Air Drybulb Temperature",
                "Site Site Diffuse Solar Radiation Rate per Area",
                "Site Site Direct Solar Radiation Rate per Area",
            ]
            .map(String::from),
        );

        let path = dir.path().join("filtered.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", headers.join(",")).unwrap();
        for time in times {
            let values: Vec<String> = (1..headers.len()).map(|i| format!("{}.5", i)).collect();
            writeln!(file, "{},{}", time, values.join(",")).unwrap();
        }
        path
    }

    fn config() -> ReplayConfig {
        ReplayConfig::default()
    }

    #[tokio::test]
    async fn test_replay_publishes_zone_then_site() {
        let dir = TempDir::new().unwrap();
        let path = write_filtered_csv(&dir, &[" 01/01  01:00:00", " 01/01  24:00:00"]);
        let metrics = Arc::new(IngestionMetrics::new());
        let replay = ReplayPublisher::new(&config(), metrics.clone());
        let publisher = RecordingPublisher::default();
        let (_tx, mut rx) = broadcast::channel(1);

        let summary = replay.run(&publisher, &path, &mut rx).await.unwrap();
        assert_eq!(summary.rows_read, 2);
        assert_eq!(summary.published, 4);
        assert!(!summary.interrupted);

        let sent = publisher.sent.lock();
        assert_eq!(sent[0].0, THERMAL_ZONE_TOPIC);
        assert_eq!(sent[0].1.tags["zone_id"], "BLOCK1:CORRIDOR:X1F");
        assert_eq!(sent[0].1.fields["mean_air_temperature"], 1.5);
        assert_eq!(sent[1].0, SITE_METRICS_TOPIC);
        assert_eq!(sent[3].1.time, "2005-01-02T00:00:00Z");
        assert_eq!(metrics.snapshot().messages_published, 4);
    }

    #[tokio::test]
    async fn test_bad_timestamp_skips_row() {
        let dir = TempDir::new().unwrap();
        let path = write_filtered_csv(&dir, &["garbage", " 01/01  02:00:00"]);
        let metrics = Arc::new(IngestionMetrics::new());
        let replay = ReplayPublisher::new(&config(), metrics.clone());
        let publisher = RecordingPublisher::default();
        let (_tx, mut rx) = broadcast::channel(1);

        let summary = replay.run(&publisher, &path, &mut rx).await.unwrap();
        assert_eq!(summary.rows_skipped, 1);
        assert_eq!(summary.published, 2);
        assert_eq!(metrics.snapshot().rows_skipped, 1);
    }

    #[tokio::test]
    async fn test_undecodable_record_skips_row() {
        let dir = TempDir::new().unwrap();
        let path = write_filtered_csv(&dir, &[" 01/01  01:00:00"]);
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        let (header, row) = (lines.next().unwrap(), lines.next().unwrap());

        let mut bytes = format!("{header}\n{row}\n").into_bytes();
        bytes.extend_from_slice(b"\xff\xfe,1.5\n");
        bytes.extend_from_slice(format!("{}\n", row.replace("01:00:00", "02:00:00")).as_bytes());
        std::fs::write(&path, bytes).unwrap();

        let metrics = Arc::new(IngestionMetrics::new());
        let replay = ReplayPublisher::new(&config(), metrics.clone());
        let publisher = RecordingPublisher::default();
        let (_tx, mut rx) = broadcast::channel(1);

        let summary = replay.run(&publisher, &path, &mut rx).await.unwrap();
        assert_eq!(summary.rows_read, 3);
        assert_eq!(summary.rows_skipped, 1);
        assert_eq!(summary.published, 4);
        assert_eq!(metrics.snapshot().rows_skipped, 1);
    }

    #[tokio::test]
    async fn test_publish_failures_are_counted() {
        let dir = TempDir::new().unwrap();
        let path = write_filtered_csv(&dir, &[" 01/01  01:00:00"]);
        let replay = ReplayPublisher::new(&config(), Arc::new(IngestionMetrics::new()));
        let publisher = RecordingPublisher {
            fail: true,
            ..Default::default()
        };
        let (_tx, mut rx) = broadcast::channel(1);

        let summary = replay.run(&publisher, &path, &mut rx).await.unwrap();
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.published, 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_replay() {
        let dir = TempDir::new().unwrap();
        let path = write_filtered_csv(&dir, &[" 01/01  01:00:00", " 01/01  02:00:00"]);
        let replay = ReplayPublisher::new(&config(), Arc::new(IngestionMetrics::new()));
        let publisher = RecordingPublisher::default();
        let (tx, mut rx) = broadcast::channel(1);
        tx.send(()).unwrap();

        let summary = replay.run(&publisher, &path, &mut rx).await.unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.rows_read, 0);
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let replay = ReplayPublisher::new(&config(), Arc::new(IngestionMetrics::new()));
        let (_tx, mut rx) = broadcast::channel(1);
        let result = replay
            .run(&RecordingPublisher::default(), Path::new("/nonexistent/filtered.csv"), &mut rx)
            .await;
        assert!(result.is_err());
    }
}
