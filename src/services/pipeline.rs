//! Pipeline services: MQTT ingestion and simulation replay

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::config::{MqttConfig, ReplayConfig};
use crate::ingest::{IngestionMetrics, MetricSink};
use crate::mqtt::{MqttPublisher, MqttSubscriber};
use crate::replay::{ReplayPublisher, ReplaySummary};
use crate::store::MetricStore;
use crate::types::Measurement;

use super::framework::{RestartPolicy, Service, ServiceError, ServiceStatus};

// ============================================================================
// Ingest
// ============================================================================

/// Subscribes to both metric topics and writes every message to the store
pub struct IngestService {
    subscriber: MqttSubscriber,
    status: RwLock<ServiceStatus>,
}

impl IngestService {
    pub fn new(
        mqtt: &MqttConfig,
        store: Arc<dyn MetricStore>,
        metrics: Arc<IngestionMetrics>,
    ) -> Self {
        let topics = Measurement::all()
            .iter()
            .map(|m| m.topic().to_string())
            .collect();
        let sink = Arc::new(MetricSink::new(store, metrics));
        Self {
            subscriber: MqttSubscriber::new(mqtt, topics, sink),
            status: RwLock::new(ServiceStatus::Stopped),
        }
    }

    /// Broker session flag for health checks
    pub fn connection_flag(&self) -> Arc<AtomicBool> {
        self.subscriber.connection_flag()
    }
}

#[async_trait::async_trait]
impl Service for IngestService {
    async fn start(&self, shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError> {
        *self.status.write() = ServiceStatus::Running;
        let result = self.subscriber.run(shutdown).await;
        *self.status.write() = match &result {
            Ok(()) => ServiceStatus::Stopped,
            Err(e) => ServiceStatus::Failed(e.to_string()),
        };
        result.map_err(ServiceError::from)
    }

    fn name(&self) -> &'static str {
        "ingest"
    }

    fn status(&self) -> ServiceStatus {
        self.status.read().clone()
    }

    fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy::OnFailure {
            max_retries: 5,
            backoff: Duration::from_secs(5),
        }
    }
}

// ============================================================================
// Replay
// ============================================================================

/// Replays a filtered simulation file once, after a start delay
pub struct ReplayService {
    mqtt: MqttConfig,
    replay: ReplayPublisher,
    csv_path: PathBuf,
    start_delay: Duration,
    after: Vec<&'static str>,
    status: RwLock<ServiceStatus>,
    summary: RwLock<Option<ReplaySummary>>,
}

impl ReplayService {
    pub fn new(
        mqtt: &MqttConfig,
        replay: &ReplayConfig,
        csv_path: PathBuf,
        metrics: Arc<IngestionMetrics>,
    ) -> Self {
        Self {
            mqtt: mqtt.clone(),
            replay: ReplayPublisher::new(replay, metrics),
            csv_path,
            start_delay: replay.start_delay(),
            after: Vec::new(),
            status: RwLock::new(ServiceStatus::Stopped),
            summary: RwLock::new(None),
        }
    }

    /// Start only after `service` has been started
    pub fn after(mut self, service: &'static str) -> Self {
        self.after.push(service);
        self
    }

    /// Counts from the finished replay
    pub fn summary(&self) -> Option<ReplaySummary> {
        *self.summary.read()
    }

    async fn run_once(&self, shutdown: &mut broadcast::Receiver<()>) -> Result<(), ServiceError> {
        if !self.start_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.start_delay) => {}
                _ = shutdown.recv() => return Ok(()),
            }
        }

        let publisher = MqttPublisher::connect(&self.mqtt).await?;
        let result = self.replay.run(&publisher, &self.csv_path, shutdown).await;
        publisher.disconnect().await;

        *self.summary.write() = Some(result?);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Service for ReplayService {
    async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError> {
        *self.status.write() = ServiceStatus::Starting;
        let result = self.run_once(&mut shutdown).await;
        *self.status.write() = match &result {
            Ok(()) => ServiceStatus::Completed,
            Err(e) => ServiceStatus::Failed(e.to_string()),
        };
        result
    }

    fn name(&self) -> &'static str {
        "replay"
    }

    fn status(&self) -> ServiceStatus {
        self.status.read().clone()
    }

    fn dependencies(&self) -> Vec<&'static str> {
        self.after.clone()
    }
}
