//! Health Check Service
//!
//! Performs periodic health checks on the pipeline:
//! - Store health (the backend answers `ping`)
//! - Broker health (the MQTT session is up)
//! - Service health (every supervised service is running or done)

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant};

use crate::config::HealthSettings;
use crate::store::MetricStore;

use super::framework::{RestartPolicy, Service, ServiceError, ServiceStatus};
use super::ServiceManager;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the health check service
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Interval between health checks
    pub check_interval: Duration,

    /// Timeout for individual health checks
    pub check_timeout: Duration,

    /// Number of consecutive failures before a check is reported failing
    pub failure_threshold: u32,

    /// Number of consecutive successes to recover
    pub recovery_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self::from(&HealthSettings::default())
    }
}

impl From<&HealthSettings> for HealthConfig {
    fn from(settings: &HealthSettings) -> Self {
        Self {
            check_interval: Duration::from_secs(settings.check_interval_secs.max(1)),
            check_timeout: Duration::from_secs(settings.check_timeout_secs.max(1)),
            failure_threshold: settings.failure_threshold.max(1),
            recovery_threshold: settings.recovery_threshold.max(1),
        }
    }
}

// ============================================================================
// Health Status
// ============================================================================

/// Overall health status of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Everything passes
    Healthy,

    /// Some checks fail but the pipeline still works
    Degraded,

    /// Most checks fail
    Unhealthy,

    /// Checks haven't run yet
    Unknown,
}

impl HealthStatus {
    /// Check if the status indicates the pipeline is operational
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    /// Check if the status indicates the pipeline is fully healthy
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

// ============================================================================
// Individual Check Results
// ============================================================================

/// Result of a single health check
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    /// Name of the check
    pub name: String,

    /// Whether the check passed
    pub passed: bool,

    /// Failure details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Duration of the check
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl CheckResult {
    /// Create a passing check result
    pub fn pass(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: None,
            duration,
        }
    }

    /// Create a failing check result
    pub fn fail(name: impl Into<String>, message: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: Some(message.into()),
            duration,
        }
    }
}

// ============================================================================
// Health Report
// ============================================================================

/// Complete health report with all check results
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Overall health status
    pub status: HealthStatus,

    /// Individual check results
    pub checks: Vec<CheckResult>,

    /// When the report was generated
    pub generated_at: Instant,

    /// Total duration of all checks
    pub total_duration: Duration,
}

impl Default for HealthReport {
    fn default() -> Self {
        Self {
            status: HealthStatus::Unknown,
            checks: Vec::new(),
            generated_at: Instant::now(),
            total_duration: Duration::ZERO,
        }
    }
}

impl HealthReport {
    /// Create a new health report from check results
    ///
    /// No failures is healthy, fewer than half failing is degraded, anything
    /// else is unhealthy.
    pub fn from_checks(checks: Vec<CheckResult>) -> Self {
        let total_duration = checks.iter().map(|c| c.duration).sum();
        let failed_count = checks.iter().filter(|c| !c.passed).count();

        let status = if failed_count == 0 {
            HealthStatus::Healthy
        } else if failed_count * 2 < checks.len() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        Self {
            status,
            checks,
            generated_at: Instant::now(),
            total_duration,
        }
    }

    /// Get all failed checks
    pub fn failed_checks(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }

    /// Get all passed checks
    pub fn passed_checks(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| c.passed).collect()
    }
}

// ============================================================================
// Health Checker Service
// ============================================================================

/// Background service for performing health checks
///
/// The store is always checked. The broker and service checks run only when
/// a connection flag or a service manager has been attached, so the API
/// process (which has neither) reports on the store alone.
pub struct HealthChecker {
    /// Configuration
    config: HealthConfig,

    /// Store to ping
    store: Arc<dyn MetricStore>,

    /// MQTT subscriber connection flag
    mqtt_connected: Option<Arc<AtomicBool>>,

    /// Service manager reference (optional, for service health checks)
    service_manager: Option<Arc<ServiceManager>>,

    /// Current service status
    status: RwLock<ServiceStatus>,

    /// Latest health report
    report: RwLock<HealthReport>,

    /// Consecutive failure counts per check
    failure_counts: RwLock<HashMap<String, u32>>,

    /// Consecutive success counts per check
    success_counts: RwLock<HashMap<String, u32>>,

    /// Checks past the failure threshold and not yet recovered
    failing: RwLock<HashSet<String>>,
}

impl HealthChecker {
    /// Create a new health checker service
    pub fn new(config: HealthConfig, store: Arc<dyn MetricStore>) -> Self {
        Self {
            config,
            store,
            mqtt_connected: None,
            service_manager: None,
            status: RwLock::new(ServiceStatus::Stopped),
            report: RwLock::new(HealthReport::default()),
            failure_counts: RwLock::new(HashMap::new()),
            success_counts: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
        }
    }

    /// Create with default configuration
    pub fn with_store(store: Arc<dyn MetricStore>) -> Self {
        Self::new(HealthConfig::default(), store)
    }

    /// Also check the MQTT session through its connection flag
    pub fn with_mqtt(mut self, connected: Arc<AtomicBool>) -> Self {
        self.mqtt_connected = Some(connected);
        self
    }

    /// Set the service manager for service health checks
    pub fn with_service_manager(mut self, manager: Arc<ServiceManager>) -> Self {
        self.service_manager = Some(manager);
        self
    }

    /// Name of the store backend being checked
    pub fn store_backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Get the latest health report
    pub fn report(&self) -> HealthReport {
        self.report.read().clone()
    }

    /// Get the current health status
    pub fn health_status(&self) -> HealthStatus {
        self.report.read().status
    }

    /// Check if the pipeline is healthy
    pub fn is_healthy(&self) -> bool {
        self.report.read().status.is_healthy()
    }

    /// Check if the pipeline is operational (healthy or degraded)
    pub fn is_operational(&self) -> bool {
        self.report.read().status.is_operational()
    }

    /// Run all health checks now and update the report
    pub async fn check_now(&self) -> HealthReport {
        let start = Instant::now();
        let mut checks = vec![self.check_store().await];

        if self.mqtt_connected.is_some() {
            checks.push(self.check_mqtt());
        }
        if self.service_manager.is_some() {
            checks.push(self.check_services());
        }

        self.update_check_counters(&checks);
        let report = HealthReport::from_checks(checks);
        *self.report.write() = report.clone();

        tracing::debug!(
            status = ?report.status,
            duration_ms = start.elapsed().as_millis() as u64,
            "Health check completed"
        );
        report
    }

    /// Check that the store answers within the timeout
    async fn check_store(&self) -> CheckResult {
        let start = Instant::now();
        match tokio::time::timeout(self.config.check_timeout, self.store.ping()).await {
            Ok(Ok(())) => CheckResult::pass("store", start.elapsed()),
            Ok(Err(e)) => CheckResult::fail("store", e.to_string(), start.elapsed()),
            Err(_) => CheckResult::fail(
                "store",
                format!("no answer within {:?}", self.config.check_timeout),
                start.elapsed(),
            ),
        }
    }

    /// Check the MQTT session flag
    fn check_mqtt(&self) -> CheckResult {
        let start = Instant::now();
        match &self.mqtt_connected {
            Some(flag) if !flag.load(Ordering::Relaxed) => {
                CheckResult::fail("mqtt", "not connected to broker", start.elapsed())
            }
            _ => CheckResult::pass("mqtt", start.elapsed()),
        }
    }

    /// Check that all services are healthy
    fn check_services(&self) -> CheckResult {
        let start = Instant::now();

        if let Some(ref manager) = self.service_manager {
            if manager.is_healthy() {
                CheckResult::pass("services", start.elapsed())
            } else {
                let statuses = manager.status();
                let unhealthy: Vec<_> = statuses
                    .iter()
                    .filter(|(_, s)| !s.is_healthy())
                    .map(|(n, _)| *n)
                    .collect();

                CheckResult::fail(
                    "services",
                    format!("Unhealthy services: {}", unhealthy.join(", ")),
                    start.elapsed(),
                )
            }
        } else {
            CheckResult::pass("services", start.elapsed())
        }
    }

    /// Update consecutive failure/success counts and log threshold crossings
    fn update_check_counters(&self, checks: &[CheckResult]) {
        let mut failures = self.failure_counts.write();
        let mut successes = self.success_counts.write();
        let mut failing = self.failing.write();

        for check in checks {
            if check.passed {
                failures.remove(&check.name);
                let count = successes.entry(check.name.clone()).or_insert(0);
                *count += 1;
                if *count >= self.config.recovery_threshold && failing.remove(&check.name) {
                    tracing::info!(check = %check.name, "Health check recovered");
                }
            } else {
                successes.remove(&check.name);
                let count = failures.entry(check.name.clone()).or_insert(0);
                *count += 1;
                if *count >= self.config.failure_threshold && failing.insert(check.name.clone()) {
                    tracing::warn!(
                        check = %check.name,
                        failures = *count,
                        message = check.message.as_deref().unwrap_or(""),
                        "Health check failing"
                    );
                }
            }
        }
    }

    /// Get consecutive failure count for a check
    pub fn failure_count(&self, check_name: &str) -> u32 {
        self.failure_counts
            .read()
            .get(check_name)
            .copied()
            .unwrap_or(0)
    }

    /// Check if a specific check has crossed the failure threshold and not recovered
    pub fn is_check_failing(&self, check_name: &str) -> bool {
        self.failing.read().contains(check_name)
    }
}

#[async_trait::async_trait]
impl Service for HealthChecker {
    async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError> {
        *self.status.write() = ServiceStatus::Running;
        tracing::info!(
            interval_secs = self.config.check_interval.as_secs(),
            "Health checker started"
        );

        // The first tick fires immediately
        let mut check_interval = interval(self.config.check_interval);

        loop {
            tokio::select! {
                result = shutdown.recv() => {
                    match result {
                        Ok(()) | Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!("Health checker received shutdown signal");
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::debug!(missed = n, "Health checker broadcast receiver lagged");
                        }
                    }
                }

                _ = check_interval.tick() => {
                    let report = self.check_now().await;
                    if !report.status.is_healthy() {
                        tracing::warn!(
                            status = ?report.status,
                            failed = report.failed_checks().len(),
                            "Pipeline health degraded"
                        );
                    }
                }
            }
        }

        *self.status.write() = ServiceStatus::Stopped;
        tracing::info!("Health checker stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "health"
    }

    fn status(&self) -> ServiceStatus {
        self.status.read().clone()
    }

    fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy::Always {
            backoff: Duration::from_secs(10),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
