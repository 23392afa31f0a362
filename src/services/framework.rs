//! Service lifecycle framework
//!
//! Long-running parts of the pipeline implement [`Service`]. The
//! [`ServiceManager`] starts them in dependency order, restarts them
//! according to their [`RestartPolicy`] and fans a shutdown signal out to all
//! of them.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by services and the manager
#[derive(Error, Debug)]
pub enum ServiceError {
    /// A service stopped with an error
    #[error("{0}")]
    Failed(String),

    /// A service with this name is already registered
    #[error("service '{0}' is already registered")]
    AlreadyRegistered(&'static str),

    /// A dependency is not registered
    #[error("service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency {
        service: &'static str,
        dependency: &'static str,
    },

    /// Dependencies form a cycle
    #[error("dependency cycle between services: {0}")]
    DependencyCycle(String),
}

impl From<crate::error::Error> for ServiceError {
    fn from(e: crate::error::Error) -> Self {
        ServiceError::Failed(e.to_string())
    }
}

impl From<crate::error::MqttError> for ServiceError {
    fn from(e: crate::error::MqttError) -> Self {
        ServiceError::Failed(e.to_string())
    }
}

// ============================================================================
// Status and policy
// ============================================================================

/// Lifecycle state of a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Not running
    Stopped,
    /// Starting up (waiting on a delay or a connection)
    Starting,
    /// Running
    Running,
    /// Finished its work and exited cleanly
    Completed,
    /// Exited with an error
    Failed(String),
}

impl ServiceStatus {
    /// Whether the service is doing, or has done, what it should
    pub fn is_healthy(&self) -> bool {
        matches!(
            self,
            ServiceStatus::Starting | ServiceStatus::Running | ServiceStatus::Completed
        )
    }

    /// Short label for logs and JSON output
    pub fn label(&self) -> &'static str {
        match self {
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Running => "running",
            ServiceStatus::Completed => "completed",
            ServiceStatus::Failed(_) => "failed",
        }
    }
}

/// What the manager does when a service's `start` returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Never restart
    Never,
    /// Restart after an error, at most `max_retries` times
    OnFailure { max_retries: u32, backoff: Duration },
    /// Restart whenever the service exits before shutdown
    Always { backoff: Duration },
}

impl RestartPolicy {
    /// Backoff before the next attempt, or `None` to stop supervising
    fn next_attempt(&self, failed: bool, attempts: u32) -> Option<Duration> {
        match *self {
            RestartPolicy::Never => None,
            RestartPolicy::OnFailure {
                max_retries,
                backoff,
            } => (failed && attempts < max_retries).then_some(backoff),
            RestartPolicy::Always { backoff } => Some(backoff),
        }
    }
}

// ============================================================================
// Service trait
// ============================================================================

/// A long-running unit of work
#[async_trait::async_trait]
pub trait Service: Send + Sync {
    /// Run until done or until `shutdown` fires
    async fn start(&self, shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError>;

    /// Unique service name
    fn name(&self) -> &'static str;

    /// Current status
    fn status(&self) -> ServiceStatus;

    /// Services that must be started first
    fn dependencies(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Restart behavior
    fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy::Never
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Starts, supervises and stops a set of services
pub struct ServiceManager {
    services: RwLock<Vec<Arc<dyn Service>>>,
    handles: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    shutdown_tx: broadcast::Sender<()>,
    shutting_down: Arc<AtomicBool>,
}

impl ServiceManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            services: RwLock::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            shutdown_tx,
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Add a service; names must be unique
    pub fn register(&self, service: Arc<dyn Service>) -> Result<(), ServiceError> {
        let mut services = self.services.write();
        if services.iter().any(|s| s.name() == service.name()) {
            return Err(ServiceError::AlreadyRegistered(service.name()));
        }
        services.push(service);
        Ok(())
    }

    /// A receiver for the manager's shutdown signal
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Registration order rearranged so dependencies come first
    pub fn start_order(&self) -> Result<Vec<&'static str>, ServiceError> {
        let services = self.services.read();
        let names: Vec<&'static str> = services.iter().map(|s| s.name()).collect();
        let deps: Vec<(&'static str, Vec<&'static str>)> =
            services.iter().map(|s| (s.name(), s.dependencies())).collect();
        topological_order(&names, &deps).map_err(ServiceError::from)
    }

    /// Spawn every service under supervision, dependencies first
    pub fn start_all(&self) -> Result<(), ServiceError> {
        let order = self.start_order()?;
        let services = self.services.read().clone();
        let mut handles = self.handles.lock();

        for name in order {
            let Some(service) = services.iter().find(|s| s.name() == name) else {
                continue;
            };
            tracing::info!(service = name, "Starting service");
            let handle = tokio::spawn(supervise(
                Arc::clone(service),
                self.shutdown_tx.clone(),
                Arc::clone(&self.shutting_down),
            ));
            handles.push((name, handle));
        }
        Ok(())
    }

    /// Status of every registered service
    pub fn status(&self) -> Vec<(&'static str, ServiceStatus)> {
        self.services
            .read()
            .iter()
            .map(|s| (s.name(), s.status()))
            .collect()
    }

    /// Whether every service reports a healthy status
    pub fn is_healthy(&self) -> bool {
        self.services.read().iter().all(|s| s.status().is_healthy())
    }

    /// Signal shutdown and wait up to `timeout` for services to stop
    pub async fn shutdown(&self, timeout: Duration) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());

        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for (name, handle) in handles {
            let abort = handle.abort_handle();
            match tokio::time::timeout(timeout, handle).await {
                Ok(_) => tracing::debug!(service = name, "Service stopped"),
                Err(_) => {
                    tracing::warn!(service = name, "Service did not stop in time, aborting");
                    abort.abort();
                }
            }
        }
    }
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a service, restarting it per its policy until shutdown
async fn supervise(
    service: Arc<dyn Service>,
    shutdown_tx: broadcast::Sender<()>,
    shutting_down: Arc<AtomicBool>,
) {
    let name = service.name();
    let policy = service.restart_policy();
    let mut attempts = 0u32;

    loop {
        let result = service.start(shutdown_tx.subscribe()).await;
        if shutting_down.load(Ordering::SeqCst) {
            break;
        }

        let failed = match &result {
            Ok(()) => false,
            Err(e) => {
                tracing::error!(service = name, error = %e, "Service failed");
                true
            }
        };

        let Some(backoff) = policy.next_attempt(failed, attempts) else {
            if !failed {
                tracing::info!(service = name, "Service finished");
            }
            break;
        };
        attempts += 1;
        tracing::warn!(
            service = name,
            attempt = attempts,
            backoff_ms = backoff.as_millis() as u64,
            "Restarting service"
        );

        let mut shutdown = shutdown_tx.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.recv() => break,
        }
    }
}

/// Why no start order exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderError<'a> {
    /// `service` depends on a name that isn't in the set
    UnknownDependency { service: &'a str, dependency: &'a str },
    /// Names left over once no more progress is possible
    Cycle(Vec<&'a str>),
}

impl From<OrderError<'static>> for ServiceError {
    fn from(e: OrderError<'static>) -> Self {
        match e {
            OrderError::UnknownDependency {
                service,
                dependency,
            } => ServiceError::UnknownDependency {
                service,
                dependency,
            },
            OrderError::Cycle(stuck) => ServiceError::DependencyCycle(stuck.join(", ")),
        }
    }
}

/// Kahn's algorithm over `names`; ties keep the order of `names`
///
/// Shared by the service manager and the deployment model. A name listed
/// twice is ordered once.
pub fn topological_order<'a>(
    names: &[&'a str],
    deps: &[(&'a str, Vec<&'a str>)],
) -> Result<Vec<&'a str>, OrderError<'a>> {
    let mut unique = Vec::with_capacity(names.len());
    for &name in names {
        if !unique.contains(&name) {
            unique.push(name);
        }
    }
    let names = unique.as_slice();

    let mut in_degree: HashMap<&'a str, usize> = names.iter().map(|n| (*n, 0)).collect();
    let mut dependents: HashMap<&'a str, Vec<&'a str>> = HashMap::new();

    for &(service, ref requires) in deps {
        for &dependency in requires {
            if !in_degree.contains_key(dependency) {
                return Err(OrderError::UnknownDependency {
                    service,
                    dependency,
                });
            }
            *in_degree.entry(service).or_default() += 1;
            dependents.entry(dependency).or_default().push(service);
        }
    }

    let mut ready: VecDeque<&'a str> =
        names.iter().copied().filter(|n| in_degree[n] == 0).collect();
    let mut order = Vec::with_capacity(names.len());

    while let Some(name) = ready.pop_front() {
        order.push(name);
        let mut unlocked = Vec::new();
        for &dependent in dependents.get(name).into_iter().flatten() {
            let degree = in_degree.entry(dependent).or_default();
            *degree -= 1;
            if *degree == 0 {
                unlocked.push(dependent);
            }
        }
        unlocked.sort_by_key(|n| names.iter().position(|m| m == n));
        ready.extend(unlocked);
    }

    if order.len() != names.len() {
        let stuck: Vec<&'a str> = names
            .iter()
            .copied()
            .filter(|n| !order.contains(n))
            .collect();
        return Err(OrderError::Cycle(stuck));
    }
    Ok(order)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct Flaky {
        name: &'static str,
        deps: Vec<&'static str>,
        runs: AtomicU32,
        fail_times: u32,
        policy: RestartPolicy,
        status: RwLock<ServiceStatus>,
    }

    impl Flaky {
        fn new(name: &'static str, fail_times: u32, policy: RestartPolicy) -> Self {
            Self {
                name,
                deps: Vec::new(),
                runs: AtomicU32::new(0),
                fail_times,
                policy,
                status: RwLock::new(ServiceStatus::Stopped),
            }
        }
    }

    #[async_trait::async_trait]
    impl Service for Flaky {
        async fn start(&self, _shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            if run < self.fail_times {
                *self.status.write() = ServiceStatus::Failed("boom".into());
                return Err(ServiceError::Failed("boom".into()));
            }
            *self.status.write() = ServiceStatus::Completed;
            Ok(())
        }

        fn name(&self) -> &'static str {
            self.name
        }

        fn status(&self) -> ServiceStatus {
            self.status.read().clone()
        }

        fn dependencies(&self) -> Vec<&'static str> {
            self.deps.clone()
        }

        fn restart_policy(&self) -> RestartPolicy {
            self.policy
        }
    }

    #[test]
    fn test_status_health() {
        assert!(ServiceStatus::Running.is_healthy());
        assert!(ServiceStatus::Completed.is_healthy());
        assert!(!ServiceStatus::Stopped.is_healthy());
        assert!(!ServiceStatus::Failed("x".into()).is_healthy());
        assert_eq!(ServiceStatus::Failed("x".into()).label(), "failed");
    }

    #[test]
    fn test_restart_policy() {
        let backoff = Duration::from_millis(5);
        assert_eq!(RestartPolicy::Never.next_attempt(true, 0), None);

        let on_failure = RestartPolicy::OnFailure {
            max_retries: 2,
            backoff,
        };
        assert_eq!(on_failure.next_attempt(true, 1), Some(backoff));
        assert_eq!(on_failure.next_attempt(true, 2), None);
        assert_eq!(on_failure.next_attempt(false, 0), None);

        assert_eq!(RestartPolicy::Always { backoff }.next_attempt(false, 9), Some(backoff));
    }

    #[test]
    fn test_topological_order() {
        let names = ["replay", "ingest", "health"];
        let deps = vec![
            ("replay", vec!["ingest"]),
            ("ingest", vec![]),
            ("health", vec![]),
        ];
        assert_eq!(
            topological_order(&names, &deps).unwrap(),
            vec!["ingest", "health", "replay"]
        );

        let cyclic = vec![("replay", vec!["ingest"]), ("ingest", vec!["replay"])];
        assert!(matches!(
            topological_order(&["replay", "ingest"], &cyclic),
            Err(OrderError::Cycle(_))
        ));

        let unknown = vec![("replay", vec!["broker"])];
        assert_eq!(
            topological_order(&["replay"], &unknown),
            Err(OrderError::UnknownDependency {
                service: "replay",
                dependency: "broker"
            })
        );
    }

    #[test]
    fn test_topological_order_repeated_name() {
        let names = ["influxdb", "grafana", "grafana"];
        let deps = vec![
            ("influxdb", vec![]),
            ("grafana", vec!["influxdb"]),
            ("grafana", vec!["influxdb"]),
        ];
        assert_eq!(
            topological_order(&names, &deps).unwrap(),
            vec!["influxdb", "grafana"]
        );
    }

    #[test]
    fn test_duplicate_registration() {
        let manager = ServiceManager::new();
        manager
            .register(Arc::new(Flaky::new("a", 0, RestartPolicy::Never)))
            .unwrap();
        assert!(matches!(
            manager.register(Arc::new(Flaky::new("a", 0, RestartPolicy::Never))),
            Err(ServiceError::AlreadyRegistered("a"))
        ));
    }

    #[tokio::test]
    async fn test_restart_on_failure() {
        let manager = ServiceManager::new();
        let flaky = Arc::new(Flaky::new(
            "flaky",
            2,
            RestartPolicy::OnFailure {
                max_retries: 5,
                backoff: Duration::from_millis(5),
            },
        ));
        manager.register(flaky.clone()).unwrap();
        manager.start_all().unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(flaky.runs.load(Ordering::SeqCst), 3);
        assert_eq!(flaky.status(), ServiceStatus::Completed);
        assert!(manager.is_healthy());
        manager.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let manager = ServiceManager::new();
        let flaky = Arc::new(Flaky::new(
            "flaky",
            10,
            RestartPolicy::OnFailure {
                max_retries: 1,
                backoff: Duration::from_millis(5),
            },
        ));
        manager.register(flaky.clone()).unwrap();
        manager.start_all().unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(flaky.runs.load(Ordering::SeqCst), 2);
        assert!(!manager.is_healthy());
        assert_eq!(manager.status()[0].1.label(), "failed");
        manager.shutdown(Duration::from_secs(1)).await;
    }
}
