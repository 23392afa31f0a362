//! Deployment topology
//!
//! Models the containers the pipeline runs in so the layout can be checked
//! and the compose file rendered from one definition.
//!
//! ```text
//!            ┌─────────┐ MQTT ┌───────────┐
//!            │   api   │─────▶│ mosquitto │
//!            └─────────┘      └───────────┘
//!                 │ HTTP
//!                 ▼
//!            ┌──────────┐     ┌─────────┐
//!            │ influxdb │◀────│ grafana │  (depends_on: influxdb)
//!            └──────────┘     └─────────┘
//! ```
//!
//! All four share one bridge network and restart `unless-stopped`.
//! `depends_on` orders container start only; nothing waits for readiness.

pub mod compose;

use crate::error::StackError;
use crate::services::{topological_order, OrderError};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Environment keys treated as secrets
const SECRET_MARKERS: [&str; 3] = ["PASSWORD", "TOKEN", "SECRET"];

// =============================================================================
// Model
// =============================================================================

/// Transport of a published port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// `host:container` port publication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
    pub protocol: Protocol,
}

impl PortMapping {
    /// Same port on host and container, TCP
    pub fn tcp(port: u16) -> Self {
        Self {
            host: port,
            container: port,
            protocol: Protocol::Tcp,
        }
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.container)?;
        if self.protocol != Protocol::Tcp {
            write!(f, "/{}", self.protocol.as_str())?;
        }
        Ok(())
    }
}

/// Volume or bind mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    /// Named volume or host path
    pub source: String,
    /// Path inside the container
    pub target: String,
}

impl VolumeMount {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Whether the source names a managed volume rather than a host path
    pub fn is_named(&self) -> bool {
        !(self.source.starts_with('.') || self.source.starts_with('/') || self.source.starts_with('~'))
    }
}

impl fmt::Display for VolumeMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.target)
    }
}

/// Container restart policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    No,
    Always,
    OnFailure,
    #[default]
    UnlessStopped,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::Always => "always",
            RestartPolicy::OnFailure => "on-failure",
            RestartPolicy::UnlessStopped => "unless-stopped",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "no" => Some(RestartPolicy::No),
            "always" => Some(RestartPolicy::Always),
            "on-failure" => Some(RestartPolicy::OnFailure),
            "unless-stopped" => Some(RestartPolicy::UnlessStopped),
            _ => None,
        }
    }
}

/// One container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    /// Registry image
    pub image: Option<String>,
    /// Build context, for images built from this repository
    pub build: Option<String>,
    pub container_name: Option<String>,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<VolumeMount>,
    /// Passed to the container exactly as declared
    pub environment: Vec<(String, String)>,
    pub depends_on: Vec<String>,
    pub restart: RestartPolicy,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            container_name: Some(name.clone()),
            name,
            ..Default::default()
        }
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn build(mut self, context: impl Into<String>) -> Self {
        self.build = Some(context.into());
        self
    }

    pub fn port(mut self, port: PortMapping) -> Self {
        self.ports.push(port);
        self
    }

    pub fn volume(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.volumes.push(VolumeMount::new(source, target));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.push((key.into(), value.into()));
        self
    }

    pub fn depends_on(mut self, service: impl Into<String>) -> Self {
        self.depends_on.push(service.into());
        self
    }
}

/// Values used to build the reference stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSettings {
    pub network: String,
    pub api_port: u16,
    pub org: String,
    pub bucket: String,
    pub influx_admin_user: String,
    /// Variable holding the InfluxDB admin password
    pub influx_password_var: String,
    /// Variable holding the InfluxDB admin token
    pub influx_token_var: String,
    pub grafana_admin_user: String,
    /// Variable holding the Grafana admin password
    pub grafana_password_var: String,
    pub grafana_plugins: Vec<String>,
}

impl Default for StackSettings {
    fn default() -> Self {
        Self {
            network: "building-net".to_string(),
            api_port: 8000,
            org: "gp2".to_string(),
            bucket: "gp2".to_string(),
            influx_admin_user: "admin".to_string(),
            influx_password_var: "INFLUXDB_PASSWORD".to_string(),
            influx_token_var: "INFLUXDB_TOKEN".to_string(),
            grafana_admin_user: "admin".to_string(),
            grafana_password_var: "GRAFANA_PASSWORD".to_string(),
            grafana_plugins: vec![
                "grafana-clock-panel".to_string(),
                "grafana-simple-json-datasource".to_string(),
            ],
        }
    }
}

fn var_ref(name: &str) -> String {
    format!("${{{name}}}")
}

/// Whole deployment: services on one network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSpec {
    pub network: String,
    pub services: Vec<ServiceSpec>,
}

impl StackSpec {
    /// API, broker, store and dashboard, wired the way `deploy/` ships them
    pub fn reference(settings: &StackSettings) -> Self {
        let api = ServiceSpec::new("api")
            .build("..")
            .port(PortMapping::tcp(settings.api_port))
            .env("MQTT_BROKER", "mosquitto")
            .env("MQTT_PORT", "1883")
            .env("INFLUXDB_URL", "http://influxdb:8086")
            .env("INFLUXDB_TOKEN", var_ref(&settings.influx_token_var))
            .env("INFLUXDB_ORG", settings.org.as_str())
            .env("INFLUXDB_BUCKET", settings.bucket.as_str())
            .env("API_LISTEN_ADDR", format!("0.0.0.0:{}", settings.api_port))
            .env("RUST_LOG", "building_telemetry=info");

        let mosquitto = ServiceSpec::new("mosquitto")
            .image("eclipse-mosquitto:2")
            .port(PortMapping::tcp(1883))
            .volume("./mosquitto/config", "/mosquitto/config")
            .volume("./mosquitto/data", "/mosquitto/data")
            .volume("./mosquitto/log", "/mosquitto/log");

        let influxdb = ServiceSpec::new("influxdb")
            .image("influxdb:2.7")
            .port(PortMapping::tcp(8086))
            .volume("influxdb-data", "/var/lib/influxdb2")
            .volume("influxdb-config", "/etc/influxdb2")
            .env("DOCKER_INFLUXDB_INIT_MODE", "setup")
            .env("DOCKER_INFLUXDB_INIT_USERNAME", settings.influx_admin_user.as_str())
            .env("DOCKER_INFLUXDB_INIT_PASSWORD", var_ref(&settings.influx_password_var))
            .env("DOCKER_INFLUXDB_INIT_ORG", settings.org.as_str())
            .env("DOCKER_INFLUXDB_INIT_BUCKET", settings.bucket.as_str())
            .env("DOCKER_INFLUXDB_INIT_ADMIN_TOKEN", var_ref(&settings.influx_token_var));

        let grafana = ServiceSpec::new("grafana")
            .image("grafana/grafana:10.4.2")
            .port(PortMapping::tcp(3000))
            .volume("grafana-data", "/var/lib/grafana")
            .volume("./grafana/provisioning", "/etc/grafana/provisioning")
            .env("GF_SECURITY_ADMIN_USER", settings.grafana_admin_user.as_str())
            .env("GF_SECURITY_ADMIN_PASSWORD", var_ref(&settings.grafana_password_var))
            .env("GF_INSTALL_PLUGINS", settings.grafana_plugins.join(","))
            .env("INFLUXDB_TOKEN", var_ref(&settings.influx_token_var))
            .depends_on("influxdb");

        Self {
            network: settings.network.clone(),
            services: vec![api, mosquitto, influxdb, grafana],
        }
    }

    /// Look up a service by name
    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Environment handed to a container, unmodified
    pub fn environment(&self, service: &str) -> Option<&[(String, String)]> {
        self.service(service).map(|s| s.environment.as_slice())
    }

    /// Container start order honoring `depends_on`
    ///
    /// Ties keep declaration order.
    pub fn start_order(&self) -> Result<Vec<&str>, StackError> {
        let names: Vec<&str> = self.services.iter().map(|s| s.name.as_str()).collect();
        let deps: Vec<(&str, Vec<&str>)> = self
            .services
            .iter()
            .map(|s| (s.name.as_str(), s.depends_on.iter().map(String::as_str).collect()))
            .collect();

        topological_order(&names, &deps).map_err(|e| match e {
            OrderError::UnknownDependency {
                service,
                dependency,
            } => StackError::UnknownDependency {
                service: service.to_string(),
                dependency: dependency.to_string(),
            },
            OrderError::Cycle(stuck) => StackError::DependencyCycle(stuck.join(", ")),
        })
    }

    /// Problems in the declared topology
    pub fn validate(&self) -> Vec<StackIssue> {
        let mut issues = Vec::new();

        let mut seen = HashSet::new();
        for service in &self.services {
            if !seen.insert(service.name.as_str()) {
                issues.push(StackIssue::error(&service.name, "service name declared more than once"));
            }
            if service.image.is_none() && service.build.is_none() {
                issues.push(StackIssue::error(&service.name, "needs an image or a build context"));
            }
        }

        let mut dangling = false;
        for service in &self.services {
            for dependency in &service.depends_on {
                if !seen.contains(dependency.as_str()) {
                    dangling = true;
                    issues.push(StackIssue::error(
                        &service.name,
                        format!("depends on unknown service '{dependency}'"),
                    ));
                }
            }
        }
        if !dangling {
            if let Err(e) = self.start_order() {
                issues.push(StackIssue {
                    severity: Severity::Error,
                    service: None,
                    message: e.to_string(),
                });
            }
        }

        let mut bound: HashMap<(u16, Protocol), &str> = HashMap::new();
        for service in &self.services {
            for port in &service.ports {
                if let Some(owner) = bound.insert((port.host, port.protocol), service.name.as_str()) {
                    issues.push(StackIssue::error(
                        &service.name,
                        format!(
                            "host port {}/{} already published by '{owner}'",
                            port.host,
                            port.protocol.as_str()
                        ),
                    ));
                }
            }
        }

        for service in &self.services {
            for (key, value) in &service.environment {
                let upper = key.to_ascii_uppercase();
                let secret = SECRET_MARKERS.iter().any(|m| upper.contains(m));
                if secret && !is_var_ref(value) {
                    issues.push(StackIssue::warning(
                        &service.name,
                        format!("{key} is set in plaintext; reference a variable instead"),
                    ));
                }
            }
        }

        issues
    }
}

/// `${VAR}` or `${VAR:-default}` style reference
fn is_var_ref(value: &str) -> bool {
    let value = value.trim();
    value.starts_with("${") && value.ends_with('}') && value.len() > 3
}

// =============================================================================
// Validation Results
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

/// One finding from [`StackSpec::validate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackIssue {
    pub severity: Severity,
    /// Service the issue belongs to, if any
    pub service: Option<String>,
    pub message: String,
}

impl StackIssue {
    fn error(service: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            service: Some(service.to_string()),
            message: message.into(),
        }
    }

    fn warning(service: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            service: Some(service.to_string()),
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for StackIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        match &self.service {
            Some(service) => write!(f, "{level}: {service}: {}", self.message),
            None => write!(f, "{level}: {}", self.message),
        }
    }
}
