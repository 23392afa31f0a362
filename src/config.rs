//! Application configuration
//!
//! Configuration is read from:
//! 1. `TELEMETRY_CONFIG` environment variable (path to TOML file)
//! 2. `./telemetry.toml` in the current directory
//! 3. Defaults
//!
//! Environment variables are applied on top of whichever source was used, so
//! secrets such as `INFLUXDB_TOKEN` never have to live in a file.
//!
//! ```toml
//! [mqtt]
//! host = "mosquitto"
//! port = 1883
//!
//! [influx]
//! url = "http://influxdb:8086"
//! org = "gp2"
//! bucket = "gp2"
//!
//! [http]
//! listen_addr = "0.0.0.0:8000"
//! ```

use crate::error::ConfigError;
use crate::simulation::ZoneLayout;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "TELEMETRY_CONFIG";

/// Config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "telemetry.toml";

// =============================================================================
// Sections
// =============================================================================

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub influx: InfluxConfig,
    pub store: StoreConfig,
    pub http: HttpConfig,
    pub replay: ReplayConfig,
    pub health: HealthSettings,
    pub logging: LoggingConfig,
}

/// MQTT broker connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker hostname
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Client id used by the subscriber
    pub subscriber_client_id: String,
    /// Client id used by the publisher (random when unset)
    pub publisher_client_id: Option<String>,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,
    /// QoS for publish and subscribe (0, 1 or 2)
    pub qos: u8,
    /// How long to wait for the broker's CONNACK
    pub connect_timeout_secs: u64,
    /// Delay before reconnecting after a connection error
    pub reconnect_backoff_ms: u64,
    /// Capacity of the client request channel
    pub channel_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            subscriber_client_id: "influxdb_writer".to_string(),
            publisher_client_id: None,
            keep_alive_secs: 60,
            qos: 0,
            connect_timeout_secs: 10,
            reconnect_backoff_ms: 1_000,
            channel_capacity: 1_024,
        }
    }
}

impl MqttConfig {
    /// Broker address as `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

/// InfluxDB v2 connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InfluxConfig {
    /// Base URL of the InfluxDB HTTP API
    pub url: String,
    /// API token (no default; use `INFLUXDB_TOKEN`)
    pub token: Option<String>,
    /// Organization
    pub org: String,
    /// Bucket
    pub bucket: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_string(),
            token: None,
            org: "gp2".to_string(),
            bucket: "gp2".to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl InfluxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Which store implementation backs the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// InfluxDB v2 over HTTP
    #[default]
    Influxdb,
    /// Process-local store, for development without InfluxDB
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "influxdb" | "influx" => Ok(StoreBackend::Influxdb),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(()),
        }
    }
}

/// Store selection
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
}

/// HTTP API server
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Listen address
    pub listen_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
        }
    }
}

/// CSV replay
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Filtered simulation CSV to replay
    pub csv_path: PathBuf,
    /// Year stamped on simulation timestamps
    pub year: i32,
    /// Delay between rows in milliseconds (0 = as fast as possible)
    pub row_interval_ms: u64,
    /// Delay before the publisher starts when run next to the subscriber
    pub start_delay_ms: u64,
    /// Zones present in the building model
    pub layout: ZoneLayout,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            csv_path: PathBuf::from("output/filtered_eplus_results.csv"),
            year: 2005,
            row_interval_ms: 0,
            start_delay_ms: 1_000,
            layout: ZoneLayout::default(),
        }
    }
}

impl ReplayConfig {
    pub fn row_interval(&self) -> Duration {
        Duration::from_millis(self.row_interval_ms)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }
}

/// Health checker thresholds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    /// Seconds between checks
    pub check_interval_secs: u64,
    /// Seconds a single check may take
    pub check_timeout_secs: u64,
    /// Consecutive failures before a check counts as failing
    pub failure_threshold: u32,
    /// Consecutive successes before a failing check counts as recovered
    pub recovery_threshold: u32,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: 30,
            check_timeout_secs: 5,
            failure_threshold: 3,
            recovery_threshold: 2,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

// =============================================================================
// Loading
// =============================================================================

impl AppConfig {
    /// Load configuration from the standard locations and the environment
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        Self::load_with(explicit.as_deref(), |key| std::env::var(key).ok())
    }

    /// Load with an explicit file and environment lookup, then validate
    pub fn load_with<E>(path: Option<&Path>, env: E) -> Result<Self, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let config = Self::read_with(path, env)?;
        config.validate()?;
        Ok(config)
    }

    /// Read the file and apply the environment without validating
    ///
    /// An explicit path must exist. Without one, `./telemetry.toml` is used
    /// when present. Commands that never touch the store use this and
    /// validate only what they need.
    pub fn read_with<E>(path: Option<&Path>, env: E) -> Result<Self, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    info!("Using default configuration");
                    Self::default()
                }
            }
        };

        config.apply_env(env)?;
        Ok(config)
    }

    /// Parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })?;
        info!(path = %path.display(), "Loaded configuration from file");
        Ok(config)
    }

    /// Parse TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })
    }

    /// Apply environment overrides
    pub fn apply_env<E>(&mut self, env: E) -> Result<(), ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        if let Some(host) = env("MQTT_BROKER") {
            self.mqtt.host = host;
        }
        if let Some(port) = env("MQTT_PORT") {
            self.mqtt.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "MQTT_PORT",
                value: port.clone(),
            })?;
        }
        if let Some(url) = env("INFLUXDB_URL") {
            self.influx.url = url;
        }
        if let Some(token) = env("INFLUXDB_TOKEN") {
            self.influx.token = Some(token);
        }
        if let Some(org) = env("INFLUXDB_ORG") {
            self.influx.org = org;
        }
        if let Some(bucket) = env("INFLUXDB_BUCKET") {
            self.influx.bucket = bucket;
        }
        if let Some(addr) = env("API_LISTEN_ADDR") {
            self.http.listen_addr = addr;
        }
        if let Some(backend) = env("STORE_BACKEND") {
            self.store.backend = backend.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "STORE_BACKEND",
                value: backend.clone(),
            })?;
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_mqtt()?;
        if self.influx.org.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "influx.org",
                reason: "must not be empty".to_string(),
            });
        }
        if self.influx.bucket.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "influx.bucket",
                reason: "must not be empty".to_string(),
            });
        }
        if self.store.backend == StoreBackend::Influxdb
            && self.influx.token.as_deref().map_or(true, |t| t.trim().is_empty())
        {
            return Err(ConfigError::Missing("influx.token (or INFLUXDB_TOKEN)"));
        }
        self.listen_addr()?;
        self.validate_replay()
    }

    /// Broker settings only
    pub fn validate_mqtt(&self) -> Result<(), ConfigError> {
        if self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "mqtt.host",
                reason: "must not be empty".to_string(),
            });
        }
        if self.mqtt.port == 0 {
            return Err(ConfigError::Invalid {
                field: "mqtt.port",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.mqtt.qos > 2 {
            return Err(ConfigError::Invalid {
                field: "mqtt.qos",
                reason: format!("{} is not 0, 1 or 2", self.mqtt.qos),
            });
        }
        if self.mqtt.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "mqtt.connect_timeout_secs",
                reason: "must be non-zero".to_string(),
            });
        }
        // Zero would spin the event loop on a refused connection
        if self.mqtt.reconnect_backoff_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "mqtt.reconnect_backoff_ms",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Replay settings only
    pub fn validate_replay(&self) -> Result<(), ConfigError> {
        if self.replay.layout.is_empty() {
            return Err(ConfigError::Invalid {
                field: "replay.layout",
                reason: "needs at least one block, zone and floor".to_string(),
            });
        }
        Ok(())
    }

    /// Parsed HTTP listen address
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.http
            .listen_addr
            .parse()
            .map_err(|_| ConfigError::Invalid {
                field: "http.listen_addr",
                reason: format!("'{}' is not a socket address", self.http.listen_addr),
            })
    }
}
