//! Error types for the telemetry pipeline

use thiserror::Error;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Simulation output processing error
    #[error("Simulation error: {0}")]
    Simulation(#[from] SimulationError),

    /// MQTT transport error
    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),

    /// Time-series store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Deployment topology error
    #[error("Stack error: {0}")]
    Stack(#[from] StackError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path of the config file
        path: String,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Config file could not be parsed
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path of the config file
        path: String,
        /// Parser message
        message: String,
    },

    /// Environment override has an invalid value
    #[error("invalid value for {var}: {value}")]
    InvalidEnv {
        /// Variable name
        var: &'static str,
        /// Offending value
        value: String,
    },

    /// A required setting is missing
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    /// A setting has an invalid value
    #[error("invalid setting {field}: {reason}")]
    Invalid {
        /// Setting path, e.g. `mqtt.port`
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// Errors while processing EnergyPlus output
#[derive(Error, Debug)]
pub enum SimulationError {
    /// Timestamp did not match `MM/DD HH:MM:SS`
    #[error("invalid simulation timestamp '{0}'")]
    InvalidTimestamp(String),

    /// A required column is absent
    #[error("column not found: {0}")]
    MissingColumn(String),

    /// No column matched the requested keyword
    #[error("no columns found containing '{0}'")]
    NoMatchingColumns(String),

    /// A cell could not be parsed as a number
    #[error("invalid number '{value}' in column '{column}'")]
    InvalidNumber {
        /// Column header
        column: String,
        /// Raw cell text
        value: String,
    },
}

/// MQTT transport errors
#[derive(Error, Debug)]
pub enum MqttError {
    /// Publish or subscribe attempted without a broker session
    #[error("not connected to broker")]
    NotConnected,

    /// Broker did not acknowledge the connection in time
    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    /// Broker refused the connection
    #[error("connection refused: {0}")]
    Refused(String),

    /// Client request failed
    #[error("client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// Event loop failed
    #[error("connection error: {0}")]
    Connection(String),
}

/// Time-series store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// HTTP request failed before a response arrived
    #[error("request failed: {0}")]
    Request(String),

    /// Request timed out
    #[error("request timed out")]
    Timeout,

    /// Store answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from the store
        message: String,
    },

    /// Point cannot be encoded
    #[error("invalid point: {0}")]
    InvalidPoint(String),

    /// Query response could not be decoded
    #[error("malformed query response: {0}")]
    Decode(String),
}

/// Deployment model errors
#[derive(Error, Debug)]
pub enum StackError {
    /// A service depends on a service that isn't declared
    #[error("service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency {
        /// Dependent service
        service: String,
        /// Missing dependency
        dependency: String,
    },

    /// `depends_on` edges form a cycle
    #[error("dependency cycle between services: {0}")]
    DependencyCycle(String),

    /// Compose document is structurally wrong
    #[error("invalid compose document: {0}")]
    Invalid(String),

    /// YAML encoding or decoding failed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
