//! Tracing subscriber setup shared by the binaries

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber
///
/// `RUST_LOG` adds to the defaults: `building_telemetry=info` and
/// `<target>=info` for the calling binary.
pub fn init(config: &LoggingConfig, target: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::from_default_env()
        .add_directive("building_telemetry=info".parse()?)
        .add_directive(format!("{target}=info").parse()?);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.format {
        LogFormat::Pretty => builder.try_init()?,
        LogFormat::Json => builder.json().flatten_event(true).try_init()?,
    }
    Ok(())
}
