//! Time-series persistence
//!
//! [`MetricStore`] is the seam between the pipeline and its backing store.
//! [`InfluxStore`] talks to InfluxDB v2 over HTTP; [`MemoryStore`] keeps
//! points in process for local runs and tests.

pub mod annotated;
pub mod flux;
pub mod influx;
pub mod memory;
pub mod point;

pub use annotated::{parse_annotated_csv, FluxRecord, FluxValue};
pub use flux::RangeBound;
pub use influx::InfluxStore;
pub use memory::MemoryStore;
pub use point::Point;

use crate::config::{AppConfig, StoreBackend};
use crate::error::{ConfigError, StoreError};
use crate::types::{DataFilter, SiteMetricsData, ThermalZoneData, TimeWindow, ZoneTemperature};
use async_trait::async_trait;
use std::sync::Arc;

/// Start of the range cleared by `delete_all`
pub const DELETE_RANGE_START: &str = "1970-01-01T00:00:00Z";

/// End of the range cleared by `delete_all`
pub const DELETE_RANGE_STOP: &str = "2100-01-01T00:00:00Z";

/// Storage operations used by the ingest sink and the HTTP API
///
/// Query results are ordered: thermal rows by `(zone_id, time)`, site rows by
/// time, zone temperatures by `(time, zone_id)`.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Persist a batch of points
    async fn write(&self, points: &[Point]) -> Result<(), StoreError>;

    /// Pivoted thermal zone rows
    async fn thermal_zones(&self, filter: &DataFilter) -> Result<Vec<ThermalZoneData>, StoreError>;

    /// Pivoted site metric rows
    async fn site_metrics(&self, window: &TimeWindow) -> Result<Vec<SiteMetricsData>, StoreError>;

    /// Zone mean air temperature readings
    async fn zone_temperatures(
        &self,
        filter: &DataFilter,
    ) -> Result<Vec<ZoneTemperature>, StoreError>;

    /// Delete every point of both measurements
    async fn delete_all(&self) -> Result<(), StoreError>;

    /// Check that the store is reachable
    async fn ping(&self) -> Result<(), StoreError>;

    /// Backend name for logs and health output
    fn backend(&self) -> &'static str;
}

/// Open the store selected in the configuration
pub fn open(config: &AppConfig) -> Result<Arc<dyn MetricStore>, ConfigError> {
    let store: Arc<dyn MetricStore> = match config.store.backend {
        StoreBackend::Influxdb => Arc::new(InfluxStore::new(&config.influx)?),
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}

pub(crate) fn sort_thermal(rows: &mut [ThermalZoneData]) {
    rows.sort_by(|a, b| a.zone_id.cmp(&b.zone_id).then(a.time.cmp(&b.time)));
}

pub(crate) fn sort_site(rows: &mut [SiteMetricsData]) {
    rows.sort_by_key(|r| r.time);
}

pub(crate) fn sort_temperatures(rows: &mut [ZoneTemperature]) {
    rows.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.zone_id.cmp(&b.zone_id)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory_backend() {
        let mut config = AppConfig::default();
        config.store.backend = StoreBackend::Memory;
        let store = open(&config).unwrap();
        assert_eq!(store.backend(), "memory");
    }

    #[test]
    fn test_open_influx_requires_token() {
        let config = AppConfig::default();
        assert!(matches!(open(&config), Err(ConfigError::Missing(_))));

        let mut config = AppConfig::default();
        config.influx.token = Some("secret".into());
        assert_eq!(open(&config).unwrap().backend(), "influxdb");
    }
}
