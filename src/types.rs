//! Core data types shared by the publisher, the ingest sink and the API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Topic carrying per-zone thermal readings
pub const THERMAL_ZONE_TOPIC: &str = "building/thermal_zones_metrics";

/// Topic carrying site-wide readings
pub const SITE_METRICS_TOPIC: &str = "building/site_metrics";

/// Tag key identifying a thermal zone
pub const ZONE_TAG: &str = "zone_id";

/// Fields of a `thermal_zone` point, in publication order
pub const THERMAL_ZONE_FIELDS: [&str; 12] = [
    "mean_air_temperature",
    "operative_temperature",
    "air_relative_humidity",
    "air_co2_concentration",
    "infiltration_air_change_rate",
    "mech_ventilation_air_changes",
    "internal_latent_gain",
    "cooling_rate",
    "heating_rate",
    "people_sensible_heat",
    "thermal_comfort_pmv",
    "thermal_comfort_ppd",
];

/// Fields of a `site_metrics` point, in publication order
pub const SITE_METRIC_FIELDS: [&str; 5] = [
    "interior_lights_electricity",
    "facility_electricity",
    "outdoor_air_temp",
    "diffuse_solar_radiation",
    "direct_solar_radiation",
];

/// Field holding the zone air temperature
pub const MEAN_AIR_TEMPERATURE: &str = "mean_air_temperature";

/// Field holding the outdoor drybulb temperature
pub const OUTDOOR_AIR_TEMP: &str = "outdoor_air_temp";

/// The two measurements written by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measurement {
    /// Per-zone thermal readings
    ThermalZone,
    /// Site-wide readings
    SiteMetrics,
}

impl Measurement {
    /// Measurement name in the store
    pub fn name(&self) -> &'static str {
        match self {
            Measurement::ThermalZone => "thermal_zone",
            Measurement::SiteMetrics => "site_metrics",
        }
    }

    /// MQTT topic the measurement is published on
    pub fn topic(&self) -> &'static str {
        match self {
            Measurement::ThermalZone => THERMAL_ZONE_TOPIC,
            Measurement::SiteMetrics => SITE_METRICS_TOPIC,
        }
    }

    /// Resolve the measurement carried by a topic
    pub fn from_topic(topic: &str) -> Option<Self> {
        match topic {
            THERMAL_ZONE_TOPIC => Some(Measurement::ThermalZone),
            SITE_METRICS_TOPIC => Some(Measurement::SiteMetrics),
            _ => None,
        }
    }

    /// Resolve a measurement from its store name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "thermal_zone" => Some(Measurement::ThermalZone),
            "site_metrics" => Some(Measurement::SiteMetrics),
            _ => None,
        }
    }

    /// Both measurements
    pub fn all() -> &'static [Measurement] {
        &[Measurement::ThermalZone, Measurement::SiteMetrics]
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// JSON message exchanged over MQTT
///
/// `time` stays a string on the wire; the sink parses it when building the
/// point so a malformed timestamp is reported together with its topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricMessage {
    /// Measurement name
    pub measurement: String,
    /// Tag set (absent for site metrics)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// RFC 3339 timestamp, e.g. `2005-01-01T01:00:00Z`
    pub time: String,
    /// Numeric fields
    pub fields: BTreeMap<String, f64>,
}

impl MetricMessage {
    /// Create a message without tags
    pub fn new(measurement: Measurement, time: impl Into<String>) -> Self {
        Self {
            measurement: measurement.name().to_string(),
            tags: BTreeMap::new(),
            time: time.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Add a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add a field
    pub fn with_field(mut self, key: impl Into<String>, value: f64) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

/// Time window for queries
///
/// `start` is inclusive and defaults to the epoch; `stop` is exclusive and
/// defaults to now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    /// Inclusive lower bound
    pub start: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub stop: Option<DateTime<Utc>>,
}

impl TimeWindow {
    /// Create a window from optional bounds
    pub fn new(start: Option<DateTime<Utc>>, stop: Option<DateTime<Utc>>) -> Self {
        Self { start, stop }
    }

    /// Check if a timestamp falls within this window
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        let after_start = self.start.map_or(time.timestamp() >= 0, |s| time >= s);
        let before_stop = self.stop.map_or(time < Utc::now(), |s| time < s);
        after_start && before_stop
    }
}

/// Zone and time filter for thermal queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataFilter {
    /// Restrict to one zone
    pub zone_id: Option<String>,
    /// Time window
    pub window: TimeWindow,
}

impl DataFilter {
    /// Create a filter
    pub fn new(zone_id: Option<String>, window: TimeWindow) -> Self {
        Self { zone_id, window }
    }

    /// Check whether a zone passes the filter
    pub fn matches_zone(&self, zone_id: &str) -> bool {
        self.zone_id.as_deref().map_or(true, |z| z == zone_id)
    }
}

/// One pivoted row of the `thermal_zone` measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermalZoneData {
    pub zone_id: String,
    pub time: DateTime<Utc>,
    pub mean_air_temperature: Option<f64>,
    pub operative_temperature: Option<f64>,
    pub air_relative_humidity: Option<f64>,
    pub air_co2_concentration: Option<f64>,
    pub infiltration_air_change_rate: Option<f64>,
    pub mech_ventilation_air_changes: Option<f64>,
    pub internal_latent_gain: Option<f64>,
    pub cooling_rate: Option<f64>,
    pub heating_rate: Option<f64>,
    pub people_sensible_heat: Option<f64>,
    pub thermal_comfort_pmv: Option<f64>,
    pub thermal_comfort_ppd: Option<f64>,
}

impl ThermalZoneData {
    /// Build a row from a field lookup
    pub fn from_fields<F>(zone_id: String, time: DateTime<Utc>, field: F) -> Self
    where
        F: Fn(&str) -> Option<f64>,
    {
        Self {
            zone_id,
            time,
            mean_air_temperature: field("mean_air_temperature"),
            operative_temperature: field("operative_temperature"),
            air_relative_humidity: field("air_relative_humidity"),
            air_co2_concentration: field("air_co2_concentration"),
            infiltration_air_change_rate: field("infiltration_air_change_rate"),
            mech_ventilation_air_changes: field("mech_ventilation_air_changes"),
            internal_latent_gain: field("internal_latent_gain"),
            cooling_rate: field("cooling_rate"),
            heating_rate: field("heating_rate"),
            people_sensible_heat: field("people_sensible_heat"),
            thermal_comfort_pmv: field("thermal_comfort_pmv"),
            thermal_comfort_ppd: field("thermal_comfort_ppd"),
        }
    }
}

/// One pivoted row of the `site_metrics` measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteMetricsData {
    pub time: DateTime<Utc>,
    pub interior_lights_electricity: Option<f64>,
    pub facility_electricity: Option<f64>,
    pub outdoor_air_temp: Option<f64>,
    pub diffuse_solar_radiation: Option<f64>,
    pub direct_solar_radiation: Option<f64>,
}

impl SiteMetricsData {
    /// Build a row from a field lookup
    pub fn from_fields<F>(time: DateTime<Utc>, field: F) -> Self
    where
        F: Fn(&str) -> Option<f64>,
    {
        Self {
            time,
            interior_lights_electricity: field("interior_lights_electricity"),
            facility_electricity: field("facility_electricity"),
            outdoor_air_temp: field("outdoor_air_temp"),
            diffuse_solar_radiation: field("diffuse_solar_radiation"),
            direct_solar_radiation: field("direct_solar_radiation"),
        }
    }
}

/// A single zone air temperature reading
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneTemperature {
    /// Reading time
    pub time: DateTime<Utc>,
    /// Zone identifier
    pub zone_id: String,
    /// Mean air temperature
    pub value: f64,
}

/// Round to the 4 decimal places kept in storage
///
/// Magnitudes too large to scale carry no fractional digits and come back
/// unchanged.
pub fn round4(value: f64) -> f64 {
    let scaled = value * 10_000.0;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / 10_000.0
}
