//! Conversion of filtered simulation rows into MQTT messages

use super::columns::TIME_COLUMN;
use super::time::{format_timestamp, parse_simulation_time};
use crate::error::SimulationError;
use crate::types::{Measurement, MetricMessage, SITE_METRIC_FIELDS, ZONE_TAG};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::warn;

/// Blocks, zones and floors of the simulated building
///
/// A zone column prefix is `{block}:{zone}{floor}` and its published id is
/// `{block}:{zone}:{floor}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ZoneLayout {
    pub blocks: Vec<String>,
    pub zones: Vec<String>,
    pub floors: Vec<String>,
}

impl Default for ZoneLayout {
    fn default() -> Self {
        let owned = |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };
        Self {
            blocks: owned(&["BLOCK1", "BLOCK2"]),
            zones: owned(&["OFFICEXSW", "OFFICEXSE", "OFFICEXNW", "OFFICEXNE", "CORRIDOR"]),
            floors: owned(&["X1F", "X2F"]),
        }
    }
}

impl ZoneLayout {
    /// Whether the layout describes no zone at all
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() || self.zones.is_empty() || self.floors.is_empty()
    }

    /// Every zone as `(column_prefix, zone_id)`, block-major
    pub fn zones(&self) -> Vec<(String, String)> {
        let mut out = Vec::with_capacity(self.blocks.len() * self.zones.len() * self.floors.len());
        for block in &self.blocks {
            for zone in &self.zones {
                for floor in &self.floors {
                    out.push((
                        format!("{block}:{zone}{floor}"),
                        format!("{block}:{zone}:{floor}"),
                    ));
                }
            }
        }
        out
    }
}

/// Where a thermal field lives relative to the zone prefix
#[derive(Debug, Clone, Copy)]
enum ZoneColumn {
    /// `{prefix}:{variable}`
    Zone(&'static str),
    /// `{prefix} IDEAL LOADS AIR:{variable}`
    IdealLoads(&'static str),
    /// `PEOPLE {prefix}:{variable}`
    People(&'static str),
}

impl ZoneColumn {
    fn header(&self, prefix: &str) -> String {
        match self {
            ZoneColumn::Zone(var) => format!("{prefix}:{var}"),
            ZoneColumn::IdealLoads(var) => format!("{prefix} IDEAL LOADS AIR:{var}"),
            ZoneColumn::People(var) => format!("PEOPLE {prefix}:{var}"),
        }
    }
}

/// Thermal fields and their source columns, in publication order
const THERMAL_COLUMNS: [(&str, ZoneColumn); 12] = [
    ("mean_air_temperature", ZoneColumn::Zone("Zone Mean Air Temperature")),
    ("operative_temperature", ZoneColumn::Zone("Zone Operative Temperature")),
    ("air_relative_humidity", ZoneColumn::Zone("Zone Air Relative Humidity")),
    ("air_co2_concentration", ZoneColumn::Zone("Zone Air CO2 Concentration")),
    ("infiltration_air_change_rate", ZoneColumn::Zone("Zone Infiltration Air Change Rate")),
    (
        "mech_ventilation_air_changes",
        ZoneColumn::Zone("Zone Mechanical Ventilation Air Changes per Hour"),
    ),
    ("internal_latent_gain", ZoneColumn::Zone("Zone Total Internal Latent Gain Energy")),
    (
        "cooling_rate",
        ZoneColumn::IdealLoads("Zone Ideal Loads Supply Air Total Cooling Rate"),
    ),
    (
        "heating_rate",
        ZoneColumn::IdealLoads("Zone Ideal Loads Supply Air Total Heating Rate"),
    ),
    ("people_sensible_heat", ZoneColumn::Zone("Zone People Sensible Heating Rate")),
    ("thermal_comfort_pmv", ZoneColumn::People("Zone Thermal Comfort Fanger Model PMV")),
    ("thermal_comfort_ppd", ZoneColumn::People("Zone Thermal Comfort Fanger Model PPD")),
];

/// Source column for each field in `SITE_METRIC_FIELDS`, same order
const SITE_COLUMNS: [&str; 5] = [
    "InteriorLights:Electricity",
    "Electricity:Facility",
    "Site Site Outdoor Air Drybulb Temperature",
    "Site Site Diffuse Solar Radiation Rate per Area",
    "Site Site Direct Solar Radiation Rate per Area",
];

/// Messages produced from one simulation row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowPayloads {
    /// Published timestamp
    pub time: String,
    /// One message per zone present in the row
    pub zones: Vec<MetricMessage>,
    /// Site-wide message, absent if any site column was unusable
    pub site: Option<MetricMessage>,
    /// Messages dropped because of missing or malformed values
    pub dropped: usize,
}

impl RowPayloads {
    /// All messages with their topics, zones first
    pub fn messages(&self) -> impl Iterator<Item = (&'static str, &MetricMessage)> {
        self.zones
            .iter()
            .map(|m| (Measurement::ThermalZone.topic(), m))
            .chain(self.site.iter().map(|m| (Measurement::SiteMetrics.topic(), m)))
    }
}

/// Builds MQTT messages from filtered simulation rows
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    zones: Vec<(String, String)>,
    year: i32,
}

impl PayloadBuilder {
    /// Create a builder for a layout and simulation year
    pub fn new(layout: &ZoneLayout, year: i32) -> Self {
        Self {
            zones: layout.zones(),
            year,
        }
    }

    /// Build the messages for one row keyed by filtered header
    ///
    /// Fails only when the row's timestamp is unusable; a zone or site
    /// message with a missing or malformed value is dropped and counted.
    pub fn build_row(&self, row: &HashMap<String, String>) -> Result<RowPayloads, SimulationError> {
        let raw_time = row
            .get(TIME_COLUMN)
            .ok_or_else(|| SimulationError::MissingColumn(TIME_COLUMN.to_string()))?;
        let time = format_timestamp(&parse_simulation_time(raw_time, self.year)?);

        let mut payloads = RowPayloads {
            time: time.clone(),
            ..Default::default()
        };

        for (prefix, zone_id) in &self.zones {
            // Zones without a temperature column are not part of this model
            if !row.contains_key(&THERMAL_COLUMNS[0].1.header(prefix)) {
                continue;
            }

            let mut message =
                MetricMessage::new(Measurement::ThermalZone, time.clone()).with_tag(ZONE_TAG, zone_id);
            let fields = THERMAL_COLUMNS
                .iter()
                .map(|(field, column)| Ok((*field, read_number(row, &column.header(prefix))?)))
                .collect::<Result<Vec<_>, SimulationError>>();

            match fields {
                Ok(fields) => {
                    for (field, value) in fields {
                        message = message.with_field(field, value);
                    }
                    payloads.zones.push(message);
                }
                Err(e) => {
                    warn!(zone = %zone_id, time = %time, error = %e, "Dropping zone reading");
                    payloads.dropped += 1;
                }
            }
        }

        let site_fields = SITE_METRIC_FIELDS
            .iter()
            .zip(SITE_COLUMNS.iter())
            .map(|(field, column)| Ok((*field, read_number(row, column)?)))
            .collect::<Result<Vec<_>, SimulationError>>();

        match site_fields {
            Ok(fields) => {
                let mut message = MetricMessage::new(Measurement::SiteMetrics, time.clone());
                for (field, value) in fields {
                    message = message.with_field(field, value);
                }
                payloads.site = Some(message);
            }
            Err(e) => {
                warn!(time = %time, error = %e, "Dropping site reading");
                payloads.dropped += 1;
            }
        }

        Ok(payloads)
    }
}

fn read_number(row: &HashMap<String, String>, column: &str) -> Result<f64, SimulationError> {
    let raw = row
        .get(column)
        .ok_or_else(|| SimulationError::MissingColumn(column.to_string()))?;
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| SimulationError::InvalidNumber {
            column: column.to_string(),
            value: raw.clone(),
        })
}
