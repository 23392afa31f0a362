//! EnergyPlus output processing
//!
//! Turns the raw `eplusout.csv` written by an EnergyPlus run into the
//! filtered table the replay publisher reads, and turns filtered rows into
//! MQTT messages.
//!
//! ```text
//! eplusout.csv ──extract_specific_outputs──▶ filtered.csv ──PayloadBuilder──▶ MetricMessage
//! ```

pub mod columns;
pub mod payload;
pub mod table;
pub mod time;

pub use columns::{
    clean_column_name, extract_specific_outputs, extract_zone_temperatures,
    DEFAULT_TARGET_VARIABLES, ZONE_TEMPERATURE_KEYWORD,
};
pub use payload::{PayloadBuilder, RowPayloads, ZoneLayout};
pub use table::SimulationTable;
pub use time::{format_timestamp, parse_simulation_time};
