//! Column selection and renaming for EnergyPlus output
//!
//! EnergyPlus headers look like
//! `BLOCK1:OFFICEXSWX1F:Zone Mean Air Temperature [C](Hourly)`. The filtered
//! file keeps only the variables the pipeline publishes and strips the unit
//! and reporting frequency from each header.

use super::table::SimulationTable;
use crate::error::SimulationError;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Time column written by EnergyPlus
pub const ENERGYPLUS_TIME_COLUMN: &str = "Date/Time";

/// Time column in the filtered output
pub const TIME_COLUMN: &str = "DateTime";

/// Keyword identifying zone air temperature columns
pub const ZONE_TEMPERATURE_KEYWORD: &str = "Zone Mean Air Temperature";

/// Variables kept in the filtered output
pub const DEFAULT_TARGET_VARIABLES: [&str; 17] = [
    "Zone Mean Air Temperature",
    "Zone Operative Temperature",
    "Zone Air Relative Humidity",
    "Zone Air CO2 Concentration",
    "Zone Infiltration Air Change Rate",
    "Zone Mechanical Ventilation Air Changes per Hour",
    "Zone Total Internal Latent Gain Energy",
    "Zone Ideal Loads Supply Air Total Cooling Rate",
    "Zone Ideal Loads Supply Air Total Heating Rate",
    "Zone People Sensible Heating Rate",
    "InteriorLights:Electricity",
    "Electricity:Facility",
    "Site Outdoor Air Drybulb Temperature",
    "Site Diffuse Solar Radiation Rate per Area",
    "Site Direct Solar Radiation Rate per Area",
    "Zone Thermal Comfort Fanger Model PMV",
    "Zone Thermal Comfort Fanger Model PPD",
];

/// Meter variables, matched as header prefixes rather than substrings
const METER_VARIABLES: [&str; 2] = ["InteriorLights:Electricity", "Electricity:Facility"];

fn unit_pattern() -> &'static Regex {
    static UNIT: OnceLock<Regex> = OnceLock::new();
    UNIT.get_or_init(|| Regex::new(r"\[.*\]").expect("valid unit pattern"))
}

fn frequency_pattern() -> &'static Regex {
    static FREQUENCY: OnceLock<Regex> = OnceLock::new();
    FREQUENCY.get_or_init(|| Regex::new(r"\(.*\)").expect("valid frequency pattern"))
}

/// Strip the unit and reporting frequency from a header
///
/// `Zone Mean Air Temperature [C](Hourly)` becomes
/// `Zone Mean Air Temperature`. Surrounding whitespace and colons go too.
pub fn clean_column_name(col: &str) -> String {
    let without_unit = unit_pattern().replace_all(col, "");
    let without_freq = frequency_pattern().replace_all(&without_unit, "");
    without_freq.trim().trim_matches(':').to_string()
}

/// Whether a raw header carries the requested variable
pub fn matches_variable(header: &str, variable: &str) -> bool {
    let header = header.to_lowercase();
    let variable_lc = variable.to_lowercase();
    if METER_VARIABLES.contains(&variable) {
        header.starts_with(&variable_lc)
    } else {
        header.contains(&variable_lc)
    }
}

/// Filtered header for a raw EnergyPlus header
pub fn filtered_header(raw: &str) -> String {
    if raw == ENERGYPLUS_TIME_COLUMN {
        return TIME_COLUMN.to_string();
    }
    clean_column_name(raw).replace("Environment:", "Site ")
}

/// Keep the time column plus every column matching one of `targets`
///
/// Columns are kept in target order; a column matching several targets is
/// kept once, where it first matched. Headers are cleaned and `Date/Time`
/// is renamed to `DateTime`.
pub fn extract_specific_outputs<S: AsRef<str>>(
    table: &SimulationTable,
    targets: &[S],
) -> Result<SimulationTable, SimulationError> {
    info!(
        columns = table.width(),
        timesteps = table.len(),
        "Filtering simulation output"
    );

    let time_idx = table.require_column(ENERGYPLUS_TIME_COLUMN)?;
    let mut selected = vec![time_idx];

    for target in targets {
        let target = target.as_ref();
        let matches: Vec<usize> = table
            .headers
            .iter()
            .enumerate()
            .filter(|(i, h)| *i != time_idx && matches_variable(h, target))
            .map(|(i, _)| i)
            .collect();

        if matches.is_empty() {
            warn!(variable = %target, "No columns found for variable");
            continue;
        }
        debug!(variable = %target, count = matches.len(), "Matched columns");
        for idx in matches {
            if !selected.contains(&idx) {
                selected.push(idx);
            }
        }
    }

    let mut filtered = table.select(&selected);
    filtered.headers = filtered.headers.iter().map(|h| filtered_header(h)).collect();

    info!(
        columns = filtered.width(),
        timesteps = filtered.len(),
        "Filtered simulation output"
    );
    Ok(filtered)
}

/// Keep the time column plus every zone temperature column
///
/// With `rename_zones`, `BLOCK1:OFFICEXSWX1F:Zone Mean Air Temperature [C](Hourly)`
/// becomes `BLOCK1:OFFICEXSWX1F`.
pub fn extract_zone_temperatures(
    table: &SimulationTable,
    keyword: &str,
    rename_zones: bool,
) -> Result<SimulationTable, SimulationError> {
    let time_idx = table.require_column(ENERGYPLUS_TIME_COLUMN)?;
    let temp_cols: Vec<usize> = table
        .headers
        .iter()
        .enumerate()
        .filter(|(_, h)| h.contains(keyword))
        .map(|(i, _)| i)
        .collect();

    if temp_cols.is_empty() {
        return Err(SimulationError::NoMatchingColumns(keyword.to_string()));
    }

    let mut selected = vec![time_idx];
    selected.extend(&temp_cols);
    let mut zones = table.select(&selected);

    if rename_zones {
        for header in zones.headers.iter_mut().skip(1) {
            if let Some((zone, _)) = header.split_once(":Zone") {
                *header = zone.to_string();
            }
        }
    }

    Ok(zones)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eplus_table() -> SimulationTable {
        let headers = [
            "Date/Time",
            "Environment:Site Outdoor Air Drybulb Temperature [C](Hourly)",
            "BLOCK1:OFFICEXSWX1F:Zone Mean Air Temperature [C](Hourly)",
            "BLOCK1:OFFICEXSWX1F:Zone Operative Temperature [C](Hourly)",
            "BLOCK1:OFFICEXSWX1F:Zone Air System Sensible Heating Rate [W](Hourly)",
            "InteriorLights:Electricity [J](Hourly)",
            "Electricity:Facility [J](Hourly)",
            "BLOCK1:CORRIDORX1F:Zone Mean Air Temperature [C](Hourly)",
        ];
        SimulationTable::new(
            headers.iter().map(|h| h.to_string()).collect(),
            vec![vec![
                " 01/01  01:00:00".into(),
                "-2.5".into(),
                "20.1".into(),
                "19.8".into(),
                "0".into(),
                "1000".into(),
                "5000".into(),
                "18.2".into(),
            ]],
        )
    }

    #[test]
    fn test_clean_column_name() {
        assert_eq!(
            clean_column_name("BLOCK1:OFFICEXSWX1F:Zone Mean Air Temperature [C](Hourly)"),
            "BLOCK1:OFFICEXSWX1F:Zone Mean Air Temperature"
        );
        assert_eq!(clean_column_name("InteriorLights:Electricity [J](Hourly) "), "InteriorLights:Electricity");
        assert_eq!(clean_column_name(" :Whole Building: "), "Whole Building");
        assert_eq!(clean_column_name("Plain"), "Plain");
    }

    #[test]
    fn test_filtered_header_site_prefix() {
        assert_eq!(
            filtered_header("Environment:Site Outdoor Air Drybulb Temperature [C](Hourly)"),
            "Site Site Outdoor Air Drybulb Temperature"
        );
        assert_eq!(filtered_header("Date/Time"), "DateTime");
    }

    #[test]
    fn test_meter_matches_as_prefix() {
        assert!(matches_variable("Electricity:Facility [J](Hourly)", "Electricity:Facility"));
        assert!(!matches_variable(
            "InteriorLights:Electricity:Zone:X [J](Hourly)",
            "Electricity:Facility"
        ));
        assert!(matches_variable(
            "block1:officexswx1f:zone mean air temperature [C](Hourly)",
            "Zone Mean Air Temperature"
        ));
    }

    #[test]
    fn test_extract_specific_outputs() {
        let filtered = extract_specific_outputs(&eplus_table(), &DEFAULT_TARGET_VARIABLES).unwrap();
        assert_eq!(
            filtered.headers,
            vec![
                "DateTime",
                "BLOCK1:OFFICEXSWX1F:Zone Mean Air Temperature",
                "BLOCK1:CORRIDORX1F:Zone Mean Air Temperature",
                "BLOCK1:OFFICEXSWX1F:Zone Operative Temperature",
                "InteriorLights:Electricity",
                "Electricity:Facility",
                "Site Site Outdoor Air Drybulb Temperature",
            ]
        );
        assert_eq!(filtered.rows[0][0], " 01/01  01:00:00");
        assert_eq!(filtered.rows[0][2], "18.2");
    }

    #[test]
    fn test_duplicate_matches_kept_once() {
        let filtered =
            extract_specific_outputs(&eplus_table(), &["Temperature", "Zone Mean Air Temperature"])
                .unwrap();
        let mean_cols = filtered
            .headers
            .iter()
            .filter(|h| h.ends_with("Zone Mean Air Temperature"))
            .count();
        assert_eq!(mean_cols, 2);
    }

    #[test]
    fn test_extract_requires_time_column() {
        let table = SimulationTable::new(vec!["A".into()], vec![]);
        assert!(matches!(
            extract_specific_outputs(&table, &DEFAULT_TARGET_VARIABLES),
            Err(SimulationError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_extract_zone_temperatures() {
        let zones = extract_zone_temperatures(&eplus_table(), ZONE_TEMPERATURE_KEYWORD, true).unwrap();
        assert_eq!(zones.headers, vec!["Date/Time", "BLOCK1:OFFICEXSWX1F", "BLOCK1:CORRIDORX1F"]);
        assert_eq!(zones.rows[0], vec![" 01/01  01:00:00", "20.1", "18.2"]);

        let raw = extract_zone_temperatures(&eplus_table(), ZONE_TEMPERATURE_KEYWORD, false).unwrap();
        assert!(raw.headers[1].ends_with("[C](Hourly)"));

        assert!(matches!(
            extract_zone_temperatures(&eplus_table(), "Zone Lux", true),
            Err(SimulationError::NoMatchingColumns(_))
        ));
    }
}
