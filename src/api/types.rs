//! Request and response types for the HTTP API

use crate::types::{SiteMetricsData, ThermalZoneData};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Query Parameters
// =============================================================================

/// Query parameters for `GET /data/`
#[derive(Debug, Default, Deserialize)]
pub struct DataParams {
    /// `thermal_zone`, `site_metrics`, or absent for both
    pub data_type: Option<String>,
    /// Restrict thermal rows to one zone
    pub zone_id: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

/// Query parameters for `GET /temperatures/`
#[derive(Debug, Default, Deserialize)]
pub struct TemperatureParams {
    pub zone_id: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    /// Mean over zones instead of one reading per zone
    pub aggregate: Option<String>,
}

// =============================================================================
// Responses
// =============================================================================

/// One row of `GET /data/`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DataRow {
    Thermal(ThermalZoneData),
    Site(SiteMetricsData),
}

/// Indoor readings at one timestep
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IndoorTemps {
    /// Zone id → mean air temperature
    Zones(BTreeMap<String, f64>),
    /// Mean over every zone reporting at that time
    Mean(f64),
}

/// One entry of `GET /temperatures/`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimestepTemperature {
    pub time: DateTime<Utc>,
    pub outdoor_temp: Option<f64>,
    pub indoor_temps: Option<IndoorTemps>,
}

/// Body of `DELETE /data/`
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// Error body shared by every endpoint
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

/// Body of `GET /health`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: crate::services::HealthStatus,
    pub version: &'static str,
    pub store: &'static str,
    pub checks: Vec<crate::services::CheckResult>,
}

// =============================================================================
// Parameter Parsing
// =============================================================================

/// Parse a time parameter
///
/// Accepts RFC 3339 (`Z` or an offset), a naive date-time taken as UTC
/// (`T` or space separated), or a bare date meaning midnight UTC.
pub fn parse_query_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(t.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

/// Parse a boolean flag the way form-encoded clients send them
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_query_time_formats() {
        let expected = Utc.with_ymd_and_hms(2005, 1, 1, 1, 0, 0).unwrap();
        assert_eq!(parse_query_time("2005-01-01T01:00:00Z"), Some(expected));
        assert_eq!(parse_query_time("2005-01-01T01:00:00+00:00"), Some(expected));
        assert_eq!(parse_query_time("2005-01-01T02:00:00+01:00"), Some(expected));
        assert_eq!(parse_query_time("2005-01-01T01:00:00"), Some(expected));
        assert_eq!(parse_query_time("2005-01-01 01:00:00"), Some(expected));
        assert_eq!(parse_query_time("2005-01-01T01:00"), Some(expected));
        assert_eq!(
            parse_query_time("2005-01-01"),
            Some(Utc.with_ymd_and_hms(2005, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_query_time("yesterday"), None);
        assert_eq!(parse_query_time("01/01  01:00:00"), None);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("true"), Some(true));
        assert_eq!(parse_flag("True"), Some(true));
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_indoor_temps_serialization() {
        let zones = IndoorTemps::Zones(BTreeMap::from([("A".to_string(), 20.5)]));
        assert_eq!(serde_json::to_value(&zones).unwrap()["A"], 20.5);
        assert_eq!(serde_json::to_value(IndoorTemps::Mean(19.0)).unwrap(), 19.0);

        let step = TimestepTemperature {
            time: Utc.with_ymd_and_hms(2005, 1, 1, 1, 0, 0).unwrap(),
            outdoor_temp: None,
            indoor_temps: None,
        };
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["time"], "2005-01-01T01:00:00Z");
        assert!(json["outdoor_temp"].is_null());
        assert!(json["indoor_temps"].is_null());
    }
}
