//! Flux query construction

use crate::types::{
    DataFilter, Measurement, TimeWindow, MEAN_AIR_TEMPERATURE, SITE_METRIC_FIELDS,
    THERMAL_ZONE_FIELDS, ZONE_TAG,
};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;

/// One end of a Flux `range()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeBound {
    /// Unix epoch, rendered as `0`
    Epoch,
    /// Query time, rendered as `now()`
    Now,
    /// Absolute instant
    At(DateTime<Utc>),
}

impl fmt::Display for RangeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeBound::Epoch => f.write_str("0"),
            RangeBound::Now => f.write_str("now()"),
            RangeBound::At(t) => f.write_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }
}

impl RangeBound {
    /// Bounds for a window: absent start is the epoch, absent stop is now
    pub fn for_window(window: &TimeWindow) -> (RangeBound, RangeBound) {
        (
            window.start.map_or(RangeBound::Epoch, RangeBound::At),
            window.stop.map_or(RangeBound::Now, RangeBound::At),
        )
    }
}

/// Quote a value as a Flux string literal
pub fn string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str(r"\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str(r"\n"),
            '\r' => out.push_str(r"\r"),
            '\t' => out.push_str(r"\t"),
            '$' if chars.peek() == Some(&'{') => out.push_str(r"\$"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn zone_predicate(zone_id: Option<&str>) -> String {
    match zone_id {
        Some(zone) => format!("r.{ZONE_TAG} == {}", string_literal(zone)),
        None => "true".to_string(),
    }
}

fn column_list(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| string_literal(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Pivoted thermal zone rows, one per zone and timestamp
pub fn thermal_zone_query(bucket: &str, filter: &DataFilter) -> String {
    let (start, stop) = RangeBound::for_window(&filter.window);
    let mut keep = vec!["_time", ZONE_TAG];
    keep.extend(THERMAL_ZONE_FIELDS);
    format!(
        "from(bucket: {bucket})\n  \
         |> range(start: {start}, stop: {stop})\n  \
         |> filter(fn: (r) => r._measurement == {measurement} and {zone})\n  \
         |> pivot(rowKey: [\"_time\"], columnKey: [\"_field\"], valueColumn: \"_value\")\n  \
         |> keep(columns: [{keep}])",
        bucket = string_literal(bucket),
        measurement = string_literal(Measurement::ThermalZone.name()),
        zone = zone_predicate(filter.zone_id.as_deref()),
        keep = column_list(&keep),
    )
}

/// Pivoted site metric rows, one per timestamp
pub fn site_metrics_query(bucket: &str, window: &TimeWindow) -> String {
    let (start, stop) = RangeBound::for_window(window);
    let mut keep = vec!["_time"];
    keep.extend(SITE_METRIC_FIELDS);
    format!(
        "from(bucket: {bucket})\n  \
         |> range(start: {start}, stop: {stop})\n  \
         |> filter(fn: (r) => r._measurement == {measurement})\n  \
         |> pivot(rowKey: [\"_time\"], columnKey: [\"_field\"], valueColumn: \"_value\")\n  \
         |> keep(columns: [{keep}])",
        bucket = string_literal(bucket),
        measurement = string_literal(Measurement::SiteMetrics.name()),
        keep = column_list(&keep),
    )
}

/// Raw zone mean air temperatures
pub fn zone_temperature_query(bucket: &str, filter: &DataFilter) -> String {
    let (start, stop) = RangeBound::for_window(&filter.window);
    format!(
        "from(bucket: {bucket})\n  \
         |> range(start: {start}, stop: {stop})\n  \
         |> filter(fn: (r) => r._measurement == {measurement} and {zone})\n  \
         |> filter(fn: (r) => r._field == {field})\n  \
         |> keep(columns: [\"_time\", \"_value\", {tag}])",
        bucket = string_literal(bucket),
        measurement = string_literal(Measurement::ThermalZone.name()),
        zone = zone_predicate(filter.zone_id.as_deref()),
        field = string_literal(MEAN_AIR_TEMPERATURE),
        tag = string_literal(ZONE_TAG),
    )
}

/// Delete predicate for one measurement
pub fn delete_predicate(measurement: Measurement) -> String {
    format!("_measurement={}", string_literal(measurement.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_range_bounds() {
        let t = Utc.with_ymd_and_hms(2005, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(RangeBound::Epoch.to_string(), "0");
        assert_eq!(RangeBound::Now.to_string(), "now()");
        assert_eq!(RangeBound::At(t).to_string(), "2005-01-02T00:00:00Z");

        let (start, stop) = RangeBound::for_window(&TimeWindow::new(Some(t), None));
        assert_eq!(start, RangeBound::At(t));
        assert_eq!(stop, RangeBound::Now);
    }

    #[test]
    fn test_string_literal_escaping() {
        assert_eq!(string_literal("gp2"), "\"gp2\"");
        assert_eq!(string_literal(r#"a"b\c"#), r#""a\"b\\c""#);
        assert_eq!(string_literal("${x}"), r#""\${x}""#);
        assert_eq!(string_literal("$5"), "\"$5\"");
    }

    #[test]
    fn test_thermal_zone_query() {
        let filter = DataFilter::new(Some("BLOCK1:CORRIDOR:X1F".into()), TimeWindow::default());
        let query = thermal_zone_query("gp2", &filter);
        assert!(query.starts_with("from(bucket: \"gp2\")"));
        assert!(query.contains("range(start: 0, stop: now())"));
        assert!(query.contains(r#"r._measurement == "thermal_zone" and r.zone_id == "BLOCK1:CORRIDOR:X1F""#));
        assert!(query.contains("\"thermal_comfort_ppd\"]"));
        assert!(query.contains("pivot(rowKey: [\"_time\"]"));
    }

    #[test]
    fn test_zone_id_cannot_inject() {
        let filter = DataFilter::new(Some(r#"x" or true or r.a == "y"#.into()), TimeWindow::default());
        let query = thermal_zone_query("gp2", &filter);
        assert!(query.contains(r#"r.zone_id == "x\" or true or r.a == \"y""#));
    }

    #[test]
    fn test_unfiltered_queries() {
        let query = zone_temperature_query("gp2", &DataFilter::default());
        assert!(query.contains("\"thermal_zone\" and true"));
        assert!(query.contains("r._field == \"mean_air_temperature\""));

        let site = site_metrics_query("gp2", &TimeWindow::default());
        assert!(site.contains("r._measurement == \"site_metrics\")"));
        assert!(site.contains("\"outdoor_air_temp\""));
        assert_eq!(delete_predicate(Measurement::SiteMetrics), "_measurement=\"site_metrics\"");
    }
}
