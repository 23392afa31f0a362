//! Data points and InfluxDB line protocol

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// A single measurement sample
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// Measurement name
    pub measurement: String,
    /// Tag set
    pub tags: BTreeMap<String, String>,
    /// Field set
    pub fields: BTreeMap<String, f64>,
    /// Sample time
    pub time: DateTime<Utc>,
}

impl Point {
    /// Create a point stamped with the current time
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            time: Utc::now(),
        }
    }

    /// Add a tag
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add a field
    pub fn field(mut self, key: impl Into<String>, value: f64) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Set the timestamp
    pub fn time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    /// Tag value by key
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Render one line of line protocol with a nanosecond timestamp
    ///
    /// ```text
    /// thermal_zone,zone_id=BLOCK1:CORRIDOR:X1F mean_air_temperature=21.5 1104541200000000000
    /// ```
    pub fn to_line_protocol(&self) -> Result<String, StoreError> {
        if self.measurement.is_empty() {
            return Err(StoreError::InvalidPoint("empty measurement name".into()));
        }
        if self.fields.is_empty() {
            return Err(StoreError::InvalidPoint(format!(
                "point in '{}' has no fields",
                self.measurement
            )));
        }
        let names = std::iter::once(&self.measurement)
            .chain(self.tags.iter().flat_map(|(k, v)| [k, v]))
            .chain(self.fields.keys());
        for name in names {
            if name.contains(['\n', '\r']) {
                return Err(StoreError::InvalidPoint(format!(
                    "line break in {name:?} of '{}'",
                    self.measurement
                )));
            }
        }
        let nanos = self.time.timestamp_nanos_opt().ok_or_else(|| {
            StoreError::InvalidPoint(format!("timestamp {} out of range", self.time))
        })?;

        let mut line = escape(&self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            // Line protocol has no representation for an empty tag value
            if value.is_empty() {
                continue;
            }
            let _ = write!(
                line,
                ",{}={}",
                escape(key, &[',', '=', ' ']),
                escape(value, &[',', '=', ' '])
            );
        }

        let mut separator = ' ';
        for (key, value) in &self.fields {
            if !value.is_finite() {
                return Err(StoreError::InvalidPoint(format!(
                    "field '{key}' has non-finite value {value}"
                )));
            }
            let _ = write!(line, "{separator}{}={value}", escape(key, &[',', '=', ' ']));
            separator = ',';
        }

        let _ = write!(line, " {nanos}");
        Ok(line)
    }
}

/// Render a batch, one point per line
pub fn to_line_protocol_batch(points: &[Point]) -> Result<String, StoreError> {
    let lines = points
        .iter()
        .map(Point::to_line_protocol)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lines.join("\n"))
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn jan_first() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2005, 1, 1, 1, 0, 0).unwrap()
    }

    #[test]
    fn test_line_protocol() {
        let point = Point::new("thermal_zone")
            .tag("zone_id", "BLOCK1:CORRIDOR:X1F")
            .field("mean_air_temperature", 21.5)
            .field("cooling_rate", 0.0)
            .time(jan_first());
        assert_eq!(
            point.to_line_protocol().unwrap(),
            "thermal_zone,zone_id=BLOCK1:CORRIDOR:X1F cooling_rate=0,mean_air_temperature=21.5 1104541200000000000"
        );
    }

    #[test]
    fn test_escaping() {
        let point = Point::new("site metrics,x")
            .tag("zone id", "a=b,c d")
            .field("air temp", 1.25)
            .time(jan_first());
        assert_eq!(
            point.to_line_protocol().unwrap(),
            r"site\ metrics\,x,zone\ id=a\=b\,c\ d air\ temp=1.25 1104541200000000000"
        );
    }

    #[test]
    fn test_empty_tag_value_is_skipped() {
        let point = Point::new("site_metrics")
            .tag("zone_id", "")
            .field("outdoor_air_temp", -3.0)
            .time(jan_first());
        assert_eq!(
            point.to_line_protocol().unwrap(),
            "site_metrics outdoor_air_temp=-3 1104541200000000000"
        );
    }

    #[test]
    fn test_rejects_invalid_points() {
        let no_fields = Point::new("site_metrics").time(jan_first());
        assert!(matches!(no_fields.to_line_protocol(), Err(StoreError::InvalidPoint(_))));

        let nan = Point::new("site_metrics").field("x", f64::NAN).time(jan_first());
        assert!(matches!(nan.to_line_protocol(), Err(StoreError::InvalidPoint(_))));

        let unnamed = Point::new("").field("x", 1.0);
        assert!(unnamed.to_line_protocol().is_err());

        let broken_tag = Point::new("thermal_zone")
            .tag("zone_id", "BLOCK1\nsite_metrics x=1")
            .field("x", 1.0)
            .time(jan_first());
        assert!(matches!(broken_tag.to_line_protocol(), Err(StoreError::InvalidPoint(_))));
    }

    #[test]
    fn test_batch_joins_lines() {
        let a = Point::new("m").field("x", 1.0).time(jan_first());
        let b = Point::new("m").field("x", 2.0).time(jan_first());
        let batch = to_line_protocol_batch(&[a, b]).unwrap();
        assert_eq!(batch.lines().count(), 2);
    }
}
