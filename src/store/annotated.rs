//! Decoder for InfluxDB annotated CSV query responses
//!
//! A response holds one or more tables separated by blank lines. Each table
//! starts with annotation rows (`#datatype`, `#group`, `#default`) followed by
//! a header row; the first column of every row is reserved for annotations.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// A typed cell value
#[derive(Debug, Clone, PartialEq)]
pub enum FluxValue {
    Null,
    Double(f64),
    Long(i64),
    UnsignedLong(u64),
    Bool(bool),
    String(String),
    Time(DateTime<Utc>),
}

impl FluxValue {
    /// Numeric view of the value
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FluxValue::Double(v) => Some(*v),
            FluxValue::Long(v) => Some(*v as f64),
            FluxValue::UnsignedLong(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// String view of the value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FluxValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Timestamp view of the value
    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            FluxValue::Time(t) => Some(*t),
            _ => None,
        }
    }

    fn parse(datatype: &str, raw: &str) -> Result<Self, StoreError> {
        if raw.is_empty() {
            return Ok(FluxValue::Null);
        }
        let invalid = || StoreError::Decode(format!("invalid {datatype} value '{raw}'"));
        let value = match datatype {
            "double" => FluxValue::Double(match raw {
                "+Inf" => f64::INFINITY,
                "-Inf" => f64::NEG_INFINITY,
                _ => raw.parse().map_err(|_| invalid())?,
            }),
            "long" => FluxValue::Long(raw.parse().map_err(|_| invalid())?),
            "unsignedLong" => FluxValue::UnsignedLong(raw.parse().map_err(|_| invalid())?),
            "boolean" => FluxValue::Bool(raw.parse().map_err(|_| invalid())?),
            "dateTime:RFC3339" | "dateTime:RFC3339Nano" => FluxValue::Time(
                DateTime::parse_from_rfc3339(raw)
                    .map_err(|_| invalid())?
                    .with_timezone(&Utc),
            ),
            _ => FluxValue::String(raw.to_string()),
        };
        Ok(value)
    }
}

/// One decoded row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FluxRecord {
    /// Values keyed by column name
    pub values: HashMap<String, FluxValue>,
}

impl FluxRecord {
    /// Raw value of a column
    pub fn get(&self, column: &str) -> Option<&FluxValue> {
        self.values.get(column)
    }

    /// Numeric value of a column, `None` when absent or null
    pub fn f64(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(FluxValue::as_f64)
    }

    /// String value of a column
    pub fn str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(FluxValue::as_str)
    }

    /// The `_time` column
    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.get("_time").and_then(FluxValue::as_time)
    }

    /// The `_value` column as a number
    pub fn value(&self) -> Option<f64> {
        self.f64("_value")
    }
}

#[derive(Default)]
struct TableState {
    datatypes: Vec<String>,
    defaults: Vec<String>,
    header: Option<Vec<String>>,
}

impl TableState {
    fn datatype(&self, idx: usize) -> &str {
        self.datatypes.get(idx).map_or("string", String::as_str)
    }
}

/// Decode an annotated CSV body into records
pub fn parse_annotated_csv(body: &str) -> Result<Vec<FluxRecord>, StoreError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut records = Vec::new();
    let mut table = TableState::default();

    for row in reader.records() {
        let row = row.map_err(|e| StoreError::Decode(e.to_string()))?;
        if row.iter().all(str::is_empty) {
            table = TableState::default();
            continue;
        }

        let first = row.get(0).unwrap_or_default();
        match first {
            "#datatype" => {
                table = TableState {
                    datatypes: row.iter().map(str::to_string).collect(),
                    ..Default::default()
                };
                continue;
            }
            "#default" => {
                table.defaults = row.iter().map(str::to_string).collect();
                continue;
            }
            _ if first.starts_with('#') => continue,
            _ => {}
        }

        let Some(header) = &table.header else {
            table.header = Some(row.iter().map(str::to_string).collect());
            continue;
        };

        // A repeated header row inside a table restates the columns
        if row.iter().eq(header.iter().map(String::as_str)) {
            continue;
        }

        let mut record = FluxRecord::default();
        for (idx, column) in header.iter().enumerate().skip(1) {
            if column.is_empty() {
                continue;
            }
            let mut raw = row.get(idx).unwrap_or_default();
            if raw.is_empty() {
                raw = table.defaults.get(idx).map_or("", String::as_str);
            }
            let value = FluxValue::parse(table.datatype(idx), raw)?;
            record.values.insert(column.clone(), value);
        }
        records.push(record);
    }

    Ok(records)
}
