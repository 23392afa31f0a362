//! In-memory CSV table for EnergyPlus output files

use crate::error::{Result, SimulationError};
use std::io::{Read, Write};
use std::path::Path;

/// A CSV table kept as strings
///
/// EnergyPlus output is wide (hundreds of columns) but short enough to hold in
/// memory for column selection and renaming.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationTable {
    /// Column headers
    pub headers: Vec<String>,
    /// Rows, each as long as `headers`
    pub rows: Vec<Vec<String>>,
}

impl SimulationTable {
    /// Create a table from headers and rows
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    /// Read a CSV file
    pub fn read_csv(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    /// Read CSV from any reader
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            row.resize(headers.len(), String::new());
            rows.push(row);
        }

        Ok(Self { headers, rows })
    }

    /// Write the table as CSV
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        self.to_writer(file)
    }

    /// Write CSV to any writer
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Index of a column by exact header
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Index of a column, or a `MissingColumn` error
    pub fn require_column(&self, name: &str) -> std::result::Result<usize, SimulationError> {
        self.column_index(name)
            .ok_or_else(|| SimulationError::MissingColumn(name.to_string()))
    }

    /// Project the table onto the given column indices
    pub fn select(&self, indices: &[usize]) -> Self {
        let headers = indices.iter().map(|&i| self.headers[i].clone()).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Self { headers, rows }
    }

    /// Number of columns
    pub fn width(&self) -> usize {
        self.headers.len()
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
