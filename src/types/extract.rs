//! Loosely-typed tabular batch as it arrives from the extract source.
//!
//! The monthly extract is a wide CSV (~76 columns) whose cells mix numbers,
//! dates, serialized day counts and free text. `Frame` keeps the batch in
//! column order with per-cell [`Value`] typing so the preprocessor can
//! normalize it without guessing a schema up front.

use chrono::NaiveDate;
use std::io::Read;
use std::path::Path;
use tracing::info;

/// A single cell of the extract.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the cell. Text and dates are not numbers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Column-ordered batch of rows. Row order is preserved through every
/// pipeline stage so results can be re-joined to identifiers afterward.
#[derive(Debug, Clone)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Frame {
    /// Create an empty frame with the given column names.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row. Panics if the cell count does not match the column
    /// count; callers construct rows from the same header.
    pub fn push_row(&mut self, row: Vec<Value>) {
        assert_eq!(
            row.len(),
            self.columns.len(),
            "row width must match column count"
        );
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Index of a column by name, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at (row, column name), if both exist.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[col])
    }

    pub fn set_value(&mut self, row: usize, col: usize, value: Value) {
        self.rows[row][col] = value;
    }

    /// Replace all column names at once. Used by normalization, which maps
    /// names positionally.
    pub fn set_column_names(&mut self, columns: Vec<String>) {
        assert_eq!(columns.len(), self.columns.len());
        self.columns = columns;
    }

    /// Parse a CSV extract from any reader. Cells are typed greedily:
    /// empty -> Null, integer -> Int, float -> Float, ISO date -> Date,
    /// anything else -> trimmed Text.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, csv::Error> {
        let mut rdr = csv::ReaderBuilder::new().flexible(false).from_reader(reader);

        let columns: Vec<String> = rdr
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut frame = Frame::new(columns);
        for record in rdr.records() {
            let record = record?;
            let row = record.iter().map(parse_cell).collect();
            frame.rows.push(row);
        }

        info!(
            rows = frame.n_rows(),
            columns = frame.n_cols(),
            "Parsed CSV extract"
        );
        Ok(frame)
    }

    /// Parse a CSV extract from a file path.
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self, csv::Error> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_csv_reader(file)
    }
}

fn parse_cell(raw: &str) -> Value {
    let cell = raw.trim();
    if cell.is_empty() {
        return Value::Null;
    }
    // Zero-padded digits mark an identifier ("001"), not a number.
    let zero_padded =
        cell.len() > 1 && cell.starts_with('0') && cell.chars().all(|c| c.is_ascii_digit());
    if !zero_padded {
        if let Ok(i) = cell.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(f) = cell.parse::<f64>() {
            return Value::Float(f);
        }
    }
    // Extract dates arrive as either ISO or US-slash strings.
    if let Ok(d) = NaiveDate::parse_from_str(cell, "%Y-%m-%d") {
        return Value::Date(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(cell, "%m/%d/%Y") {
        return Value::Date(d);
    }
    Value::Text(cell.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_typing() {
        assert_eq!(parse_cell(""), Value::Null);
        assert_eq!(parse_cell("  "), Value::Null);
        assert_eq!(parse_cell("42"), Value::Int(42));
        assert_eq!(parse_cell("3.5"), Value::Float(3.5));
        assert_eq!(
            parse_cell("2024-01-31"),
            Value::Date(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap())
        );
        assert_eq!(parse_cell("FITNESS"), Value::Text("FITNESS".to_string()));
        assert_eq!(parse_cell("001"), Value::Text("001".to_string()));
        assert_eq!(parse_cell("0.5"), Value::Float(0.5));
        assert_eq!(parse_cell("0"), Value::Int(0));
    }

    #[test]
    fn test_csv_parse() {
        let csv = "CustomerId,Spend_CY,SnapshotDate\n001,120.5,2024-01-31\n002,,2024-01-31\n";
        let frame = Frame::from_csv_reader(csv.as_bytes()).unwrap();

        assert_eq!(frame.n_rows(), 2);
        assert_eq!(frame.n_cols(), 3);
        assert_eq!(
            frame.value(0, "CustomerId"),
            Some(&Value::Text("001".to_string()))
        );
        assert_eq!(frame.value(1, "Spend_CY"), Some(&Value::Null));
    }

    #[test]
    fn test_column_lookup() {
        let mut frame = Frame::new(vec!["A".into(), "B".into()]);
        frame.push_row(vec![Value::Int(1), Value::Text("x".into())]);

        assert_eq!(frame.column_index("B"), Some(1));
        assert_eq!(frame.column_index("C"), None);
        assert_eq!(frame.value(0, "B").and_then(|v| v.as_text()), Some("x"));
    }
}
