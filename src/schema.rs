//! Schema validation for the raw extract.
//!
//! Checks the incoming batch against the expected column contract before any
//! scoring work begins. Hard violations (too few columns, missing required
//! identifiers, duplicates, no snapshot date) abort the run; column-count
//! drift above the expected band is logged and tolerated.

use crate::error::SchemaError;
use crate::types::extract::{Frame, Value};
use chrono::NaiveDate;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Expected column count for the scoring extract:
/// 7 identifiers + 12 aggregate + 3 trend + 50 category (10x5) + 4 breadth.
pub const EXPECTED_COLUMN_COUNT: usize = 76;
/// Below this, the extract is unusable.
pub const MIN_COLUMN_COUNT: usize = 70;
/// Above this, something upstream changed; warn but proceed.
pub const MAX_COLUMN_COUNT: usize = 85;

/// Identifier columns that must be present (after name normalization).
pub const REQUIRED_IDENTIFIER_COLUMNS: [&str; 5] = [
    "CustomerId",
    "AccountName",
    "Segment",
    "CostCenter",
    "SnapshotDate",
];

/// Validate the extract's structure. Returns the run's snapshot date (the
/// first non-null SnapshotDate value). No side effects beyond logging.
pub fn validate(frame: &Frame) -> Result<NaiveDate, SchemaError> {
    info!(
        rows = frame.n_rows(),
        columns = frame.n_cols(),
        "Validating extract schema"
    );

    if frame.n_rows() == 0 {
        return Err(SchemaError::EmptyExtract);
    }

    validate_column_count(frame)?;
    validate_required_columns(frame)?;
    validate_no_duplicate_columns(frame)?;
    let snapshot = validate_snapshot_date(frame)?;

    info!(
        rows = frame.n_rows(),
        columns = frame.n_cols(),
        snapshot = %snapshot,
        "Extract schema validation passed"
    );
    Ok(snapshot)
}

fn validate_column_count(frame: &Frame) -> Result<(), SchemaError> {
    let count = frame.n_cols();

    if count < MIN_COLUMN_COUNT {
        return Err(SchemaError::TooFewColumns {
            found: count,
            minimum: MIN_COLUMN_COUNT,
        });
    }

    if count > MAX_COLUMN_COUNT {
        warn!(
            columns = count,
            expected = EXPECTED_COLUMN_COUNT,
            "Extract has more columns than expected; possible upstream schema change"
        );
    }

    debug!(columns = count, expected = EXPECTED_COLUMN_COUNT, "Column count ok");
    Ok(())
}

fn validate_required_columns(frame: &Frame) -> Result<(), SchemaError> {
    let missing: Vec<String> = REQUIRED_IDENTIFIER_COLUMNS
        .iter()
        .filter(|col| frame.column_index(col).is_none())
        .map(|col| col.to_string())
        .collect();

    if !missing.is_empty() {
        return Err(SchemaError::MissingColumns(missing));
    }
    Ok(())
}

fn validate_no_duplicate_columns(frame: &Frame) -> Result<(), SchemaError> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();

    for col in frame.columns() {
        if !seen.insert(col.as_str()) {
            duplicates.push(col.clone());
        }
    }

    if !duplicates.is_empty() {
        return Err(SchemaError::DuplicateColumns(duplicates));
    }
    Ok(())
}

/// SnapshotDate must have at least one usable value; the first one names the
/// run. Accepts calendar dates, date text, and Excel serials above the
/// conversion threshold (the preprocessor converts cells later).
fn validate_snapshot_date(frame: &Frame) -> Result<NaiveDate, SchemaError> {
    for row in 0..frame.n_rows() {
        match frame.value(row, "SnapshotDate") {
            Some(Value::Date(d)) => return Ok(*d),
            Some(Value::Text(s)) => {
                // Date text may carry a time suffix; only the first ten
                // bytes matter, and non-ASCII junk must not slice mid-char.
                let prefix = s.get(..10).unwrap_or(s);
                if let Ok(d) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
                    return Ok(d);
                }
            }
            Some(v) => {
                if let Some(serial) = v.as_f64() {
                    if let Some(d) = crate::preprocess::excel_serial_to_date(serial) {
                        return Ok(d);
                    }
                }
            }
            None => break,
        }
    }
    Err(SchemaError::NoSnapshotDate)
}
