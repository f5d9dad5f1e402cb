//! Feature preprocessing: column normalization, serialized-date conversion,
//! categorical handling, and alignment to the trained model's feature list.
//!
//! Every step is idempotent on already-normalized input, and row order is
//! preserved end to end so scores can be re-joined to identifiers.

use crate::error::PreprocessError;
use crate::model::artifact::ModelColumns;
use crate::types::extract::{Frame, Value};
use chrono::{Duration, NaiveDate};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Columns holding dates that may arrive as Excel serial day counts.
pub const DATE_COLUMNS: [&str; 3] = ["SnapshotDate", "FirstPurchaseDate", "LastPurchaseDate"];

/// Numeric date values above this are Excel serials (day counts since
/// 1899-12-30). 40000 corresponds to mid-2009; the business has no feature
/// legitimately that large in a date column.
pub const EXCEL_SERIAL_THRESHOLD: f64 = 40000.0;

/// Sentinel category for missing Segment / CostCenter values.
pub const UNKNOWN_CATEGORY: &str = "UNKNOWN";

/// Identifier and target columns that are never model features.
const NON_FEATURE_COLUMNS: [&str; 8] = [
    "CustomerId",
    "AccountName",
    "Segment",
    "CostCenter",
    "SnapshotDate",
    "FirstPurchaseDate",
    "LastPurchaseDate",
    "WillChurn90",
];

/// Numeric matrix aligned to the model's expected feature list, row-aligned
/// to the input batch.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f32>>,
}

/// Convert an Excel serial day count to a calendar date, if it is above the
/// conversion threshold.
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if serial <= EXCEL_SERIAL_THRESHOLD {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial as i64))
}

/// Strip bracket wrapping and Power BI table prefixes from column names:
/// `[SnapshotDate]` -> `SnapshotDate`, `Customers[account_Order]` ->
/// `CustomerId`. Already-normalized names pass through unchanged.
pub fn normalize_column_names(frame: &mut Frame) {
    let normalized: Vec<String> = frame
        .columns()
        .iter()
        .map(|col| normalize_column_name(col))
        .collect();
    debug!(columns = normalized.len(), "Normalized column names");
    frame.set_column_names(normalized);
}

fn normalize_column_name(raw: &str) -> String {
    let col = raw.trim();

    let inner = if let Some(rest) = col.strip_prefix("Customers[") {
        rest.strip_suffix(']').unwrap_or(rest)
    } else if col.starts_with('[') && col.ends_with(']') {
        &col[1..col.len() - 1]
    } else {
        col
    };

    // Power BI export names for the identifier columns.
    match inner {
        "account_Order" => "CustomerId".to_string(),
        "account_Name" => "AccountName".to_string(),
        "Cost Center" => "CostCenter".to_string(),
        other => other.to_string(),
    }
}

/// Convert Excel serial values in the date columns to calendar dates.
/// Calendar-typed and string-typed cells are left untouched; numeric values
/// at or below the threshold are flagged, never silently reinterpreted.
pub fn convert_serial_dates(frame: &mut Frame) {
    for name in DATE_COLUMNS {
        let Some(col) = frame.column_index(name) else {
            continue;
        };
        for row in 0..frame.n_rows() {
            let cell = &frame.rows()[row][col];
            let Some(num) = cell.as_f64() else { continue };

            if let Some(date) = excel_serial_to_date(num) {
                frame.set_value(row, col, Value::Date(date));
            } else {
                warn!(
                    column = name,
                    row,
                    value = num,
                    "Numeric date value below serial threshold; leaving unconverted"
                );
            }
        }
    }
}

/// Replace null Segment / CostCenter values with the UNKNOWN sentinel.
/// Rows are never dropped for missing categoricals.
pub fn fill_unknown_categoricals(frame: &mut Frame) {
    for name in ["Segment", "CostCenter"] {
        let Some(col) = frame.column_index(name) else {
            continue;
        };
        let mut filled = 0usize;
        for row in 0..frame.n_rows() {
            if frame.rows()[row][col].is_null() {
                frame.set_value(row, col, Value::Text(UNKNOWN_CATEGORY.to_string()));
                filled += 1;
            }
        }
        if filled > 0 {
            debug!(column = name, filled, "Filled missing categorical values");
        }
    }
}

/// Run the full preprocessing sequence in place, then build the numeric
/// matrix aligned to the model's expected columns: one-hot indicators for
/// Segment / CostCenter over the union of observed and training-time
/// categories, model-expected columns missing from the batch zero-filled,
/// batch columns unknown to the model dropped. Null numeric cells become NaN
/// so the trees route them through their default branch.
pub fn preprocess(frame: &mut Frame, model: &ModelColumns) -> Result<FeatureMatrix, PreprocessError> {
    normalize_column_names(frame);
    convert_serial_dates(frame);
    fill_unknown_categoricals(frame);

    check_encoding_collisions(frame)?;
    report_unseen_categories(frame, "Segment", &model.segment_categories);
    report_unseen_categories(frame, "CostCenter", &model.cost_center_categories);

    let matrix = align(frame, model);
    if matrix.rows.len() != frame.n_rows() {
        return Err(PreprocessError::RowCountMismatch {
            rows: matrix.rows.len(),
            expected: frame.n_rows(),
        });
    }
    Ok(matrix)
}

/// A raw extract column named like an indicator would silently collide with
/// the one-hot encoding. Fatal for the batch.
fn check_encoding_collisions(frame: &Frame) -> Result<(), PreprocessError> {
    for col in frame.columns() {
        if col.starts_with("Segment_") || col.starts_with("CostCenter_") {
            return Err(PreprocessError::EncodingCollision(col.clone()));
        }
    }
    Ok(())
}

/// Categories observed in this batch but absent from the training-time list
/// produce indicator columns the model never sees; alignment drops them.
fn report_unseen_categories(frame: &Frame, column: &str, trained: &[String]) {
    let Some(col) = frame.column_index(column) else {
        return;
    };
    let trained: HashSet<&str> = trained.iter().map(String::as_str).collect();
    let mut unseen: Vec<&str> = Vec::new();
    for row in frame.rows() {
        if let Some(category) = row[col].as_text() {
            if !trained.contains(category) && !unseen.contains(&category) {
                unseen.push(category);
            }
        }
    }
    if !unseen.is_empty() {
        warn!(
            column,
            categories = ?unseen,
            "Categories not seen at training time; their indicators will be dropped"
        );
    }
}

fn align(frame: &Frame, model: &ModelColumns) -> FeatureMatrix {
    let segment_col = frame.column_index("Segment");
    let cost_center_col = frame.column_index("CostCenter");

    // Source for each model column, resolved once.
    enum Source {
        SegmentIndicator(String),
        CostCenterIndicator(String),
        Extract(usize),
        ZeroFill,
    }

    let sources: Vec<Source> = model
        .columns
        .iter()
        .map(|name| {
            if let Some(cat) = name.strip_prefix("Segment_") {
                Source::SegmentIndicator(cat.to_string())
            } else if let Some(cat) = name.strip_prefix("CostCenter_") {
                Source::CostCenterIndicator(cat.to_string())
            } else if let Some(idx) = frame
                .column_index(name)
                .filter(|_| !NON_FEATURE_COLUMNS.contains(&name.as_str()))
            {
                Source::Extract(idx)
            } else {
                Source::ZeroFill
            }
        })
        .collect();

    let zero_filled = sources
        .iter()
        .filter(|s| matches!(s, Source::ZeroFill))
        .count();
    if zero_filled > 0 {
        debug!(
            columns = zero_filled,
            "Model-expected columns absent from batch; zero-filling"
        );
    }

    let rows = frame
        .rows()
        .iter()
        .map(|row| {
            sources
                .iter()
                .map(|source| match source {
                    Source::SegmentIndicator(cat) => {
                        indicator(segment_col.map(|c| &row[c]), cat)
                    }
                    Source::CostCenterIndicator(cat) => {
                        indicator(cost_center_col.map(|c| &row[c]), cat)
                    }
                    Source::Extract(idx) => match &row[*idx] {
                        Value::Null => f32::NAN,
                        v => v.as_f64().map(|f| f as f32).unwrap_or(f32::NAN),
                    },
                    Source::ZeroFill => 0.0,
                })
                .collect()
        })
        .collect();

    FeatureMatrix {
        columns: model.columns.clone(),
        rows,
    }
}

fn indicator(cell: Option<&Value>, category: &str) -> f32 {
    match cell.and_then(|v| v.as_text()) {
        Some(observed) if observed == category => 1.0,
        _ => 0.0,
    }
}
