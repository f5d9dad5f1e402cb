//! End-to-end pipeline tests: CSV-shaped extract in, scored history out,
//! against a small hand-built ensemble written to disk as real artifacts.

use churn_scoring_pipeline::model::artifact::{GbdtModel, ModelColumns, Tree, TreeNode};
use churn_scoring_pipeline::model::engine::ScoringEngine;
use churn_scoring_pipeline::pipeline::ChurnPipeline;
use churn_scoring_pipeline::store::ChurnStore;
use churn_scoring_pipeline::types::extract::{Frame, Value};
use churn_scoring_pipeline::types::score::RiskBand;
use chrono::NaiveDate;
use std::path::Path;

const SNAPSHOT: &str = "2024-01-31";

/// Two-tree ensemble over DaysSinceLast and Spend_CY with symmetric covers,
/// so each root expectation is zero and leaf weights read directly as
/// contributions.
fn fake_model() -> GbdtModel {
    let tree = |feature: usize, threshold: f64, left_leaf: f64, right_leaf: f64| Tree {
        nodes: vec![
            TreeNode::Split {
                feature,
                threshold,
                left: 1,
                right: 2,
                default_left: true,
                cover: 100.0,
            },
            TreeNode::Leaf {
                leaf: left_leaf,
                cover: 50.0,
            },
            TreeNode::Leaf {
                leaf: right_leaf,
                cover: 50.0,
            },
        ],
    };
    GbdtModel {
        version: "it-2024.01".into(),
        base_score: 0.0,
        trees: vec![
            // Long gaps since the last order push risk up.
            tree(0, 100.0, -1.5, 1.5),
            // High current-year spend pushes risk down.
            tree(1, 1000.0, 1.0, -1.0),
        ],
    }
}

fn fake_columns() -> ModelColumns {
    ModelColumns {
        columns: vec![
            "DaysSinceLast".to_string(),
            "Spend_CY".to_string(),
            "Segment_FITNESS".to_string(),
            "Segment_UNKNOWN".to_string(),
        ],
        segment_categories: vec!["FITNESS".to_string(), "UNKNOWN".to_string()],
        cost_center_categories: vec!["CMFIT".to_string()],
    }
}

fn write_artifacts(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let model_path = dir.join("churn_model.json");
    let columns_path = dir.join("model_columns.json");
    std::fs::write(&model_path, serde_json::to_string(&fake_model()).unwrap()).unwrap();
    std::fs::write(
        &columns_path,
        serde_json::to_string(&fake_columns()).unwrap(),
    )
    .unwrap();
    (model_path, columns_path)
}

/// A full-width extract with one clearly-churning and one clearly-healthy
/// customer. Padding columns bring the frame up to the expected contract
/// width; the model ignores them.
fn extract_frame() -> Frame {
    let mut columns = vec![
        "CustomerId".to_string(),
        "AccountName".to_string(),
        "Segment".to_string(),
        "CostCenter".to_string(),
        "SnapshotDate".to_string(),
        "FirstPurchaseDate".to_string(),
        "LastPurchaseDate".to_string(),
        "DaysSinceLast".to_string(),
        "Spend_CY".to_string(),
    ];
    for i in columns.len()..76 {
        columns.push(format!("Filler_{i}"));
    }
    let width = columns.len();
    let mut frame = Frame::new(columns);

    let snapshot = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
    let mut row = |id: &str, days_since_last: i64, spend: f64| {
        let mut cells = vec![
            Value::Text(id.to_string()),
            Value::Text(format!("Account {id}")),
            Value::Text("FITNESS".to_string()),
            Value::Text("CMFIT".to_string()),
            Value::Date(snapshot),
            Value::Date(NaiveDate::from_ymd_opt(2021, 6, 15).unwrap()),
            Value::Date(NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()),
            Value::Int(days_since_last),
            Value::Float(spend),
        ];
        cells.resize(width, Value::Float(0.0));
        frame.push_row(cells);
    };
    row("C001", 300, 50.0);
    row("C002", 10, 5000.0);
    frame
}

fn pipeline_in(dir: &Path) -> ChurnPipeline {
    let (model_path, columns_path) = write_artifacts(dir);
    let engine = ScoringEngine::new(model_path, columns_path);
    let store = ChurnStore::open(dir.join("scores.db")).unwrap();
    ChurnPipeline::with_parts(engine, store, 100)
}

#[test]
fn test_full_run_scores_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline_in(dir.path());

    let summary = pipeline.run(extract_frame()).unwrap();

    assert_eq!(summary.rows_scored, 2);
    assert_eq!(summary.snapshot_date.to_string(), SNAPSHOT);
    assert_eq!(summary.counts.inserted, 2);
    assert_eq!(summary.counts.updated, 0);
    assert_eq!(summary.high_risk, 1);
    assert_eq!(summary.medium_risk, 0);
    assert_eq!(summary.low_risk, 1);

    let snapshot = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
    let store = pipeline.store();
    assert_eq!(store.history_count().unwrap(), 2);

    // C001: margin 1.5 + 1.0 = 2.5, sigmoid ~0.92, high band; the gap
    // drove risk up and the low spend followed.
    let churning = store.history_entry("C001", snapshot).unwrap().unwrap();
    assert_eq!(churning.risk_band, RiskBand::High);
    assert!(churning.churn_risk > 0.9);
    assert_eq!(churning.reasons[0], "High days since last order");
    assert_eq!(churning.reasons[1], "Low spend (current year)");
    assert_eq!(churning.reasons[2], "");
    assert_eq!(churning.account_name, "Account C001");
    assert_eq!(churning.segment, "FITNESS");
    assert_eq!(
        churning.last_purchase_date,
        NaiveDate::from_ymd_opt(2024, 1, 10)
    );

    // C002: margin -2.5, low band; protectors phrased from their own signs.
    let healthy = store.history_entry("C002", snapshot).unwrap().unwrap();
    assert_eq!(healthy.risk_band, RiskBand::Low);
    assert!(healthy.churn_risk < 0.1);
    assert_eq!(healthy.reasons[0], "Low days since last order");
    assert_eq!(healthy.reasons[1], "High spend (current year)");

    // Raw extract features ride along on the record.
    assert_eq!(churning.features["DaysSinceLast"], serde_json::json!(300));
    assert_eq!(churning.features["Spend_CY"], serde_json::json!(50.0));
}

#[test]
fn test_rerun_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline_in(dir.path());

    let first = pipeline.run(extract_frame()).unwrap();
    let snapshot = first.snapshot_date;
    let before = pipeline.store().history_entry("C001", snapshot).unwrap().unwrap();

    let second = pipeline.run(extract_frame()).unwrap();

    // Same keys: everything updates, nothing inserts, history size holds.
    assert_eq!(second.counts.inserted, 0);
    assert_eq!(second.counts.updated, 2);
    assert_eq!(pipeline.store().history_count().unwrap(), 2);

    let after = pipeline.store().history_entry("C001", snapshot).unwrap().unwrap();
    assert_eq!(after.churn_risk, before.churn_risk);
    assert_eq!(after.risk_band, before.risk_band);
    assert_eq!(after.reasons, before.reasons);
}

#[test]
fn test_power_bi_export_headers_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline_in(dir.path());

    // Same extract, but with bracketed Power BI export names.
    let raw = extract_frame();
    let mut renamed: Vec<String> = raw
        .columns()
        .iter()
        .map(|c| format!("Customers[{c}]"))
        .collect();
    renamed[0] = "Customers[account_Order]".to_string();
    renamed[1] = "Customers[account_Name]".to_string();
    renamed[3] = "Customers[Cost Center]".to_string();
    let mut frame = raw.clone();
    frame.set_column_names(renamed);

    let summary = pipeline.run(frame).unwrap();
    assert_eq!(summary.rows_scored, 2);

    let entry = pipeline
        .store()
        .history_entry("C001", summary.snapshot_date)
        .unwrap()
        .unwrap();
    assert_eq!(entry.account_name, "Account C001");
    assert_eq!(entry.cost_center, "CMFIT");
}

#[test]
fn test_narrow_extract_rejected_before_any_write() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline_in(dir.path());

    let mut frame = Frame::new(vec!["CustomerId".to_string(), "SnapshotDate".to_string()]);
    frame.push_row(vec![
        Value::Text("C001".to_string()),
        Value::Date(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()),
    ]);

    assert!(pipeline.run(frame).is_err());
    assert_eq!(pipeline.store().history_count().unwrap(), 0);
    assert_eq!(pipeline.store().staging_count().unwrap(), 0);
}

#[test]
fn test_missing_artifact_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let engine = ScoringEngine::new(
        dir.path().join("no_model.json"),
        dir.path().join("no_columns.json"),
    );
    let store = ChurnStore::open(dir.path().join("scores.db")).unwrap();
    let mut pipeline = ChurnPipeline::with_parts(engine, store, 100);

    assert!(pipeline.run(extract_frame()).is_err());
    assert_eq!(pipeline.store().history_count().unwrap(), 0);
}
