//! End-to-end pipeline orchestration: validate, preprocess, score, explain,
//! persist. One run processes one extracted batch start to finish; every
//! stage before persistence is a pure in-memory transformation, so a failure
//! anywhere aborts the run with no side effects to undo.

use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::model::engine::ScoringEngine;
use crate::preprocess;
use crate::reasons;
use crate::schema;
use crate::store::ChurnStore;
use crate::types::extract::{Frame, Value};
use crate::types::score::{MergeCounts, RiskBand, ScoredRecord};
use chrono::{NaiveDate, Utc};
use tracing::info;
use uuid::Uuid;

/// Frame columns carried onto the scored record directly rather than into
/// the feature payload.
const IDENTITY_COLUMNS: [&str; 8] = [
    "CustomerId",
    "AccountName",
    "Segment",
    "CostCenter",
    "SnapshotDate",
    "FirstPurchaseDate",
    "LastPurchaseDate",
    "WillChurn90",
];

/// Outcome of one committed pipeline run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub snapshot_date: NaiveDate,
    pub rows_scored: usize,
    pub counts: MergeCounts,
    pub high_risk: usize,
    pub medium_risk: usize,
    pub low_risk: usize,
}

/// The scoring pipeline, wiring the engine and store together.
pub struct ChurnPipeline {
    engine: ScoringEngine,
    store: ChurnStore,
    batch_size: usize,
}

impl ChurnPipeline {
    /// Build a pipeline from configuration.
    pub fn new(config: &AppConfig) -> Result<Self, PipelineError> {
        let engine = ScoringEngine::from_config(&config.model);
        let store = ChurnStore::open(&config.database.path).map_err(PipelineError::Store)?;
        Ok(Self {
            engine,
            store,
            batch_size: config.pipeline.batch_size,
        })
    }

    /// Build a pipeline from already-constructed parts. Tests wire in a fake
    /// artifact and an in-memory store through here.
    pub fn with_parts(engine: ScoringEngine, store: ChurnStore, batch_size: usize) -> Self {
        Self {
            engine,
            store,
            batch_size,
        }
    }

    /// Run the full pipeline over one extract batch.
    pub fn run(&mut self, mut frame: Frame) -> Result<RunSummary, PipelineError> {
        let run_id = Uuid::new_v4();
        info!(%run_id, rows = frame.n_rows(), "Pipeline run starting");

        // Normalize names before validation so the column contract is
        // checked against canonical names; preprocessing re-normalizes,
        // which is a no-op.
        preprocess::normalize_column_names(&mut frame);
        let snapshot_date = schema::validate(&frame)?;

        let artifact = self.engine.load()?;
        let matrix = preprocess::preprocess(&mut frame, &artifact.columns)?;

        let probabilities = self.engine.predict(&matrix)?;
        let contributions = self.engine.contributions(&matrix)?;

        let scored_at = Utc::now();
        let records: Vec<ScoredRecord> = probabilities
            .iter()
            .zip(&contributions)
            .enumerate()
            .map(|(row, (&probability, row_contribs))| {
                let reasons = reasons::top_reasons(&matrix.columns, row_contribs, probability);
                assemble_record(&frame, row, snapshot_date, probability, reasons, scored_at)
            })
            .collect();

        let counts = self
            .store
            .persist(&records, self.batch_size)
            .map_err(PipelineError::Store)?;

        let mut summary = RunSummary {
            run_id,
            snapshot_date,
            rows_scored: records.len(),
            counts,
            high_risk: 0,
            medium_risk: 0,
            low_risk: 0,
        };
        for record in &records {
            match record.risk_band {
                RiskBand::High => summary.high_risk += 1,
                RiskBand::Medium => summary.medium_risk += 1,
                RiskBand::Low => summary.low_risk += 1,
            }
        }

        info!(
            %run_id,
            snapshot = %summary.snapshot_date,
            rows = summary.rows_scored,
            inserted = counts.inserted,
            updated = counts.updated,
            high = summary.high_risk,
            medium = summary.medium_risk,
            low = summary.low_risk,
            "Pipeline run committed"
        );
        Ok(summary)
    }

    /// Read access to the underlying store, for reporting after a run.
    pub fn store(&self) -> &ChurnStore {
        &self.store
    }
}

fn assemble_record(
    frame: &Frame,
    row: usize,
    run_snapshot: NaiveDate,
    probability: f64,
    reasons: [String; 3],
    scored_at: chrono::DateTime<Utc>,
) -> ScoredRecord {
    let text = |column: &str| -> String {
        frame
            .value(row, column)
            .map(cell_to_string)
            .unwrap_or_default()
    };
    let date = |column: &str| frame.value(row, column).and_then(|v| v.as_date());

    // A row with a null snapshot cell still belongs to the run's snapshot.
    let snapshot_date = date("SnapshotDate").unwrap_or(run_snapshot);

    let mut features = serde_json::Map::new();
    for (col, name) in frame.columns().iter().enumerate() {
        if IDENTITY_COLUMNS.contains(&name.as_str()) {
            continue;
        }
        features.insert(name.clone(), value_to_json(&frame.rows()[row][col]));
    }

    ScoredRecord {
        customer_id: text("CustomerId"),
        snapshot_date,
        account_name: text("AccountName"),
        segment: text("Segment"),
        cost_center: text("CostCenter"),
        first_purchase_date: date("FirstPurchaseDate"),
        last_purchase_date: date("LastPurchaseDate"),
        churn_risk: probability,
        risk_band: RiskBand::from_probability(probability),
        reasons,
        scored_at,
        features,
    }
}

fn cell_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Date(d) => d.to_string(),
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Int(i) => serde_json::json!(i),
        Value::Float(f) => serde_json::json!(f),
        Value::Text(s) => serde_json::json!(s),
        Value::Date(d) => serde_json::json!(d.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_to_string_preserves_identifiers() {
        assert_eq!(cell_to_string(&Value::Text("001".into())), "001");
        assert_eq!(cell_to_string(&Value::Int(42)), "42");
        assert_eq!(cell_to_string(&Value::Null), "");
    }

    #[test]
    fn test_value_to_json_types() {
        assert_eq!(value_to_json(&Value::Null), serde_json::Value::Null);
        assert_eq!(value_to_json(&Value::Int(3)), serde_json::json!(3));
        assert_eq!(
            value_to_json(&Value::Date(
                NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()
            )),
            serde_json::json!("2024-01-31")
        );
    }
}
