//! Scored record data structures

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Probability at or above which a customer is banded High risk.
pub const HIGH_RISK_THRESHOLD: f64 = 0.7;
/// Probability at or above which a customer is banded Medium risk.
pub const MEDIUM_RISK_THRESHOLD: f64 = 0.3;

/// Risk band classification. Thresholds are a shared invariant between
/// explanation generation and persistence tagging: every probability in
/// [0, 1] maps to exactly one band, boundary values to the higher band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    High,
    Medium,
    Low,
}

impl RiskBand {
    /// Determine the band from a churn probability.
    pub fn from_probability(prob: f64) -> Self {
        if prob >= HIGH_RISK_THRESHOLD {
            RiskBand::High
        } else if prob >= MEDIUM_RISK_THRESHOLD {
            RiskBand::Medium
        } else {
            RiskBand::Low
        }
    }

    /// Persisted label, matching the reporting convention downstream
    /// dashboards sort on.
    pub fn label(&self) -> &'static str {
        match self {
            RiskBand::High => "A - High Risk",
            RiskBand::Medium => "B - Medium Risk",
            RiskBand::Low => "C - Low Risk",
        }
    }

    /// Parse a persisted label back into a band.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "A - High Risk" => Some(RiskBand::High),
            "B - Medium Risk" => Some(RiskBand::Medium),
            "C - Low Risk" => Some(RiskBand::Low),
            _ => None,
        }
    }
}

/// One customer's scoring output for a snapshot, ready for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredRecord {
    /// Customer identifier (natural key, with snapshot_date)
    pub customer_id: String,

    /// Snapshot the extract represents (natural key, with customer_id)
    pub snapshot_date: NaiveDate,

    pub account_name: String,
    pub segment: String,
    pub cost_center: String,

    /// Needed downstream for lifecycle status derivation
    pub first_purchase_date: Option<NaiveDate>,
    /// Needed downstream for lifecycle status derivation
    pub last_purchase_date: Option<NaiveDate>,

    /// Churn probability in [0, 1]
    pub churn_risk: f64,

    pub risk_band: RiskBand,

    /// Exactly three ranked reason slots; unused slots are empty strings
    pub reasons: [String; 3],

    /// When this record was scored
    pub scored_at: DateTime<Utc>,

    /// Raw feature values from the extract, keyed by normalized column name.
    /// Persisted alongside the score so a row is fully reproducible.
    pub features: serde_json::Map<String, serde_json::Value>,
}

/// Counts returned by a committed merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeCounts {
    /// Rows with a new (customer_id, snapshot_date) key
    pub inserted: u64,
    /// Rows that replaced an existing key
    pub updated: u64,
    /// Total staged rows processed
    pub total: u64,
}
