//! Scoring engine: cached model artifact, churn probabilities, and the
//! ensemble's native per-feature contribution decomposition.
//!
//! The artifact is loaded at most once per process; the first caller pays
//! the load cost and later calls reuse the cache. Tests inject a fake
//! artifact instead of touching the filesystem.

use crate::config::ModelConfig;
use crate::error::ModelError;
use crate::model::artifact::ModelArtifact;
use crate::preprocess::FeatureMatrix;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Per-row feature attributions in margin space. `bias + values.sum()`
/// equals the row's raw margin; the bias term is never a reason candidate.
#[derive(Debug, Clone)]
pub struct RowContributions {
    /// One signed value per model column, in model column order
    pub values: Vec<f64>,
    /// Intercept: base score plus each tree's root expectation
    pub bias: f64,
}

/// Scoring engine holding the process-lifetime artifact cache.
pub struct ScoringEngine {
    model_path: PathBuf,
    columns_path: PathBuf,
    cache: OnceLock<Arc<ModelArtifact>>,
}

impl ScoringEngine {
    /// Create an engine that lazily loads the artifact from the given paths.
    pub fn new(model_path: impl Into<PathBuf>, columns_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            columns_path: columns_path.into(),
            cache: OnceLock::new(),
        }
    }

    /// Create an engine from configuration.
    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(&config.model_path, &config.columns_path)
    }

    /// Create an engine with a pre-seeded artifact, bypassing the
    /// filesystem. Intended for tests with fake models.
    pub fn with_artifact(artifact: ModelArtifact) -> Self {
        let cache = OnceLock::new();
        let _ = cache.set(Arc::new(artifact));
        Self {
            model_path: PathBuf::new(),
            columns_path: PathBuf::new(),
            cache,
        }
    }

    /// Whether the artifact cache is populated.
    pub fn is_loaded(&self) -> bool {
        self.cache.get().is_some()
    }

    /// Load the artifact, or return the cached copy.
    pub fn load(&self) -> Result<Arc<ModelArtifact>, ModelError> {
        if let Some(artifact) = self.cache.get() {
            return Ok(artifact.clone());
        }
        let artifact = ModelArtifact::load(&self.model_path, &self.columns_path)?;
        // A concurrent first caller may have won the race; either copy is
        // the same immutable artifact.
        Ok(self.cache.get_or_init(|| Arc::new(artifact)).clone())
    }

    /// Churn probability for every row: positive-class output of the
    /// ensemble, sigmoid of the summed margins.
    pub fn predict(&self, matrix: &FeatureMatrix) -> Result<Vec<f64>, ModelError> {
        let artifact = self.load()?;
        check_columns(&artifact, matrix)?;

        let probs = matrix
            .rows
            .iter()
            .map(|row| {
                let margin: f64 = artifact.model.base_score
                    + artifact
                        .model
                        .trees
                        .iter()
                        .map(|tree| tree.walk(row).leaf_value)
                        .sum::<f64>();
                sigmoid(margin)
            })
            .collect();

        debug!(rows = matrix.rows.len(), "Scored batch");
        Ok(probs)
    }

    /// Per-row, per-feature attributions via the ensemble's own additive
    /// path decomposition: for every split taken, the change in expected
    /// node value is credited to the split feature. This is deliberately the
    /// classifier's internal decomposition, not a model-agnostic explainer;
    /// the reason text's semantics are defined relative to it.
    pub fn contributions(&self, matrix: &FeatureMatrix) -> Result<Vec<RowContributions>, ModelError> {
        let artifact = self.load()?;
        check_columns(&artifact, matrix)?;

        let rows = matrix
            .rows
            .iter()
            .map(|row| {
                let mut values = vec![0.0f64; artifact.n_features()];
                let mut bias = artifact.model.base_score;

                for (t, tree) in artifact.model.trees.iter().enumerate() {
                    bias += artifact.node_value(t, 0);
                    let path = tree.walk(row);
                    for step in &path.steps {
                        let delta =
                            artifact.node_value(t, step.to) - artifact.node_value(t, step.from);
                        values[step.feature] += delta;
                    }
                }

                RowContributions { values, bias }
            })
            .collect();

        Ok(rows)
    }
}

fn check_columns(artifact: &ModelArtifact, matrix: &FeatureMatrix) -> Result<(), ModelError> {
    if matrix.columns.len() != artifact.n_features() {
        return Err(ModelError::ColumnMismatch {
            expected: artifact.n_features(),
            found: matrix.columns.len(),
        });
    }
    Ok(())
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
