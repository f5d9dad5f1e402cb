//! Error taxonomy for the churn scoring pipeline.
//!
//! Every stage raises rather than returning a sentinel. Variants preserve
//! their underlying cause so the caller can distinguish a missing model
//! artifact from a corrupt one, or a connectivity failure from a constraint
//! violation, without string matching.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level pipeline error, one variant per stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Raw extract failed the column contract before any scoring work began.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("extract has too few columns: {found} (expected at least {minimum})")]
    TooFewColumns { found: usize, minimum: usize },
    #[error("missing required columns: {0:?}")]
    MissingColumns(Vec<String>),
    #[error("duplicate columns found: {0:?}")]
    DuplicateColumns(Vec<String>),
    #[error("all SnapshotDate values are null")]
    NoSnapshotDate,
    #[error("extract contains no data rows")]
    EmptyExtract,
}

/// Model artifact problems. `ArtifactNotFound` means "redeploy the model";
/// `ArtifactCorrupt` means "investigate the file".
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model artifact not found: {0}")]
    ArtifactNotFound(PathBuf),
    #[error("model artifact unreadable: {path}")]
    ArtifactUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("model artifact corrupt: {path}")]
    ArtifactCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("model tree references feature index {index} but only {columns} columns are expected")]
    FeatureIndexOutOfRange { index: usize, columns: usize },
    #[error("model tree is malformed: {0}")]
    MalformedTree(String),
    #[error("feature matrix has {found} columns but the model expects {expected}")]
    ColumnMismatch { expected: usize, found: usize },
}

/// Data shape that survived schema validation but broke column alignment.
/// Fatal for the whole batch; no partial-row recovery.
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("one-hot encoding collision: column {0} already exists in the extract")]
    EncodingCollision(String),
    #[error("feature matrix has {rows} rows but extract has {expected}")]
    RowCountMismatch { rows: usize, expected: usize },
}

/// Persistence failures. The rusqlite cause is carried verbatim so operators
/// can tell connectivity failures from constraint violations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("record {row} is missing required column {column}")]
    MissingColumn { row: usize, column: &'static str },
    #[error("record {row} repeats key ({customer_id}, {snapshot_date}) within the batch")]
    DuplicateKey {
        row: usize,
        customer_id: String,
        snapshot_date: String,
    },
    #[error("merge rolled back after {staged} rows staged")]
    MergeRolledBack {
        staged: usize,
        #[source]
        source: rusqlite::Error,
    },
}
