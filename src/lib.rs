//! Churn Scoring Pipeline Library
//!
//! Scores a monthly customer feature extract with a pre-trained gradient
//! boosted classifier, generates ranked churn reasons from the model's own
//! feature contributions, and persists results into a keyed history table
//! through an idempotent staging + merge protocol.

pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod reasons;
pub mod schema;
pub mod store;
pub mod types;

pub use config::AppConfig;
pub use error::PipelineError;
pub use model::engine::ScoringEngine;
pub use pipeline::{ChurnPipeline, RunSummary};
pub use store::ChurnStore;
pub use types::extract::{Frame, Value};
pub use types::score::{MergeCounts, RiskBand, ScoredRecord};
