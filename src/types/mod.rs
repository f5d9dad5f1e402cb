//! Type definitions for the churn scoring pipeline

pub mod extract;
pub mod score;

pub use extract::{Frame, Value};
pub use score::{MergeCounts, RiskBand, ScoredRecord};
