//! Model artifact loading and scoring

pub mod artifact;
pub mod engine;

pub use artifact::{ModelArtifact, ModelColumns};
pub use engine::{RowContributions, ScoringEngine};
