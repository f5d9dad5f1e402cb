//! Churn Scoring Pipeline - Batch Entry Point
//!
//! Reads a monthly extract CSV, scores every customer, and merges the
//! results into the score history database.

use anyhow::{Context, Result};
use churn_scoring_pipeline::{
    config::AppConfig, pipeline::ChurnPipeline, types::extract::Frame,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Configuration drives the log format, so load it first with a plain
    // default filter in place.
    let config = AppConfig::load()?;
    init_logging(&config)?;

    info!("Starting Churn Scoring Pipeline");
    info!(
        model = %config.model.model_path,
        database = %config.database.path,
        batch_size = config.pipeline.batch_size,
        "Configuration loaded"
    );

    let extract_path = std::env::args()
        .nth(1)
        .context("Usage: churn-score <extract.csv>")?;

    let frame = Frame::from_csv_path(&extract_path)
        .with_context(|| format!("Failed to read extract from {extract_path}"))?;
    info!(path = %extract_path, rows = frame.n_rows(), "Extract loaded");

    let mut pipeline = ChurnPipeline::new(&config)?;
    let summary = pipeline.run(frame)?;

    info!(
        run_id = %summary.run_id,
        snapshot = %summary.snapshot_date,
        rows = summary.rows_scored,
        inserted = summary.counts.inserted,
        updated = summary.counts.updated,
        high_risk = summary.high_risk,
        medium_risk = summary.medium_risk,
        low_risk = summary.low_risk,
        "Scoring run complete"
    );

    Ok(())
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("churn_scoring_pipeline={}", config.logging.level).parse()?)
        .add_directive(format!("churn_score={}", config.logging.level).parse()?);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
