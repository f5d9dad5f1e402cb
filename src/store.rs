//! Persistence protocol: staging + merge into the churn score history.
//!
//! The history table is keyed by (customer_id, snapshot_date) and only ever
//! changed through a whole-row upsert. A run stages its scored records into
//! an unkeyed transient table, then a single merge transaction lands them
//! all in history and truncates staging. A failed merge rolls back with
//! history untouched and staging intact, so the same run can be inspected
//! and retried. Exclusive access per run is a documented precondition; merge
//! transactions open in immediate mode to make it explicit.

use crate::error::StoreError;
use crate::types::score::{MergeCounts, RiskBand, ScoredRecord};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, TransactionBehavior};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Columns shared by the history and staging tables.
const SCORE_COLUMNS: &str = "customer_id, snapshot_date, account_name, segment, cost_center, \
     first_purchase_date, last_purchase_date, churn_risk, risk_band, \
     reason_1, reason_2, reason_3, scored_at, features";

/// Store over a SQLite database holding the score history.
pub struct ChurnStore {
    conn: Connection,
}

impl ChurnStore {
    /// Open (or create) the database at `path` and ensure the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create history and staging tables if absent. Idempotent. Staging has
    /// the same shape as history but no key and no NOT NULL constraints, so
    /// a bad batch can be staged and diagnosed rather than half-written.
    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS churn_scores (
                customer_id         TEXT NOT NULL,
                snapshot_date       TEXT NOT NULL,
                account_name        TEXT,
                segment             TEXT,
                cost_center         TEXT,
                first_purchase_date TEXT,
                last_purchase_date  TEXT,
                churn_risk          REAL NOT NULL,
                risk_band           TEXT NOT NULL,
                reason_1            TEXT NOT NULL DEFAULT '',
                reason_2            TEXT NOT NULL DEFAULT '',
                reason_3            TEXT NOT NULL DEFAULT '',
                scored_at           TEXT NOT NULL,
                features            TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (customer_id, snapshot_date)
            );
            CREATE TABLE IF NOT EXISTS churn_scores_staging (
                customer_id         TEXT,
                snapshot_date       TEXT,
                account_name        TEXT,
                segment             TEXT,
                cost_center         TEXT,
                first_purchase_date TEXT,
                last_purchase_date  TEXT,
                churn_risk          REAL,
                risk_band           TEXT,
                reason_1            TEXT,
                reason_2            TEXT,
                reason_3            TEXT,
                scored_at           TEXT,
                features            TEXT
            );",
        )?;
        Ok(())
    }

    /// Stage + merge in sequence. The normal persistence entry point.
    pub fn persist(
        &mut self,
        records: &[ScoredRecord],
        batch_size: usize,
    ) -> Result<MergeCounts, StoreError> {
        self.stage(records, batch_size)?;
        self.merge_staged()
    }

    /// Bulk-load the run's records into staging. One transaction: stale
    /// staging content from a previous failed run is cleared first, then
    /// rows are inserted in bounded batches. Batch size affects round trips
    /// only; any value yields the same staged state.
    pub fn stage(&mut self, records: &[ScoredRecord], batch_size: usize) -> Result<usize, StoreError> {
        validate_records(records)?;

        let batch_size = batch_size.max(1);
        let tx = self.conn.transaction()?;

        let stale = tx.execute("DELETE FROM churn_scores_staging", [])?;
        if stale > 0 {
            info!(rows = stale, "Cleared stale staging rows from a previous run");
        }

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO churn_scores_staging ({SCORE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ))?;
            for batch in records.chunks(batch_size) {
                for record in batch {
                    stmt.execute(params![
                        record.customer_id,
                        record.snapshot_date.to_string(),
                        record.account_name,
                        record.segment,
                        record.cost_center,
                        record.first_purchase_date.map(|d| d.to_string()),
                        record.last_purchase_date.map(|d| d.to_string()),
                        record.churn_risk,
                        record.risk_band.label(),
                        record.reasons[0],
                        record.reasons[1],
                        record.reasons[2],
                        record.scored_at.to_rfc3339(),
                        serde_json::Value::Object(record.features.clone()).to_string(),
                    ])?;
                }
                debug!(rows = batch.len(), "Staged batch");
            }
        }

        tx.commit()?;
        info!(rows = records.len(), "Staging complete");
        Ok(records.len())
    }

    /// Merge all staged rows into history as one atomic operation: existing
    /// (customer_id, snapshot_date) keys are replaced in full, new keys
    /// inserted. Staging is truncated in the same transaction, so it
    /// survives exactly when the merge does not commit.
    pub fn merge_staged(&mut self) -> Result<MergeCounts, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let total: u64 =
            tx.query_row("SELECT COUNT(*) FROM churn_scores_staging", [], |row| row.get(0))?;
        let updated: u64 = tx.query_row(
            "SELECT COUNT(*) FROM churn_scores_staging s
             WHERE EXISTS (
                 SELECT 1 FROM churn_scores h
                 WHERE h.customer_id = s.customer_id
                   AND h.snapshot_date = s.snapshot_date
             )",
            [],
            |row| row.get(0),
        )?;

        let merge = |tx: &rusqlite::Transaction<'_>| -> Result<(), rusqlite::Error> {
            tx.execute(
                &format!(
                    "INSERT INTO churn_scores ({SCORE_COLUMNS})
                     SELECT {SCORE_COLUMNS} FROM churn_scores_staging
                     WHERE true
                     ON CONFLICT (customer_id, snapshot_date) DO UPDATE SET
                         account_name        = excluded.account_name,
                         segment             = excluded.segment,
                         cost_center         = excluded.cost_center,
                         first_purchase_date = excluded.first_purchase_date,
                         last_purchase_date  = excluded.last_purchase_date,
                         churn_risk          = excluded.churn_risk,
                         risk_band           = excluded.risk_band,
                         reason_1            = excluded.reason_1,
                         reason_2            = excluded.reason_2,
                         reason_3            = excluded.reason_3,
                         scored_at           = excluded.scored_at,
                         features            = excluded.features"
                ),
                [],
            )?;
            tx.execute("DELETE FROM churn_scores_staging", [])?;
            Ok(())
        };

        if let Err(source) = merge(&tx) {
            // Dropping the transaction rolls it back: history untouched,
            // staging retains the run's rows for diagnosis and retry.
            drop(tx);
            return Err(StoreError::MergeRolledBack {
                staged: total as usize,
                source,
            });
        }
        tx.commit()?;

        let counts = MergeCounts {
            inserted: total - updated,
            updated,
            total,
        };
        info!(
            inserted = counts.inserted,
            updated = counts.updated,
            total = counts.total,
            "Merge committed"
        );
        Ok(counts)
    }

    /// Number of rows currently staged.
    pub fn staging_count(&self) -> Result<u64, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM churn_scores_staging", [], |row| row.get(0))?)
    }

    /// Number of history entries.
    pub fn history_count(&self) -> Result<u64, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM churn_scores", [], |row| row.get(0))?)
    }

    /// Fetch one history entry by its natural key.
    pub fn history_entry(
        &self,
        customer_id: &str,
        snapshot_date: NaiveDate,
    ) -> Result<Option<ScoredRecord>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SCORE_COLUMNS} FROM churn_scores
             WHERE customer_id = ?1 AND snapshot_date = ?2"
        ))?;

        let mut rows = stmt.query(params![customer_id, snapshot_date.to_string()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let parse_date = |s: Option<String>| {
            s.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
        };
        let snapshot: String = row.get(1)?;
        let scored_at: String = row.get(12)?;
        let features: String = row.get(13)?;
        let band: String = row.get(8)?;

        Ok(Some(ScoredRecord {
            customer_id: row.get(0)?,
            snapshot_date: NaiveDate::parse_from_str(&snapshot, "%Y-%m-%d")
                .unwrap_or_default(),
            account_name: row.get(2)?,
            segment: row.get(3)?,
            cost_center: row.get(4)?,
            first_purchase_date: parse_date(row.get(5)?),
            last_purchase_date: parse_date(row.get(6)?),
            churn_risk: row.get(7)?,
            risk_band: RiskBand::from_label(&band).unwrap_or(RiskBand::Low),
            reasons: [row.get(9)?, row.get(10)?, row.get(11)?],
            scored_at: DateTime::parse_from_rfc3339(&scored_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_default(),
            features: serde_json::from_str(&features).unwrap_or_default(),
        }))
    }

    /// Test hook used to provoke a merge failure: plants a staging row that
    /// violates the history table's NOT NULL constraints.
    #[cfg(test)]
    fn inject_invalid_staging_row(&self) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO churn_scores_staging (customer_id, snapshot_date, churn_risk, risk_band, scored_at)
             VALUES (NULL, '2024-01-31', 0.5, 'B - Medium Risk', '2024-02-01T00:00:00Z')",
            [],
        )?;
        Ok(())
    }
}

/// Fail fast with a named column before any staging I/O happens. Repeated
/// (customer_id, snapshot_date) keys within one batch are rejected here:
/// which duplicate wins the upsert would be arbitrary, and the merge counts
/// assume one staged row per key.
fn validate_records(records: &[ScoredRecord]) -> Result<(), StoreError> {
    let mut seen = HashSet::new();
    for (row, record) in records.iter().enumerate() {
        if record.customer_id.trim().is_empty() {
            return Err(StoreError::MissingColumn {
                row,
                column: "CustomerId",
            });
        }
        if !record.churn_risk.is_finite() {
            return Err(StoreError::MissingColumn {
                row,
                column: "ChurnRiskPct",
            });
        }
        if !seen.insert((record.customer_id.as_str(), record.snapshot_date)) {
            return Err(StoreError::DuplicateKey {
                row,
                customer_id: record.customer_id.clone(),
                snapshot_date: record.snapshot_date.to_string(),
            });
        }
    }
    Ok(())
}
