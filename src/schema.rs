//! Database schema management for the rollup service.
//!
//! Ensures the raw, daily-summary and all-time-summary tables exist for every
//! metric in the catalog. Applied once on startup from `main.rs`, and by tests
//! against in-memory databases.

use sqlx::SqlitePool;

use crate::catalog::{Catalog, Metric};
use crate::error::{Result, RollupError};

// ---

/// Create the schema for every metric (idempotent).
///
/// All statements run in one transaction; safe to call on every startup.
pub async fn provision(pool: &SqlitePool, catalog: &Catalog) -> Result<()> {
    // ---
    let mut tx = pool.begin().await.map_err(RollupError::write("schema"))?;

    for metric in catalog.metrics() {
        for statement in table_statements(metric) {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(RollupError::write(&metric.raw_table))?;
        }
        tracing::debug!(metric = %metric.name, "schema ensured");
    }

    tx.commit().await.map_err(RollupError::write("schema"))?;
    Ok(())
}

fn table_statements(metric: &Metric) -> Vec<String> {
    // ---
    let raw_columns: Vec<String> = metric
        .fields
        .iter()
        .map(|f| format!("{f} REAL NOT NULL"))
        .collect();

    let summary_columns: Vec<String> = metric
        .summary_columns()
        .iter()
        .map(|c| format!("{c} REAL"))
        .collect();

    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                {}
            )",
            metric.raw_table,
            raw_columns.join(",\n                ")
        ),
        // Older databases carry a plain timestamp index the planner would
        // pick for the window query's ORDER BY, scanning the whole table.
        format!("DROP INDEX IF EXISTS idx_{}_timestamp", metric.raw_table),
        // Must match the `DATE(timestamp)` expression the window and span
        // queries filter on, or SQLite falls back to a full scan.
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (DATE(timestamp))",
            day_index(metric),
            metric.raw_table
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                date TEXT PRIMARY KEY,
                {}
            )",
            metric.daily_table,
            summary_columns.join(",\n                ")
        ),
        // The CHECK constraint is what keeps this table to a single row.
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                {}
            )",
            metric.all_time_table,
            summary_columns.join(",\n                ")
        ),
    ]
}

/// Name of the expression index over a raw table's calendar date.
pub(crate) fn day_index(metric: &Metric) -> String {
    format!("idx_{}_day", metric.raw_table)
}
