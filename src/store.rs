//! SQLite access for raw readings and their rollups.
//!
//! Daily rows are replaced by `date` key and written one transaction per
//! window. The all-time row is replaced on the singleton key `id = 1`.
//! Table and column names come from a validated [`Catalog`](crate::Catalog),
//! values are always bound.

use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::catalog::Metric;
use crate::error::{Result, RollupError};
use crate::models::{label_fields, AllTimeSummary, DailySummary, RawReading};
use crate::scheduler::Window;
use crate::stats::{self, AggregateRecord, FieldAggregate, GroupKey, WindowRow};

// ---

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Key of the only row an all-time summary table may hold.
pub const ALL_TIME_ID: i64 = 1;

/// Reads raw windows and writes rollups for any metric in the catalog.
#[derive(Debug, Clone)]
pub struct RollupStore {
    pool: SqlitePool,
}

impl RollupStore {
    // ---
    pub fn new(pool: SqlitePool) -> Self {
        RollupStore { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Append one raw reading. This is the collector's write path; the rollup
    /// engine itself never writes raw rows.
    pub async fn insert_reading(&self, metric: &Metric, reading: &RawReading) -> Result<()> {
        // ---
        let expected = metric.fields.len();
        if let Some(field) = metric.fields.get(reading.values.len()) {
            return Err(RollupError::MissingField {
                metric: metric.name.clone(),
                field: field.clone(),
            });
        }
        if reading.values.len() > expected {
            return Err(RollupError::FieldCountMismatch {
                metric: metric.name.clone(),
                expected,
                found: reading.values.len(),
            });
        }

        let sql = format!(
            "INSERT INTO {} (timestamp, {}) VALUES (?, {})",
            metric.raw_table,
            metric.fields.join(", "),
            placeholders(expected)
        );

        let mut query = sqlx::query(&sql).bind(reading.timestamp);
        for value in &reading.values {
            query = query.bind(*value);
        }
        query
            .execute(&self.pool)
            .await
            .map_err(RollupError::write(&metric.raw_table))?;

        Ok(())
    }

    /// Delete every daily summary row of `metric` in its own transaction.
    pub async fn clear_daily(&self, metric: &Metric) -> Result<u64> {
        // ---
        self.delete_all(&metric.daily_table).await
    }

    /// Delete the all-time row of `metric`, if any.
    pub async fn clear_all_time(&self, metric: &Metric) -> Result<u64> {
        // ---
        self.delete_all(&metric.all_time_table).await
    }

    async fn delete_all(&self, table: &str) -> Result<u64> {
        // ---
        let mut tx = self.pool.begin().await.map_err(RollupError::write(table))?;
        let done = sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&mut *tx)
            .await
            .map_err(RollupError::write(table))?;
        tx.commit().await.map_err(RollupError::write(table))?;
        Ok(done.rows_affected())
    }

    /// First and last calendar date present in the raw table, or `None` when
    /// the table is empty.
    pub async fn date_span(&self, metric: &Metric) -> Result<Option<(NaiveDate, NaiveDate)>> {
        // ---
        let table = &metric.raw_table;
        let row = sqlx::query(&format!(
            "SELECT MIN(DATE(timestamp)), MAX(DATE(timestamp)) FROM {table}"
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(RollupError::read(table))?;

        let first: Option<String> = row.try_get(0).map_err(RollupError::read(table))?;
        let last: Option<String> = row.try_get(1).map_err(RollupError::read(table))?;

        match (first, last) {
            (Some(first), Some(last)) => Ok(Some((
                parse_date(table, &first)?,
                parse_date(table, &last)?,
            ))),
            _ => Ok(None),
        }
    }

    /// Load every raw row whose date falls inside `window`, in timestamp order.
    pub async fn load_window(&self, metric: &Metric, window: &Window) -> Result<Vec<WindowRow>> {
        // ---
        let table = &metric.raw_table;
        let rows = sqlx::query(&window_sql(metric))
            .bind(window.start.format(DATE_FORMAT).to_string())
            .bind(window.end.format(DATE_FORMAT).to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(RollupError::read(table))?;

        rows.iter()
            .map(|row| -> Result<WindowRow> {
                let day: String = row.try_get(0).map_err(RollupError::read(table))?;
                let values = (0..metric.fields.len())
                    .map(|i| row.try_get::<Option<f64>, _>(i + 1))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(RollupError::read(table))?;
                Ok(WindowRow {
                    day: parse_date(table, &day)?,
                    values,
                })
            })
            .collect()
    }

    /// Replace the daily rows of one window, committed as a single transaction.
    ///
    /// Nothing is written if any record fails validation or any statement
    /// fails; the transaction rolls back when dropped.
    pub async fn write_window(&self, metric: &Metric, records: &[AggregateRecord]) -> Result<usize> {
        // ---
        let table = &metric.daily_table;
        let sql = format!(
            "INSERT OR REPLACE INTO {table} (date, {}) VALUES (?, {})",
            metric.summary_columns().join(", "),
            placeholders(metric.fields.len() * 2)
        );

        let mut tx = self.pool.begin().await.map_err(RollupError::write(table))?;
        for record in records {
            check_shape(metric, record)?;
            let GroupKey::Day(date) = record.key else {
                return Err(RollupError::MalformedAggregate {
                    metric: metric.name.clone(),
                    reason: "all-time record passed to the daily writer".to_string(),
                });
            };

            let mut query = sqlx::query(&sql).bind(date.format(DATE_FORMAT).to_string());
            for value in summary_values(&record.fields) {
                query = query.bind(value);
            }
            query
                .execute(&mut *tx)
                .await
                .map_err(RollupError::write(table))?;
        }
        tx.commit().await.map_err(RollupError::write(table))?;

        Ok(records.len())
    }

    /// Replace the singleton all-time row.
    pub async fn upsert_all_time(&self, metric: &Metric, record: &AggregateRecord) -> Result<()> {
        // ---
        check_shape(metric, record)?;
        if record.key != GroupKey::AllTime {
            return Err(RollupError::MalformedAggregate {
                metric: metric.name.clone(),
                reason: "daily record passed to the all-time writer".to_string(),
            });
        }

        let table = &metric.all_time_table;
        let sql = format!(
            "INSERT OR REPLACE INTO {table} (id, {}) VALUES (?, {})",
            metric.summary_columns().join(", "),
            placeholders(metric.fields.len() * 2)
        );

        let mut tx = self.pool.begin().await.map_err(RollupError::write(table))?;
        let mut query = sqlx::query(&sql).bind(ALL_TIME_ID);
        for value in summary_values(&record.fields) {
            query = query.bind(value);
        }
        query
            .execute(&mut *tx)
            .await
            .map_err(RollupError::write(table))?;
        tx.commit().await.map_err(RollupError::write(table))?;

        Ok(())
    }

    /// Aggregate the whole raw table without loading it.
    ///
    /// Count and sum come from one aggregate query; each field's two central
    /// order statistics are then selected with `LIMIT`/`OFFSET`. All reads
    /// share one transaction so they see the same snapshot.
    pub async fn all_time_aggregate(&self, metric: &Metric) -> Result<Option<AggregateRecord>> {
        // ---
        let table = &metric.raw_table;
        let totals: Vec<String> = metric
            .fields
            .iter()
            .map(|f| format!("COUNT({f}), TOTAL(CAST({f} AS REAL))"))
            .collect();

        let mut tx = self.pool.begin().await.map_err(RollupError::read(table))?;

        let row = sqlx::query(&format!("SELECT COUNT(*), {} FROM {table}", totals.join(", ")))
            .fetch_one(&mut *tx)
            .await
            .map_err(RollupError::read(table))?;

        let rows: i64 = row.try_get(0).map_err(RollupError::read(table))?;
        if rows == 0 {
            return Ok(None);
        }

        let mut fields = Vec::with_capacity(metric.fields.len());
        for (i, field) in metric.fields.iter().enumerate() {
            let count: i64 = row.try_get(1 + 2 * i).map_err(RollupError::read(table))?;
            let sum: f64 = row.try_get(2 + 2 * i).map_err(RollupError::read(table))?;
            let count = count as usize;

            let Some((lo, hi)) = stats::median_ranks(count) else {
                fields.push(FieldAggregate::default());
                continue;
            };

            let central: Vec<f64> = sqlx::query_scalar(&format!(
                "SELECT CAST({field} AS REAL) FROM {table}
                 WHERE {field} IS NOT NULL
                 ORDER BY {field}, id
                 LIMIT ?1 OFFSET ?2"
            ))
            .bind((hi - lo + 1) as i64)
            .bind((lo - 1) as i64)
            .fetch_all(&mut *tx)
            .await
            .map_err(RollupError::read(table))?;

            let median = match (central.first(), central.last()) {
                (Some(a), Some(b)) => Some(stats::median_from_central(*a, *b)),
                _ => None,
            };
            fields.push(FieldAggregate {
                avg: stats::mean(count, sum),
                median,
            });
        }

        Ok(Some(AggregateRecord {
            key: GroupKey::AllTime,
            fields,
        }))
    }

    /// Daily summaries of `metric` in date order.
    pub async fn daily_summaries(&self, metric: &Metric) -> Result<Vec<DailySummary>> {
        // ---
        let table = &metric.daily_table;
        let rows = sqlx::query(&format!(
            "SELECT date, {} FROM {table} ORDER BY date",
            metric.summary_columns().join(", ")
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(RollupError::read(table))?;

        rows.iter()
            .map(|row| -> Result<DailySummary> {
                let date: String = row.try_get(0).map_err(RollupError::read(table))?;
                Ok(DailySummary {
                    date: parse_date(table, &date)?,
                    fields: label_fields(metric, &read_aggregates(metric, row, 1, table)?),
                })
            })
            .collect()
    }

    /// The all-time summary of `metric`, if one has been computed.
    pub async fn all_time_summary(&self, metric: &Metric) -> Result<Option<AllTimeSummary>> {
        // ---
        let table = &metric.all_time_table;
        let row = sqlx::query(&format!(
            "SELECT id, {} FROM {table}",
            metric.summary_columns().join(", ")
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(RollupError::read(table))?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(AllTimeSummary {
            id: row.try_get(0).map_err(RollupError::read(table))?,
            fields: label_fields(metric, &read_aggregates(metric, &row, 1, table)?),
        }))
    }
}

/// Reject records whose field count disagrees with the catalog.
fn check_shape(metric: &Metric, record: &AggregateRecord) -> Result<()> {
    // ---
    if record.fields.len() != metric.fields.len() {
        return Err(RollupError::MalformedAggregate {
            metric: metric.name.clone(),
            reason: format!(
                "{} fields produced, catalog declares {}",
                record.fields.len(),
                metric.fields.len()
            ),
        });
    }
    Ok(())
}

/// Averages first, then medians, matching [`Metric::summary_columns`].
fn summary_values(fields: &[FieldAggregate]) -> impl Iterator<Item = Option<f64>> + '_ {
    fields
        .iter()
        .map(|f| f.avg)
        .chain(fields.iter().map(|f| f.median))
}

fn read_aggregates(
    metric: &Metric,
    row: &SqliteRow,
    offset: usize,
    table: &str,
) -> Result<Vec<FieldAggregate>> {
    // ---
    let n = metric.fields.len();
    (0..n)
        .map(|i| -> Result<FieldAggregate> {
            Ok(FieldAggregate {
                avg: row.try_get(offset + i).map_err(RollupError::read(table))?,
                median: row.try_get(offset + n + i).map_err(RollupError::read(table))?,
            })
        })
        .collect()
}

/// One window's rows. The `DATE(timestamp)` filter is served by the day
/// index created in [`schema`](crate::schema).
pub(crate) fn window_sql(metric: &Metric) -> String {
    // ---
    format!(
        "SELECT DATE(timestamp) AS day, {} FROM {}
         WHERE DATE(timestamp) BETWEEN ?1 AND ?2
         ORDER BY timestamp, id",
        real_columns(metric),
        metric.raw_table
    )
}

fn real_columns(metric: &Metric) -> String {
    // ---
    metric
        .fields
        .iter()
        .map(|f| format!("CAST({f} AS REAL) AS {f}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn parse_date(table: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| RollupError::CorruptValue {
        table: table.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::catalog::Catalog;
    use crate::db;
    use crate::schema;
    use crate::stats::{summarize, Grouping};

    async fn create_test_store(metric: &Metric) -> RollupStore {
        // ---
        let pool = db::connect_in_memory().await.unwrap();
        let catalog = Catalog::new(vec![metric.clone()]).unwrap();
        schema::provision(&pool, &catalog).await.unwrap();
        RollupStore::new(pool)
    }

    async fn insert(store: &RollupStore, metric: &Metric, ts: &str, values: &[f64]) {
        // ---
        let reading = RawReading {
            timestamp: chrono::NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S").unwrap(),
            values: values.to_vec(),
        };
        store.insert_reading(metric, &reading).await.unwrap();
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[tokio::test]
    async fn test_date_span_empty_and_populated() {
        // ---
        let metric = Metric::new("sgp40", &["voc_gas"]);
        let store = create_test_store(&metric).await;
        assert_eq!(store.date_span(&metric).await.unwrap(), None);

        insert(&store, &metric, "2024-05-03 23:59:59", &[1.0]).await;
        insert(&store, &metric, "2024-05-01 00:00:00", &[2.0]).await;

        let span = store.date_span(&metric).await.unwrap();
        assert_eq!(span, Some((date("2024-05-01"), date("2024-05-03"))));
    }

    #[tokio::test]
    async fn test_load_window_bounds_are_inclusive() {
        // ---
        let metric = Metric::new("sgp40", &["voc_gas"]);
        let store = create_test_store(&metric).await;
        insert(&store, &metric, "2024-05-01 12:00:00", &[1.0]).await;
        insert(&store, &metric, "2024-05-02 00:00:00", &[2.0]).await;
        insert(&store, &metric, "2024-05-03 23:59:59", &[3.0]).await;
        insert(&store, &metric, "2024-05-04 00:00:00", &[4.0]).await;

        let window = Window {
            index: 0,
            start: date("2024-05-02"),
            end: date("2024-05-03"),
        };
        let rows = store.load_window(&metric, &window).await.unwrap();
        let values: Vec<Option<f64>> = rows.iter().map(|r| r.values[0]).collect();
        assert_eq!(values, vec![Some(2.0), Some(3.0)]);
        assert_eq!(rows[1].day, date("2024-05-03"));
    }

    #[tokio::test]
    async fn test_window_query_searches_day_index() {
        // ---
        let metric = Metric::new("sgp40", &["voc_gas"]);
        let store = create_test_store(&metric).await;

        let plan = sqlx::query(&format!("EXPLAIN QUERY PLAN {}", window_sql(&metric)))
            .bind("2024-05-01")
            .bind("2024-05-07")
            .fetch_all(store.pool())
            .await
            .unwrap();
        let details: Vec<String> = plan.iter().map(|row| row.get::<String, _>(3)).collect();

        let index = schema::day_index(&metric);
        assert!(
            details
                .iter()
                .any(|d| d.starts_with("SEARCH") && d.contains(&index)),
            "window query does not use {index}: {details:?}"
        );
        assert!(
            !details.iter().any(|d| d.starts_with("SCAN sgp40_data")),
            "window query scans the raw table: {details:?}"
        );
    }

    #[tokio::test]
    async fn test_insert_reading_rejects_wrong_value_count() {
        // ---
        let metric = Metric::new("bme280", &["temperature", "humidity"]);
        let store = create_test_store(&metric).await;
        let reading = |values: &[f64]| RawReading {
            timestamp: chrono::NaiveDateTime::parse_from_str("2024-05-01 08:00:00", "%Y-%m-%d %H:%M:%S")
                .unwrap(),
            values: values.to_vec(),
        };

        match store.insert_reading(&metric, &reading(&[21.0, 40.0, 7.0])).await {
            Err(RollupError::FieldCountMismatch {
                expected, found, ..
            }) => assert_eq!((expected, found), (2, 3)),
            other => panic!("expected FieldCountMismatch, got {other:?}"),
        }
        match store.insert_reading(&metric, &reading(&[21.0])).await {
            Err(RollupError::MissingField { field, .. }) => assert_eq!(field, "humidity"),
            other => panic!("expected MissingField, got {other:?}"),
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bme280_data")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_write_window_replaces_by_date() {
        // ---
        let metric = Metric::new("tsl2591", &["light_intensity"]);
        let store = create_test_store(&metric).await;

        let record = |avg: f64| AggregateRecord {
            key: GroupKey::Day(date("2024-01-01")),
            fields: vec![FieldAggregate {
                avg: Some(avg),
                median: Some(avg),
            }],
        };

        store.write_window(&metric, &[record(1.0)]).await.unwrap();
        store.write_window(&metric, &[record(2.0)]).await.unwrap();

        let rows = store.daily_summaries(&metric).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fields[0].avg, Some(2.0));
        assert_eq!(rows[0].fields[0].field, "light_intensity");
    }

    #[tokio::test]
    async fn test_malformed_record_rolls_back_window() {
        // ---
        let metric = Metric::new("bme280", &["temperature", "humidity"]);
        let store = create_test_store(&metric).await;

        let good = AggregateRecord {
            key: GroupKey::Day(date("2024-01-01")),
            fields: vec![FieldAggregate::default(); 2],
        };
        let bad = AggregateRecord {
            key: GroupKey::Day(date("2024-01-02")),
            fields: vec![FieldAggregate::default()],
        };

        let err = store.write_window(&metric, &[good, bad]).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(store.daily_summaries(&metric).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_all_time_matches_in_memory_engine() {
        // ---
        let metric = Metric::new("bme280", &["temperature", "humidity"]);
        let store = create_test_store(&metric).await;

        let samples = [
            ("2024-01-01 01:00:00", [21.5, 40.0]),
            ("2024-01-01 02:00:00", [19.0, 55.0]),
            ("2024-01-02 01:00:00", [23.25, 41.0]),
            ("2024-01-03 01:00:00", [19.0, 60.5]),
            ("2024-01-04 01:00:00", [25.0, 38.0]),
            ("2024-01-04 02:00:00", [22.0, 47.0]),
        ];
        let mut rows = Vec::new();
        for (ts, values) in samples {
            insert(&store, &metric, ts, &values).await;
            rows.push(WindowRow {
                day: date(&ts[..10]),
                values: values.iter().copied().map(Some).collect(),
            });
        }

        let from_sql = store.all_time_aggregate(&metric).await.unwrap().unwrap();
        let in_memory = summarize(&rows, 2, Grouping::AllTime).remove(0);
        assert_eq!(from_sql, in_memory);
        assert_eq!(from_sql.fields[0].median, Some(21.75));
        assert_eq!(from_sql.fields[1].median, Some(44.0));
    }

    #[tokio::test]
    async fn test_all_time_upsert_keeps_singleton() {
        // ---
        let metric = Metric::new("ltr390", &["uv_index"]);
        let store = create_test_store(&metric).await;
        assert_eq!(store.all_time_aggregate(&metric).await.unwrap(), None);

        for uv in [3.0, 5.0, 8.0] {
            let record = AggregateRecord {
                key: GroupKey::AllTime,
                fields: vec![FieldAggregate {
                    avg: Some(uv),
                    median: Some(uv),
                }],
            };
            store.upsert_all_time(&metric, &record).await.unwrap();
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ltr390_all_time_summary")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);

        let summary = store.all_time_summary(&metric).await.unwrap().unwrap();
        assert_eq!(summary.id, ALL_TIME_ID);
        assert_eq!(summary.fields[0].avg, Some(8.0));
    }
}
