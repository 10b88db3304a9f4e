//! Data models for raw readings and the summaries derived from them.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::Metric;
use crate::error::{Result, RollupError};
use crate::stats::FieldAggregate;

// ---

/// Raw reading as submitted by the sensor collector.
#[derive(Debug, Deserialize)]
pub struct NewReading {
    // ---
    /// Acquisition time; defaults to now when omitted.
    pub timestamp: Option<NaiveDateTime>,
    pub values: HashMap<String, f64>,
}

/// Reading checked against its metric, values in catalog field order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    // ---
    pub timestamp: NaiveDateTime,
    pub values: Vec<f64>,
}

impl NewReading {
    // ---
    /// Order values by the metric's fields. Every declared field is required;
    /// extra keys are ignored.
    pub fn to_reading(&self, metric: &Metric) -> Result<RawReading> {
        // ---
        let values = metric
            .fields
            .iter()
            .map(|field| {
                self.values
                    .get(field)
                    .copied()
                    .ok_or_else(|| RollupError::MissingField {
                        metric: metric.name.clone(),
                        field: field.clone(),
                    })
            })
            .collect::<Result<Vec<f64>>>()?;

        Ok(RawReading {
            timestamp: self.timestamp.unwrap_or_else(|| Utc::now().naive_utc()),
            values,
        })
    }
}

/// Average and median of one named field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSummary {
    pub field: String,
    pub avg: Option<f64>,
    pub median: Option<f64>,
}

/// One row of a metric's daily summary table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub fields: Vec<FieldSummary>,
}

/// The singleton row of a metric's all-time summary table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllTimeSummary {
    pub id: i64,
    pub fields: Vec<FieldSummary>,
}

/// Pair stored aggregates back up with their field names.
pub(crate) fn label_fields(metric: &Metric, aggregates: &[FieldAggregate]) -> Vec<FieldSummary> {
    // ---
    metric
        .fields
        .iter()
        .zip(aggregates)
        .map(|(field, agg)| FieldSummary {
            field: field.clone(),
            avg: agg.avg,
            median: agg.median,
        })
        .collect()
}
