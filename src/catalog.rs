//! Static description of every sensor type the station records.
//!
//! A [`Metric`] names its numeric fields and the three tables backing it.
//! Nothing else in the crate encodes field names, so adding a sensor type
//! means adding one entry to [`Catalog::builtin`].

use std::collections::HashSet;

use serde::Serialize;

use crate::error::{Result, RollupError};

// ---

/// One sensor type and the tables that hold its raw and summarized data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metric {
    // ---
    pub name: String,
    pub fields: Vec<String>,
    #[serde(skip)]
    pub raw_table: String,
    #[serde(skip)]
    pub daily_table: String,
    #[serde(skip)]
    pub all_time_table: String,
}

impl Metric {
    // ---
    /// Build a metric using the `<name>_data`, `<name>_daily_summary` and
    /// `<name>_all_time_summary` table naming convention.
    pub fn new(name: &str, fields: &[&str]) -> Self {
        // ---
        Metric {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            raw_table: format!("{name}_data"),
            daily_table: format!("{name}_daily_summary"),
            all_time_table: format!("{name}_all_time_summary"),
        }
    }

    /// Summary column names in storage order: every `avg_<field>` followed by
    /// every `median_<field>`.
    pub fn summary_columns(&self) -> Vec<String> {
        // ---
        self.fields
            .iter()
            .map(|f| format!("avg_{f}"))
            .chain(self.fields.iter().map(|f| format!("median_{f}")))
            .collect()
    }
}

/// Immutable set of metrics handed to the orchestrator at construction.
#[derive(Debug, Clone)]
pub struct Catalog {
    metrics: Vec<Metric>,
}

impl Catalog {
    // ---
    /// Validate and wrap a list of metrics.
    ///
    /// Table and field names end up interpolated into SQL, so each one must be
    /// a plain identifier.
    pub fn new(metrics: Vec<Metric>) -> Result<Self> {
        // ---
        let mut names = HashSet::new();
        for metric in &metrics {
            if !names.insert(metric.name.as_str()) {
                return Err(RollupError::InvalidCatalog(format!(
                    "duplicate metric '{}'",
                    metric.name
                )));
            }
            if metric.fields.is_empty() {
                return Err(RollupError::InvalidCatalog(format!(
                    "metric '{}' declares no fields",
                    metric.name
                )));
            }

            let mut fields = HashSet::new();
            for field in &metric.fields {
                if !fields.insert(field.as_str()) {
                    return Err(RollupError::InvalidCatalog(format!(
                        "metric '{}' declares field '{}' twice",
                        metric.name, field
                    )));
                }
            }

            let tables = [&metric.raw_table, &metric.daily_table, &metric.all_time_table];
            for ident in tables.into_iter().chain(metric.fields.iter()) {
                if !is_identifier(ident) {
                    return Err(RollupError::InvalidCatalog(format!(
                        "'{}' in metric '{}' is not a plain SQL identifier",
                        ident, metric.name
                    )));
                }
            }
        }

        Ok(Catalog { metrics })
    }

    /// The five sensors wired to the station.
    pub fn builtin() -> Self {
        // ---
        Catalog {
            metrics: vec![
                Metric::new("bme280", &["temperature", "humidity", "pressure"]),
                Metric::new("tsl2591", &["light_intensity"]),
                Metric::new("ltr390", &["uv_index"]),
                Metric::new("sgp40", &["voc_gas"]),
                Metric::new(
                    "motion",
                    &[
                        "roll",
                        "pitch",
                        "yaw",
                        "acceleration_x",
                        "acceleration_y",
                        "acceleration_z",
                        "gyroscope_x",
                        "gyroscope_y",
                        "gyroscope_z",
                        "magnetic_x",
                        "magnetic_y",
                        "magnetic_z",
                    ],
                ),
            ],
        }
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn get(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name == name)
    }
}

fn is_identifier(s: &str) -> bool {
    // ---
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_builtin_catalog_is_valid() {
        // ---
        let builtin = Catalog::builtin();
        let revalidated = Catalog::new(builtin.metrics().to_vec());
        assert!(revalidated.is_ok());
        assert_eq!(builtin.metrics().len(), 5);
        assert_eq!(builtin.get("motion").map(|m| m.fields.len()), Some(12));
    }

    #[test]
    fn test_table_naming() {
        // ---
        let m = Metric::new("bme280", &["temperature"]);
        assert_eq!(m.raw_table, "bme280_data");
        assert_eq!(m.daily_table, "bme280_daily_summary");
        assert_eq!(m.all_time_table, "bme280_all_time_summary");
    }

    #[test]
    fn test_summary_column_order() {
        // ---
        let m = Metric::new("bme280", &["temperature", "humidity"]);
        assert_eq!(
            m.summary_columns(),
            vec![
                "avg_temperature",
                "avg_humidity",
                "median_temperature",
                "median_humidity"
            ]
        );
    }

    #[test]
    fn test_rejects_duplicates_and_bad_identifiers() {
        // ---
        let dup_metric = Catalog::new(vec![Metric::new("a", &["x"]), Metric::new("a", &["y"])]);
        assert!(matches!(dup_metric, Err(RollupError::InvalidCatalog(_))));

        let dup_field = Catalog::new(vec![Metric::new("a", &["x", "x"])]);
        assert!(matches!(dup_field, Err(RollupError::InvalidCatalog(_))));

        let no_fields = Catalog::new(vec![Metric::new("a", &[])]);
        assert!(matches!(no_fields, Err(RollupError::InvalidCatalog(_))));

        let injected = Catalog::new(vec![Metric::new("a", &["x; DROP TABLE a_data"])]);
        assert!(matches!(injected, Err(RollupError::InvalidCatalog(_))));

        let leading_digit = Catalog::new(vec![Metric::new("1a", &["x"])]);
        assert!(matches!(leading_digit, Err(RollupError::InvalidCatalog(_))));
    }
}
