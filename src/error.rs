//! Error type for the rollup engine.
//!
//! Storage failures carry the table they happened on so the orchestrator can
//! report them per metric. Only [`RollupError::MalformedAggregate`] is fatal
//! to a whole run; everything else is contained to the metric it hit.

use thiserror::Error;

/// Errors raised by the catalog, the store and the orchestrator.
#[derive(Debug, Error)]
pub enum RollupError {
    // ---
    #[error("failed to read from {table}: {source}")]
    StorageRead {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to write to {table}: {source}")]
    StorageWrite {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("malformed aggregate for {metric}: {reason}")]
    MalformedAggregate { metric: String, reason: String },

    #[error("unparseable value {value:?} read from {table}")]
    CorruptValue { table: String, value: String },

    #[error("invalid metric catalog: {0}")]
    InvalidCatalog(String),

    #[error("unknown metric '{0}'")]
    UnknownMetric(String),

    #[error("reading for {metric} is missing field '{field}'")]
    MissingField { metric: String, field: String },

    #[error("reading for {metric} has {found} values, catalog declares {expected}")]
    FieldCountMismatch {
        metric: String,
        expected: usize,
        found: usize,
    },

    #[error("a recomputation is already running")]
    RunInProgress,
}

pub type Result<T, E = RollupError> = std::result::Result<T, E>;

impl RollupError {
    // ---
    pub(crate) fn read(table: &str) -> impl FnOnce(sqlx::Error) -> Self + '_ {
        move |source| RollupError::StorageRead {
            table: table.to_string(),
            source,
        }
    }

    pub(crate) fn write(table: &str) -> impl FnOnce(sqlx::Error) -> Self + '_ {
        move |source| RollupError::StorageWrite {
            table: table.to_string(),
            source,
        }
    }

    /// A catalog/engine desynchronization. Aborts the run instead of moving
    /// on to the next metric.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RollupError::MalformedAggregate { .. })
    }
}
