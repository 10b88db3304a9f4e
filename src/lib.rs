//! Precomputed daily and all-time rollups for multi-sensor telemetry.
//!
//! Raw readings land in one SQLite table per sensor type. The rollup engine
//! recomputes, per metric, a daily summary row (average and exact median of
//! every field) and a single all-time row, in fixed-size day windows so memory
//! stays bounded however long the history gets.
//!
//! Module layout follows the Explicit Module Boundary Pattern (EMBP): each
//! module owns its internals and this file is the gateway that re-exports
//! what the binary, the routes and the tests use.

mod catalog;
mod config;
mod error;
mod models;
mod recompute;
mod scheduler;
mod stats;
mod store;

pub mod db;
pub mod routes;
pub mod schema;

pub use catalog::{Catalog, Metric};
pub use config::{load_from_env, Config};
pub use error::{Result, RollupError};
pub use models::{AllTimeSummary, DailySummary, FieldSummary, NewReading, RawReading};
pub use recompute::{
    MetricReport, MetricStatus, ProgressFn, Recomputer, RunReport, Stage, StopHandle,
};
pub use scheduler::{Window, WindowPlan, DEFAULT_WINDOW_DAYS};
pub use stats::{
    median_ranks, summarize, AggregateRecord, FieldAggregate, GroupKey, Grouping, WindowRow,
};
pub use store::{RollupStore, ALL_TIME_ID};
