//! Full recomputation of every metric's daily and all-time rollups.
//!
//! Metrics are processed one after another, each through
//! `Clearing → RangeDiscovery → BatchProcessing → AllTime`. A storage failure
//! stops only the metric it happened on: its in-flight window is rolled back,
//! the failure is logged and reported, and the run moves on. A malformed
//! aggregate means the catalog and the engine disagree, and aborts the run.
//!
//! Clearing before repopulating means a failed metric can be left with some
//! dates cleared and not yet rewritten until the next successful run.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::catalog::{Catalog, Metric};
use crate::error::{Result, RollupError};
use crate::scheduler::WindowPlan;
use crate::stats::{self, Grouping};
use crate::store::RollupStore;

// ---

/// Stage a metric was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Clearing,
    RangeDiscovery,
    BatchProcessing,
    AllTime,
}

/// Final state of one metric within a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MetricStatus {
    Done,
    /// No raw rows; nothing to summarize.
    Skipped,
    Failed { stage: Stage, error: String },
    /// Stop was requested before this metric finished.
    Cancelled,
}

/// Outcome and progress counters for one metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricReport {
    // ---
    pub metric: String,
    #[serde(flatten)]
    pub status: MetricStatus,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub windows_total: usize,
    pub windows_completed: usize,
    pub daily_rows: usize,
}

impl MetricReport {
    fn new(metric: &Metric, status: MetricStatus) -> Self {
        MetricReport {
            metric: metric.name.clone(),
            status,
            first_date: None,
            last_date: None,
            windows_total: 0,
            windows_completed: 0,
            daily_rows: 0,
        }
    }
}

/// Per-metric results of one `recompute_all` run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    // ---
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub window_days: u32,
    pub metrics: Vec<MetricReport>,
}

impl RunReport {
    pub fn status_of(&self, metric: &str) -> Option<&MetricStatus> {
        self.metrics
            .iter()
            .find(|m| m.metric == metric)
            .map(|m| &m.status)
    }
}

/// Shared stop flag for a [`Recomputer`].
///
/// Stopping is sticky: once requested, every later run reports all of its
/// metrics as cancelled. It exists for shutdown, not for pausing.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    // ---
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Callback run after each committed window: metric name, windows completed,
/// windows total.
pub type ProgressFn = dyn Fn(&str, usize, usize) + Send + Sync;

/// Drives recomputation for every metric of a catalog.
///
/// Only one run may be active at a time; a concurrent call fails with
/// [`RollupError::RunInProgress`] instead of waiting.
pub struct Recomputer {
    store: RollupStore,
    catalog: Arc<Catalog>,
    window_days: u32,
    stop: StopHandle,
    progress: Option<Box<ProgressFn>>,
    running: Mutex<()>,
}

impl fmt::Debug for Recomputer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recomputer")
            .field("catalog", &self.catalog)
            .field("window_days", &self.window_days)
            .field("stop", &self.stop)
            .finish_non_exhaustive()
    }
}

impl Recomputer {
    // ---
    pub fn new(store: RollupStore, catalog: Arc<Catalog>, window_days: u32) -> Self {
        Recomputer {
            store,
            catalog,
            window_days: window_days.max(1),
            stop: StopHandle::default(),
            progress: None,
            running: Mutex::new(()),
        }
    }

    /// Report window progress to `progress` as well as the log.
    pub fn with_progress(
        mut self,
        progress: impl Fn(&str, usize, usize) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn store(&self) -> &RollupStore {
        &self.store
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn window_days(&self) -> u32 {
        self.window_days
    }

    /// Ask the current and every later run to stop.
    ///
    /// The window being written still commits; the run stops before the next
    /// window or metric and reports the rest as cancelled. The flag is never
    /// cleared, see [`StopHandle`].
    pub fn request_stop(&self) {
        self.stop.request();
    }

    /// A handle that can request a stop without holding the recomputer.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    fn stop_requested(&self) -> bool {
        self.stop.is_requested()
    }

    /// Recompute every metric with the configured window size.
    pub async fn recompute_all(&self) -> Result<RunReport> {
        self.recompute_all_with(self.window_days).await
    }

    /// Recompute every metric using `window_days`-day windows for this run.
    pub async fn recompute_all_with(&self, window_days: u32) -> Result<RunReport> {
        // ---
        let _running = self.running.try_lock().map_err(|_| RollupError::RunInProgress)?;

        let run_id = Uuid::new_v4();
        let window_days = window_days.max(1);
        let span = info_span!("recompute", %run_id);

        async move {
            let started_at = Utc::now();
            info!(
                metrics = self.catalog.metrics().len(),
                window_days, "Starting recomputation of summaries"
            );

            let mut reports = Vec::with_capacity(self.catalog.metrics().len());
            for metric in self.catalog.metrics() {
                if self.stop_requested() {
                    warn!(metric = %metric.name, "Stop requested, not started");
                    reports.push(MetricReport::new(metric, MetricStatus::Cancelled));
                    continue;
                }

                let mut report = MetricReport::new(metric, MetricStatus::Done);
                match self.recompute_metric(metric, window_days, &mut report).await {
                    Ok(status) => report.status = status,
                    Err((stage, e)) if e.is_fatal() => {
                        error!(metric = %metric.name, ?stage, "Aborting run: {}", e);
                        return Err(e);
                    }
                    Err((stage, e)) => {
                        error!(metric = %metric.name, ?stage, "Recomputation failed: {}", e);
                        report.status = MetricStatus::Failed {
                            stage,
                            error: e.to_string(),
                        };
                    }
                }
                reports.push(report);
            }

            let report = RunReport {
                run_id,
                started_at,
                finished_at: Utc::now(),
                window_days,
                metrics: reports,
            };
            info!(
                failed = report
                    .metrics
                    .iter()
                    .filter(|m| matches!(m.status, MetricStatus::Failed { .. }))
                    .count(),
                "Recomputation finished"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn recompute_metric(
        &self,
        metric: &Metric,
        window_days: u32,
        report: &mut MetricReport,
    ) -> std::result::Result<MetricStatus, (Stage, RollupError)> {
        // ---
        let at = |stage: Stage| move |e: RollupError| (stage, e);

        info!(metric = %metric.name, table = %metric.daily_table, "Clearing daily summaries");
        self.store
            .clear_daily(metric)
            .await
            .map_err(at(Stage::Clearing))?;

        let span = self
            .store
            .date_span(metric)
            .await
            .map_err(at(Stage::RangeDiscovery))?;
        let Some((first, last)) = span else {
            warn!(metric = %metric.name, "No data found, skipping");
            // No raw history means no all-time row either.
            self.store
                .clear_all_time(metric)
                .await
                .map_err(at(Stage::RangeDiscovery))?;
            return Ok(MetricStatus::Skipped);
        };
        report.first_date = Some(first);
        report.last_date = Some(last);

        let plan = WindowPlan::new(first, last, window_days);
        report.windows_total = plan.total();
        info!(
            metric = %metric.name,
            %first,
            %last,
            windows = report.windows_total,
            "Processing daily summaries"
        );

        for window in plan.windows() {
            if self.stop_requested() {
                warn!(metric = %metric.name, completed = report.windows_completed, "Stop requested");
                return Ok(MetricStatus::Cancelled);
            }

            let rows = self
                .store
                .load_window(metric, &window)
                .await
                .map_err(at(Stage::BatchProcessing))?;
            let records = stats::summarize(&rows, metric.fields.len(), Grouping::Daily);
            report.daily_rows += self
                .store
                .write_window(metric, &records)
                .await
                .map_err(at(Stage::BatchProcessing))?;
            report.windows_completed += 1;
            if let Some(progress) = &self.progress {
                progress(&metric.name, report.windows_completed, report.windows_total);
            }

            debug!(
                metric = %metric.name,
                "window {}/{} ({}..={}): {} rows, {} days",
                window.index + 1,
                report.windows_total,
                window.start,
                window.end,
                rows.len(),
                records.len()
            );
        }

        if self.stop_requested() {
            return Ok(MetricStatus::Cancelled);
        }

        info!(metric = %metric.name, "Processing all-time summary");
        match self
            .store
            .all_time_aggregate(metric)
            .await
            .map_err(at(Stage::AllTime))?
        {
            Some(record) => self
                .store
                .upsert_all_time(metric, &record)
                .await
                .map_err(at(Stage::AllTime))?,
            None => {
                self.store
                    .clear_all_time(metric)
                    .await
                    .map_err(at(Stage::AllTime))?;
            }
        }

        Ok(MetricStatus::Done)
    }
}
