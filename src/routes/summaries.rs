//! Recomputation trigger and summary listing endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::{error, info};

use super::{AppState, ErrorBody};
use crate::{Metric, RollupError};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/metrics", get(list_metrics))
        .route("/summaries/recompute", post(recompute))
        .route("/summaries/{metric}/daily", get(daily))
        .route("/summaries/{metric}/all-time", get(all_time))
}

/// Query parameters for `POST /summaries/recompute`.
#[derive(Debug, Deserialize)]
pub struct RecomputeQuery {
    /// Overrides the configured window size for this run only.
    batch_days: Option<u32>,
}

async fn list_metrics(State(recomputer): State<AppState>) -> Json<Vec<Metric>> {
    Json(recomputer.catalog().metrics().to_vec())
}

/// Handle `POST /summaries/recompute`. Blocks until the run finishes.
///
/// The run is spawned so that a client hanging up does not drop it halfway
/// through a metric; it only ever stops at a window boundary.
async fn recompute(
    State(recomputer): State<AppState>,
    Query(params): Query<RecomputeQuery>,
) -> Response {
    // ---
    let days = match params.batch_days {
        Some(0) => {
            let body = ErrorBody {
                error: "batch_days must be at least 1".to_string(),
            };
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
        Some(days) => days,
        None => recomputer.window_days(),
    };

    info!("POST /summaries/recompute - window of {} days", days);
    let run = tokio::spawn(async move { recomputer.recompute_all_with(days).await });

    match run.await {
        Ok(Ok(report)) => (StatusCode::OK, Json(report)).into_response(),
        Ok(Err(e)) => e.into_response(),
        Err(e) => {
            error!("Recompute task failed: {}", e);
            let body = ErrorBody {
                error: format!("recompute task failed: {e}"),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

async fn daily(
    State(recomputer): State<AppState>,
    Path(metric): Path<String>,
) -> Result<Response, RollupError> {
    // ---
    let metric = lookup(&recomputer, metric)?;
    let rows = recomputer.store().daily_summaries(metric).await?;
    Ok(Json(rows).into_response())
}

async fn all_time(
    State(recomputer): State<AppState>,
    Path(metric): Path<String>,
) -> Result<Response, RollupError> {
    // ---
    let metric = lookup(&recomputer, metric)?;
    match recomputer.store().all_time_summary(metric).await? {
        Some(row) => Ok(Json(row).into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

fn lookup(recomputer: &AppState, name: String) -> Result<&Metric, RollupError> {
    // ---
    recomputer
        .catalog()
        .get(&name)
        .ok_or(RollupError::UnknownMetric(name))
}
