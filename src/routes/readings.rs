//! Raw reading ingestion, the sensor collector's write path.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use tracing::debug;

use super::AppState;
use crate::{NewReading, RollupError};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/readings/{metric}", post(handler))
}

/// Handle `POST /readings/{metric}`.
async fn handler(
    State(recomputer): State<AppState>,
    Path(metric): Path<String>,
    Json(input): Json<NewReading>,
) -> Result<StatusCode, RollupError> {
    // ---
    let metric = recomputer
        .catalog()
        .get(&metric)
        .ok_or(RollupError::UnknownMetric(metric))?;

    let reading = input.to_reading(metric)?;
    recomputer.store().insert_reading(metric, &reading).await?;

    debug!(metric = %metric.name, timestamp = %reading.timestamp, "Stored reading");
    Ok(StatusCode::CREATED)
}
