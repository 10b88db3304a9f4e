//! HTTP gateway for the rollup service.
//!
//! Each sibling module exports a subrouter over the shared [`AppState`]; this
//! gateway merges them so `main.rs` only sees [`router`].

use std::sync::Arc;

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json, Router};
use serde::Serialize;

use crate::{Recomputer, RollupError};

mod health;
mod readings;
mod summaries;

// ---

/// State shared by every handler. The recomputer owns the store and catalog.
pub type AppState = Arc<Recomputer>;

pub fn router(recomputer: AppState) -> Router {
    // ---
    Router::new()
        .merge(summaries::router())
        .merge(readings::router())
        .merge(health::router())
        .with_state(recomputer)
}

/// JSON body of every error response.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for RollupError {
    fn into_response(self) -> Response {
        // ---
        let status = match &self {
            RollupError::UnknownMetric(_) => StatusCode::NOT_FOUND,
            RollupError::MissingField { .. } | RollupError::FieldCountMismatch { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            RollupError::RunInProgress => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
