//! Application entry point for the `sensorflow-rollup` service.
//!
//! This binary orchestrates the full startup sequence, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Opening the SQLite database and creating the schema if it does not exist
//! - Optionally running one full summary recomputation
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Serving requests until Ctrl-C, which also stops any running recomputation
//!   after its current window commits
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – SQLite connection string
//! - `DB_POOL_MAX` (optional) – maximum number of DB connections (default: 4)
//! - `ROLLUP_BATCH_DAYS` (optional) – days per recomputation window (default: 7)
//! - `BIND_ADDR` (optional) – listen address (default: `0.0.0.0:8080`)
//! - `RECOMPUTE_ON_START` (optional) – recompute once before serving
//! - `AXUM_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `AXUM_SPAN_EVENTS` (optional) – span event mode for tracing
use std::{env, io::IsTerminal, sync::Arc};

use anyhow::{anyhow, Result};
use axum::Router;
use dotenvy::dotenv;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use sensorflow_rollup::{db, routes, schema, Catalog, MetricStatus, Recomputer, RollupStore};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = sensorflow_rollup::load_from_env()?;
    cfg.log_config();

    tracing::info!("Opening database: {}", cfg.db_url);

    let pool = db::connect(&cfg.db_url, cfg.db_pool_max)
        .await
        .map_err(|e| anyhow!("Failed to open database '{}': {}", cfg.db_url, e))?;

    let catalog = Arc::new(Catalog::builtin());
    schema::provision(&pool, &catalog).await?;

    let recomputer = Arc::new(Recomputer::new(
        RollupStore::new(pool),
        catalog,
        cfg.batch_days,
    ));

    if cfg.recompute_on_start {
        let report = recomputer.recompute_all().await?;
        for m in &report.metrics {
            match &m.status {
                MetricStatus::Failed { stage, error } => {
                    tracing::error!("{}: failed during {:?}: {}", m.metric, stage, error)
                }
                status => tracing::info!(
                    "{}: {:?}, {}/{} windows, {} daily rows",
                    m.metric,
                    status,
                    m.windows_completed,
                    m.windows_total,
                    m.daily_rows
                ),
            }
        }
    }

    let stop = recomputer.stop_handle();

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(recomputer);

    tracing::info!("Listening on {}", cfg.bind_addr);

    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown requested");
            stop.request();
        })
        .await?;

    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `AXUM_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `AXUM_LOG_LEVEL` env var
///
/// Call once at startup, before any logging macros run.
fn init_tracing() {
    // ---
    let span_events = match env::var("AXUM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to AXUM_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("AXUM_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
