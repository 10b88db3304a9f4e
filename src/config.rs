//! Configuration loader for the `sensorflow-rollup` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller), so `env::var` calls are not scattered through
//! the codebase.
//!
use std::env;
use std::net::SocketAddr;

use anyhow::{anyhow, bail, Result};

use crate::scheduler::DEFAULT_WINDOW_DAYS;

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// SQLite connection string, e.g. `sqlite://sensor_data.db`.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Days per recomputation window.
    pub batch_days: u32,

    /// Address the HTTP API binds to.
    pub bind_addr: SocketAddr,

    /// Run one full recomputation before serving requests.
    pub recompute_on_start: bool,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – SQLite connection string
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 4)
/// - `ROLLUP_BATCH_DAYS` – days per recomputation window (default: 7)
/// - `BIND_ADDR` – listen address (default: `0.0.0.0:8080`)
/// - `RECOMPUTE_ON_START` – `1|true|yes` to recompute at startup (default: off)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 4);
    let batch_days = parse_env_u32!("ROLLUP_BATCH_DAYS", DEFAULT_WINDOW_DAYS);

    if batch_days == 0 {
        bail!("Invalid ROLLUP_BATCH_DAYS: must be at least 1");
    }

    let bind_addr = env::var("BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse::<SocketAddr>()
        .map_err(|e| anyhow!("Invalid BIND_ADDR: {}", e))?;

    let recompute_on_start = parse_flag(env::var("RECOMPUTE_ON_START").ok().as_deref())
        .map_err(|v| anyhow!("Invalid RECOMPUTE_ON_START: {:?}", v))?;

    Ok(Config {
        db_url,
        db_pool_max,
        batch_days,
        bind_addr,
        recompute_on_start,
    })
}

fn parse_flag(value: Option<&str>) -> Result<bool, String> {
    // ---
    match value {
        None | Some("") => Ok(false),
        Some("1") | Some("true") | Some("yes") => Ok(true),
        Some("0") | Some("false") | Some("no") => Ok(false),
        Some(other) => Err(other.to_string()),
    }
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL       : {}", self.db_url);
        tracing::info!("  DB_POOL_MAX        : {}", self.db_pool_max);
        tracing::info!("  ROLLUP_BATCH_DAYS  : {}", self.batch_days);
        tracing::info!("  BIND_ADDR          : {}", self.bind_addr);
        tracing::info!("  RECOMPUTE_ON_START : {}", self.recompute_on_start);
    }
}
