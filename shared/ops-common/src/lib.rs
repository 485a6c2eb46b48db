//! Shared runtime plumbing for the EC2 ops binaries.
//!
//! Provides tracing setup, environment-variable configuration helpers, report
//! printing and time formatting used by every app under `apps/`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt as tfmt, prelude::*, EnvFilter, Layer};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Configuration error for {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Source of configuration values. Production code reads the process
/// environment; tests pass a closure over a map.
pub trait Env {
    fn get(&self, key: &str) -> Option<String>;
}

/// The real process environment.
pub struct ProcessEnv;

impl Env for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl<F: Fn(&str) -> Option<String>> Env for F {
    fn get(&self, key: &str) -> Option<String> {
        self(key)
    }
}

/// Required, non-empty variable.
pub fn require_env(env: &dyn Env, field: &'static str) -> Result<String, ConfigError> {
    match env.get(field) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ConfigError {
            field,
            message: "Required but not set".into(),
        }),
    }
}

/// Optional variable with a default.
pub fn env_or(env: &dyn Env, field: &str, default: &str) -> String {
    env.get(field)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Optional `MAX_TICKS` bound for the periodic binaries. Unset runs forever.
pub fn max_ticks(env: &dyn Env) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = env.get("MAX_TICKS").filter(|s| !s.trim().is_empty()) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err(ConfigError {
            field: "MAX_TICKS",
            message: format!("expected a positive integer, got {:?}", raw),
        }),
    }
}

/// A secret given either inline as `FIELD` or as a path in `FIELD_FILE`
/// (for mounted secrets). The inline value wins.
pub fn require_secret(env: &dyn Env, field: &'static str) -> Result<String, ConfigError> {
    if let Ok(v) = require_env(env, field) {
        return Ok(v);
    }
    let file_key = format!("{}_FILE", field);
    let Some(path) = env.get(&file_key).filter(|p| !p.trim().is_empty()) else {
        return Err(ConfigError {
            field,
            message: format!("Required: set {} or {}", field, file_key),
        });
    };
    let raw = std::fs::read_to_string(path.trim()).map_err(|e| ConfigError {
        field,
        message: format!("Cannot read {}: {}", file_key, e),
    })?;
    let secret = raw.trim().to_string();
    if secret.is_empty() {
        return Err(ConfigError {
            field,
            message: format!("{} points at an empty file", file_key),
        });
    }
    Ok(secret)
}

/// Required path to a file that must exist at startup.
pub fn require_existing_file(env: &dyn Env, field: &'static str) -> Result<PathBuf, ConfigError> {
    let path = PathBuf::from(require_env(env, field)?);
    if !path.is_file() {
        return Err(ConfigError {
            field,
            message: format!("{} is not a readable file", path.display()),
        });
    }
    Ok(path)
}

// ============================================================================
// Logging
// ============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }

    pub fn from_env(env: &dyn Env) -> Self {
        Self::from_str(&env_or(env, "LOG_FORMAT", "pretty"))
    }
}

/// Install the global subscriber. `RUST_LOG` filters (default `info`).
pub fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer(format, std::io::stdout))
        .init();
    tracing::debug!(about = %domain::about(), "tracing initialised");
}

fn fmt_layer<S, W>(format: LogFormat, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a> + 'static,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => Box::new(
            tfmt::layer()
                .json()
                .with_target(true)
                .with_timer(tfmt::time::SystemTime)
                .with_writer(writer),
        ),
        LogFormat::Pretty => Box::new(
            tfmt::layer()
                .pretty()
                .with_target(true)
                .with_writer(writer),
        ),
    }
}

// ============================================================================
// Output
// ============================================================================

/// Print a report as one JSON line on stdout.
pub fn print_report<T: Serialize>(report: &T) -> Result<(), String> {
    let line = serde_json::to_string(report).map_err(|e| format!("serialize report: {e}"))?;
    println!("{}", line);
    Ok(())
}

// ============================================================================
// Time Utilities
// ============================================================================

/// Convert SystemTime to RFC3339 string (seconds precision, UTC).
pub fn system_time_to_rfc3339(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}
