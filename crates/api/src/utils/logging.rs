use std::time::Duration;

use calsync_domain::CalSyncError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Output format for the service log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// `CALSYNC_LOG_FORMAT=json` selects JSON lines; anything else is human
    /// readable.
    pub fn from_env() -> Self {
        match std::env::var("CALSYNC_LOG_FORMAT") {
            Ok(value) if value.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info`
/// filter. Safe to call more than once; later calls are ignored.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let result = match format {
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Log the outcome of an operator or webhook operation with structured
/// fields.
///
/// `operation` is a stable identifier such as `"connections::sync"`; callers
/// must not put user data in it.
#[inline]
pub fn log_operation(operation: &str, elapsed: Duration, error: Option<&'static str>) {
    let duration_ms = elapsed.as_millis() as u64;

    match error {
        None => info!(operation, duration_ms, "operation_success"),
        Some(error) => warn!(operation, duration_ms, error, "operation_failure"),
    }
}

/// Stable label for a domain error, suitable for logs and error bodies.
#[inline]
pub fn error_label(error: &CalSyncError) -> &'static str {
    error.label()
}
