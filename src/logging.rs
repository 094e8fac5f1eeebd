use std::sync::OnceLock;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use crate::Result;
use crate::config::EngineConfig;

static SUBSCRIBER: OnceLock<std::result::Result<(), String>> = OnceLock::new();

#[derive(Debug, Serialize)]
pub struct LogEvent<'a> {
    pub filename: &'a str,
    pub timestamp: DateTime<Utc>,
    pub component: &'a str,
    pub function: &'a str,
    pub section: &'a str,
    pub line_num: u32,
    pub error: Option<&'a str>,
    pub message: &'a str,
}

/// Initialize a tracing subscriber emitting JSON records, filtered by `RUST_LOG`
/// or `info` when unset.
///
/// Calling this function multiple times is safe; only the first invocation installs the
/// subscriber.
pub fn init_logging() -> Result<()> {
    init_logging_with(&EngineConfig::default())
}

/// Same as [`init_logging`], falling back to `config.log_filter`.
pub fn init_logging_with(config: &EngineConfig) -> Result<()> {
    let result = SUBSCRIBER.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.log_filter))
            .map_err(|error| error.to_string())?;
        fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_target(false)
            .try_init()
            .map_err(|error| error.to_string())?;

        Ok(())
    });

    match result {
        Ok(()) => Ok(()),
        Err(message) => Err(anyhow!(message.clone())),
    }
}

/// Emit a structured log event. Events carrying an error are logged at `warn`.
pub fn log_event(
    filename: &str,
    component: &str,
    function: &str,
    section: &str,
    line_num: u32,
    message: &str,
    error: Option<&str>,
) {
    let event = LogEvent {
        filename,
        timestamp: Utc::now(),
        component,
        function,
        section,
        line_num,
        error,
        message,
    };

    match (serde_json::to_string(&event), error.is_some()) {
        (Ok(serialized), false) => info!(target: "featureflow", json = %serialized),
        (Ok(serialized), true) => warn!(target: "featureflow", json = %serialized),
        (Err(_), false) => info!(target: "featureflow", message),
        (Err(_), true) => warn!(target: "featureflow", message, error),
    }
}
