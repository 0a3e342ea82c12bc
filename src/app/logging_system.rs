use super::config::{LogFormat, LogLevel};
use std::sync::{Mutex, Once};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Targets that are too chatty at the relay's own level.
const QUIET_TARGETS: &[(&str, LogLevel)] = &[
    ("hyper", LogLevel::Warn),
    ("hyper_util", LogLevel::Warn),
    ("reqwest", LogLevel::Warn),
    ("h2", LogLevel::Warn),
    ("sled", LogLevel::Warn),
];

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {details}")]
    InvalidFilter { filter: String, details: String },
    #[error("Failed to install the global subscriber: {0}")]
    InstallFailed(String),
}

/// Filter string for the given level, with the quiet directives appended.
///
/// `RUST_LOG` directives, when present, are appended last so they win.
pub fn build_filter_string(level: LogLevel) -> String {
    let mut parts = Vec::with_capacity(QUIET_TARGETS.len() + 2);
    parts.push(level.as_str().to_string());

    for (target, quiet) in QUIET_TARGETS {
        parts.push(format!("{target}={}", quiet.as_str()));
    }

    if let Ok(extra) = std::env::var("RUST_LOG")
        && !extra.trim().is_empty()
    {
        parts.push(extra);
    }

    parts.join(",")
}

fn install(level: LogLevel, format: LogFormat) -> Result<(), LoggingError> {
    let filter = build_filter_string(level);
    let env_filter = EnvFilter::try_new(&filter).map_err(|e| LoggingError::InvalidFilter {
        filter: filter.clone(),
        details: e.to_string(),
    })?;

    let registry = tracing_subscriber::registry().with(env_filter);

    // stdout may carry piped data in some setups, so logs go to stderr
    let result = match format {
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    result.map_err(|e| LoggingError::InstallFailed(e.to_string()))
}

/// Install the global subscriber once; later calls report the first outcome.
pub fn setup_logging_safe(level: LogLevel, format: LogFormat) -> Result<(), LoggingError> {
    static INIT: Once = Once::new();
    static INIT_RESULT: Mutex<Option<String>> = Mutex::new(None);

    INIT.call_once(|| {
        if let Err(e) = install(level, format)
            && let Ok(mut slot) = INIT_RESULT.lock()
        {
            *slot = Some(e.to_string());
        }
    });

    match INIT_RESULT.lock() {
        Ok(slot) => match slot.as_ref() {
            Some(message) => Err(LoggingError::InstallFailed(message.clone())),
            None => Ok(()),
        },
        Err(_) => Err(LoggingError::InstallFailed(
            "logging state poisoned".to_string(),
        )),
    }
}
