//! Logging initialisation via tracing-subscriber.
//!
//! Call [`init`] once at startup, after config is resolved.

use std::path::Path;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::error::AppError;

/// Build the env filter for `level`.
///
/// `level` is an `EnvFilter` directive: a bare level (`"info"`) or a
/// per-target list (`"docquery=debug,reqwest=warn"`). The configured value
/// takes precedence; `RUST_LOG` is only consulted when it does not parse.
pub fn build_filter(level: &str) -> Result<EnvFilter, AppError> {
    if level.trim().is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    match EnvFilter::try_new(level) {
        Ok(filter) => Ok(filter),
        Err(level_err) => EnvFilter::try_from_default_env().map_err(|env_err| {
            AppError::Logger(format!(
                "invalid log level '{level}': {level_err}; RUST_LOG parse failed: {env_err}"
            ))
        }),
    }
}

/// Initialise the global tracing subscriber.
///
/// Logs go to `log_file` (append mode, created if missing) when given,
/// otherwise to stderr so stdout stays free for the process banner.
pub fn init(level: &str, log_file: Option<&Path>) -> Result<(), AppError> {
    let filter = build_filter(level)?;

    let writer = if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                AppError::Logger(format!(
                    "failed to open log file '{}': {e}",
                    path.display()
                ))
            })?;
        BoxMakeWriter::new(file)
    } else {
        BoxMakeWriter::new(std::io::stderr)
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(log_file.is_none())
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))?;

    Ok(())
}
