//! Logging setup.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{ExporterError, Result};

/// Turns a `--loglevel` value into an `EnvFilter` directive.
///
/// Accepts tracing level names and the Python `logging` names deployments
/// already use (`WARNING`, `CRITICAL`, ...), case-insensitively. Values
/// containing `=` or `,` are passed through as full filter directives. Any
/// other bare word is rejected; `EnvFilter` would read it as a target.
pub fn filter_directive(log_level: &str) -> Result<String> {
    let level = log_level.trim();
    if level.contains('=') || level.contains(',') {
        return Ok(level.to_string());
    }

    let directive = match level.to_ascii_lowercase().as_str() {
        "trace" | "notset" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" | "critical" | "fatal" => "error",
        "off" => "off",
        _ => {
            return Err(ExporterError::Config(format!(
                "unknown log level {log_level:?}"
            )))
        }
    };
    Ok(directive.to_string())
}

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `log_level` (see
/// [`filter_directive`]) is the filter.
pub fn init_logging(log_level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let directive = filter_directive(log_level)?;
            EnvFilter::try_new(&directive).map_err(|e| {
                ExporterError::Config(format!("invalid log level {log_level:?}: {e}"))
            })?
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .compact()
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        )
        .try_init()
        .map_err(|e| ExporterError::Config(format!("failed to install logger: {e}")))
}
