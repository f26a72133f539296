//! Tracing integration for structured logging.
//!
//! Both binaries configure the subscriber exactly once at start-up. The
//! agent must never log to stdout because stdout carries tunnel frames, so
//! every writer here is stderr or a file.

use std::path::Path;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{Error, Result};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

/// Map a `-v` count to a level name.
///
/// 0 = warn (the status line owns the terminal), 1 = info, 2 = debug, 3+ = trace.
pub fn level_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Initialize the logging system.
///
/// `RUST_LOG` overrides the verbosity-derived filter when set.
///
/// ```ignore
/// use shtun_core::logging::{init_logging, LogFormat};
///
/// init_logging(1, None, LogFormat::Text).unwrap();
/// ```
pub fn init_logging(verbosity: u8, log_file: Option<&Path>, format: LogFormat) -> Result<()> {
    let level = level_for_verbosity(verbosity);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "shtun_core={level},shtun_client={level},shtun_agent={level},shtun={level},tunnel_agent={level}"
        ))
    });
    let detailed = verbosity >= 2;

    let registry = tracing_subscriber::registry().with(filter);
    let result = match (log_file, format) {
        (None, LogFormat::Text) => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(detailed)
                    .with_file(detailed)
                    .with_line_number(detailed),
            )
            .try_init(),
        (None, LogFormat::Json) => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        (Some(path), LogFormat::Text) => {
            let file = open_log_file(path)?;
            registry
                .with(
                    fmt::layer()
                        .with_writer(file)
                        .with_ansi(false)
                        .with_target(true)
                        .with_file(detailed)
                        .with_line_number(detailed),
                )
                .try_init()
        }
        (Some(path), LogFormat::Json) => {
            let file = open_log_file(path)?;
            registry
                .with(fmt::layer().json().with_writer(file))
                .try_init()
        }
    };

    result.map_err(|e| Error::Io(std::io::Error::other(e.to_string())))
}

fn open_log_file(path: &Path) -> Result<std::sync::Mutex<std::fs::File>> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    Ok(std::sync::Mutex::new(file))
}

// =============================================================================
// Tests
// =============================================================================
