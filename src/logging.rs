//! Tracing setup for applications built on this crate.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to the binary. [`init`] is a convenience for tools and tests:
//!
//! ```no_run
//! use daq_driver_dcam::logging::{self, LoggingConfig, OutputFormat};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LoggingConfig {
//!     level: "debug".into(),
//!     format: OutputFormat::Compact,
//!     ..Default::default()
//! };
//! logging::init(&config)?;
//! # Ok(())
//! # }
//! ```
//!
//! `RUST_LOG` takes precedence over the configured level.

use crate::error::{DcamError, Result};
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, coloured output for development.
    #[default]
    Pretty,
    /// Single-line output without colours.
    Compact,
    /// One JSON object per event.
    Json,
}

/// Logging options, usually read from the `[logging]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level name (trace, debug, info, warn, error).
    pub level: String,
    /// Output format.
    pub format: OutputFormat,
    /// Include span open/close events.
    pub span_events: bool,
    /// Include source file and line.
    pub file_and_line: bool,
    /// Include thread names.
    pub thread_names: bool,
    /// Colour output (pretty format only).
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: OutputFormat::Pretty,
            span_events: false,
            file_and_line: true,
            thread_names: true,
            ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Parsed level.
    pub fn parsed_level(&self) -> Result<Level> {
        parse_log_level(&self.level)
    }
}

/// Install a global subscriber.
///
/// Idempotent: if a subscriber is already installed (common in tests) this
/// returns `Ok(())`.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let level = config.parsed_level()?;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let result = match config.format {
        OutputFormat::Pretty => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .pretty()
                    .with_span_events(span_events)
                    .with_file(config.file_and_line)
                    .with_line_number(config.file_and_line)
                    .with_thread_names(config.thread_names)
                    .with_ansi(config.ansi)
                    .with_filter(env_filter),
            )
            .try_init(),
        OutputFormat::Compact => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .compact()
                    .with_span_events(span_events)
                    .with_file(config.file_and_line)
                    .with_line_number(config.file_and_line)
                    .with_thread_names(config.thread_names)
                    .with_ansi(false)
                    .with_filter(env_filter),
            )
            .try_init(),
        OutputFormat::Json => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(span_events)
                    .with_file(config.file_and_line)
                    .with_line_number(config.file_and_line)
                    .with_thread_names(config.thread_names)
                    .with_filter(env_filter),
            )
            .try_init(),
    };

    match result {
        Ok(()) => Ok(()),
        // another subscriber won the race, which is fine
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(DcamError::Config(format!("failed to initialize tracing: {e}"))),
    }
}

/// Parse a level name, case-insensitively.
pub(crate) fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(DcamError::Config(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("debug"), Ok(Level::DEBUG)));
        assert!(matches!(parse_log_level("info"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));
        assert!(matches!(parse_log_level("error"), Ok(Level::ERROR)));

        // Case insensitive
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("Debug"), Ok(Level::DEBUG)));

        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig {
            format: OutputFormat::Compact,
            ..Default::default()
        };
        assert!(init(&config).is_ok());
        assert!(init(&config).is_ok());
    }

    #[test]
    fn test_format_deserializes_lowercase() {
        let config: LoggingConfig = toml::from_str("format = \"json\"\nlevel = \"warn\"").unwrap();
        assert_eq!(config.format, OutputFormat::Json);
        assert!(matches!(config.parsed_level(), Ok(Level::WARN)));
        assert!(config.file_and_line);
    }
}
