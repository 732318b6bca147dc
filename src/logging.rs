//! Logging setup on top of `tracing-subscriber`.
//!
//! The level comes from `[application] log_level` (or `--log-level`), and
//! `RUST_LOG` overrides both when set.
//!
//! # Example
//! ```no_run
//! use tiny_display::logging::{self, OutputFormat, TracingConfig};
//! use tracing::Level;
//!
//! # fn main() -> Result<(), String> {
//! logging::init(TracingConfig::new(Level::DEBUG).with_format(OutputFormat::Compact))?;
//! tracing::info!(port = "/dev/ttyACM0", "Link connected");
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::AppConfig;

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, coloured (interactive use).
    #[default]
    Pretty,
    /// One line per event, no colours (services, journald).
    Compact,
    /// JSON objects for log shippers.
    Json,
}

#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub level: Level,
    pub format: OutputFormat,
    pub with_file_and_line: bool,
    /// Only honoured by the pretty format.
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_file_and_line: false,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    pub fn from_app_config(config: &AppConfig) -> Result<Self, String> {
        Ok(Self {
            level: parse_log_level(&config.application.log_level)?,
            format: config.application.log_format,
            ..Default::default()
        })
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }

    pub fn with_file_and_line(mut self, enabled: bool) -> Self {
        self.with_file_and_line = enabled;
        self
    }
}

/// Installs the global subscriber.
///
/// Idempotent: if a subscriber is already installed (tests, embedding
/// applications) this returns `Ok(())`.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_to_filter_string(config.level)));

    let layer = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(config.with_ansi)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(false)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .or_else(|e| {
            if e.to_string().contains("a global default trace dispatcher has already been set") {
                Ok(())
            } else {
                Err(format!("Failed to initialize tracing: {}", e))
            }
        })
}

/// Parses `trace|debug|info|warn|error`, case-insensitively.
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )),
    }
}

fn level_to_filter_string(level: Level) -> String {
    level.as_str().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels() {
        assert_eq!(parse_log_level("trace"), Ok(Level::TRACE));
        assert_eq!(parse_log_level("WARN"), Ok(Level::WARN));
        assert_eq!(parse_log_level("Debug"), Ok(Level::DEBUG));
        assert!(parse_log_level("verbose").is_err());
        assert_eq!(level_to_filter_string(Level::ERROR), "error");
    }

    #[test]
    fn from_app_config() {
        let mut config = AppConfig::default();
        config.application.log_level = "debug".to_string();
        config.application.log_format = OutputFormat::Json;
        let tracing = TracingConfig::from_app_config(&config).unwrap();
        assert_eq!(tracing.level, Level::DEBUG);
        assert_eq!(tracing.format, OutputFormat::Json);

        config.application.log_level = "loud".to_string();
        assert!(TracingConfig::from_app_config(&config).is_err());
    }

    #[test]
    fn init_is_idempotent() {
        let config = TracingConfig::new(Level::WARN).with_format(OutputFormat::Compact);
        assert!(init(config.clone()).is_ok());
        assert!(init(config).is_ok());
    }
}
