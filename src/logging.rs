//! Tracing setup.
//!
//! One subscriber for the whole process: stdout in the configured format,
//! optionally duplicated to a log file (JSON on both streams in that mode
//! so the file stays machine-parseable). `RUST_LOG` overrides the
//! configured level when set.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable format (default for development)
    #[default]
    Pretty,
    /// JSON format (best for log aggregation)
    Json,
    /// Compact single-line format
    Compact,
}

/// Logging configuration, merged from the TOML file and CLI overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format for stdout
    #[serde(default)]
    pub format: LogFormat,
    /// Optional log file path (logs to both file and stdout)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_file: None,
        }
    }
}

/// Initialize the global subscriber. Call once, before the control loop
/// starts.
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    if let Some(ref log_path) = config.log_file {
        let file = std::fs::File::create(log_path)?;
        let file = Mutex::new(file);

        let stdout_layer = tracing_subscriber::fmt::layer().json();
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .json();

        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .with(file_layer)
            .init();

        eprintln!("Logging to file: {log_path} (JSON on both stdout and file)");
    } else {
        match config.format {
            LogFormat::Json => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .json()
                    .init();
            }
            LogFormat::Compact => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .compact()
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_target(false)
                    .init();
            }
        }
    }

    Ok(())
}

/// Log target constants for component-specific filtering, e.g.
/// `RUST_LOG=flowguard::controller=debug`.
pub mod targets {
    /// Control-loop lifecycle and cycle decisions
    pub const CONTROLLER: &str = "flowguard::controller";
    /// Policy transitions (block/unblock edges)
    pub const POLICY: &str = "flowguard::policy";
    /// Rule installation/removal
    pub const RULES: &str = "flowguard::rules";
    /// Device sessions and RPC failures
    pub const SESSION: &str = "flowguard::session";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.log_file.is_none());
    }

    #[test]
    fn log_format_serde() {
        let json = serde_json::to_string(&LogFormat::Json).unwrap();
        assert_eq!(json, "\"json\"");

        let parsed: LogFormat = serde_json::from_str("\"compact\"").unwrap();
        assert_eq!(parsed, LogFormat::Compact);
    }
}
