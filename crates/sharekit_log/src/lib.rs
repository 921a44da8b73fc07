//! `sharekit_log` v1:
//! Process-wide `tracing` subscriber setup.
//!
//! `RUST_LOG` wins over the level passed by the caller.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Output layout of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumLogFormat {
    /// Compact human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl FromStr for EnumLogFormat {
    type Err = LogInitError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(LogInitError::InvalidFormat(value.to_string())),
        }
    }
}

impl fmt::Display for EnumLogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
        })
    }
}

#[derive(Debug, Error)]
pub enum LogInitError {
    #[error("Invalid log format {0:?} (expected text or json)")]
    InvalidFormat(String),

    #[error("Invalid log filter {level:?}: {reason}")]
    InvalidFilter { level: String, reason: String },

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInstalled(String),
}

/// `RUST_LOG` when set and valid, otherwise `level`.
pub fn build_filter(level: &str) -> Result<EnvFilter, LogInitError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| LogInitError::InvalidFilter {
            level: level.to_string(),
            reason: e.to_string(),
        })
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(level: &str, rule_format: EnumLogFormat) -> Result<(), LogInitError> {
    let filter = build_filter(level)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let res_init = match rule_format {
        EnumLogFormat::Text => builder.compact().try_init(),
        EnumLogFormat::Json => builder.json().try_init(),
    };
    res_init.map_err(|e| LogInitError::AlreadyInstalled(e.to_string()))
}
