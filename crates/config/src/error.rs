//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading and validation
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file at {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write configuration file
    #[error("Failed to write config file at {path}: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML configuration
    #[error("Failed to parse TOML config: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Failed to serialize TOML configuration
    #[error("Failed to serialize TOML config: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Empty host in an `ip_info` section
    #[error("Invalid {section}.external_ip: must not be empty")]
    EmptyHost { section: &'static str },

    /// Zero port in an `ip_info` section
    #[error("Invalid {section}.external_port: must be non-zero")]
    InvalidPort { section: &'static str },

    /// Zero-length rate limit window
    #[error("Invalid admission.window_ms: must be positive")]
    InvalidWindow,

    /// Lookback count of zero
    #[error("Invalid admission.{name}: must be at least 1, got {value}")]
    InvalidLookback { name: &'static str, value: usize },

    /// Zero ban duration
    #[error("Invalid admission.ban_duration_ms: must be positive")]
    InvalidBanDuration,

    /// Empty heavy method list
    #[error("Invalid admission.heavy_methods: at least one method required")]
    NoHeavyMethods,

    /// Backoff bounds out of order
    #[error("Invalid dispatcher backoff: backoff_min_ms ({min}) > backoff_max_ms ({max})")]
    InvalidBackoff { min: u64, max: u64 },

    /// Zero upstream request timeout
    #[error("Invalid dispatcher.request_timeout_ms: must be positive")]
    InvalidRequestTimeout,

    /// Zero schedule interval
    #[error("Invalid schedule.{name}: must be positive")]
    InvalidInterval { name: &'static str },

    /// Invalid log level
    #[error("Invalid log level: {0}. Valid values: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    /// Invalid log format
    #[error("Invalid log format: {0}. Valid values: text, json, compact")]
    InvalidLogFormat(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
