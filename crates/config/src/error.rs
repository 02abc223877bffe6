//! Error types for configuration loading

use thiserror::Error;

/// Errors that can occur loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Could not read the configuration file
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The parsed configuration is semantically invalid
    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
