//! Manifold Configuration
//!
//! TOML-based configuration loading with sensible defaults. A minimal
//! config only needs the upstream host - everything else has a working
//! default.
//!
//! # Example Minimal Config
//!
//! ```toml
//! [upstream]
//! host = "firehose.example.com"
//! ```
//!
//! # Example Full Config
//!
//! ```toml
//! [upstream]
//! host = "firehose.example.com"
//! insecure = false
//! grace_secs = 30
//!
//! [persist]
//! db_path = "/var/lib/manifold/frames"
//! cursor_file = "/var/lib/manifold/cursor"
//! hours = 168.0
//! max_bytes = 10000000000
//!
//! [api]
//! listen = "0.0.0.0:2480"
//!
//! [metrics]
//! listen = "0.0.0.0:2481"
//!
//! [subscriber]
//! queue_frames = 1024
//! queue_bytes = 8388608
//! ```

mod api;
mod error;
mod log;
mod persist;
mod subscriber;
mod upstream;

use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

pub use api::{ApiConfig, MetricsConfig};
pub use error::{ConfigError, Result};
pub use log::LogConfig;
pub use persist::PersistConfig;
pub use subscriber::SubscriberConfig;
pub use upstream::UpstreamConfig;

/// Main configuration structure
///
/// All sections are optional with sensible defaults; only the upstream
/// host is required.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upstream firehose connection
    pub upstream: UpstreamConfig,

    /// Frame retention and cursor persistence
    pub persist: PersistConfig,

    /// Downstream subscriber listener
    pub api: ApiConfig,

    /// Metrics and health listener
    pub metrics: MetricsConfig,

    /// Per-subscriber delivery limits
    pub subscriber: SubscriberConfig,

    /// Logging
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML,
    /// or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_str(&contents)
    }

    /// Validate the configuration
    ///
    /// Called automatically when parsing; public so callers that apply
    /// CLI or environment overrides can re-validate the result.
    pub fn validate(&self) -> Result<()> {
        if self.upstream.host.is_empty() {
            return Err(ConfigError::Validation(
                "upstream.host is required".into(),
            ));
        }
        if self.upstream.host.contains("://") {
            return Err(ConfigError::Validation(format!(
                "upstream.host must be a bare host, not a URL: {}",
                self.upstream.host
            )));
        }
        if !self.persist.hours.is_finite() || self.persist.hours <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "persist.hours must be a positive number, got {}",
                self.persist.hours
            )));
        }
        if self.subscriber.queue_frames == 0 {
            return Err(ConfigError::Validation(
                "subscriber.queue_frames must be at least 1".into(),
            ));
        }
        if self.api.listen == self.metrics.listen && self.metrics.enabled {
            return Err(ConfigError::Validation(format!(
                "api.listen and metrics.listen conflict on {}",
                self.api.listen
            )));
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}
