//! Listener settings for the subscriber API and the metrics endpoint

use serde::Deserialize;

/// Downstream subscriber listener
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Bind address for subscriber WebSocket connections
    pub listen: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:2480".into(),
        }
    }
}

/// Metrics and health listener
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve the metrics endpoint at all
    pub enabled: bool,

    /// Bind address for `/healthz` and `/metrics`
    pub listen: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: "0.0.0.0:2481".into(),
        }
    }
}
