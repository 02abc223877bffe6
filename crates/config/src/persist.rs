//! Frame retention and cursor persistence settings

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Settings for the sequence cache and the cursor file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    /// Path to the embedded frame store; `None` selects the in-memory
    /// cache (nothing survives a restart)
    pub db_path: Option<PathBuf>,

    /// Path of the persisted upstream cursor
    pub cursor_file: PathBuf,

    /// Retention window in fractional hours
    pub hours: f64,

    /// Byte budget for retained frame bodies; 0 disables size eviction
    pub max_bytes: u64,

    /// Seconds between background eviction passes
    pub gc_period_secs: u64,

    /// Store map size in GiB (virtual reservation, durable cache only)
    pub map_size_gib: u64,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            cursor_file: PathBuf::from("./manifold-cursor"),
            hours: 24.0 * 7.0,
            max_bytes: 0,
            gc_period_secs: 5 * 60,
            map_size_gib: 64,
        }
    }
}

impl PersistConfig {
    /// Retention window as a `Duration`
    pub fn retention(&self) -> Duration {
        Duration::from_secs_f64(self.hours * 3600.0)
    }

    /// GC period as a `Duration`
    pub fn gc_period(&self) -> Duration {
        Duration::from_secs(self.gc_period_secs)
    }

    /// Store map size in bytes
    pub fn map_size(&self) -> usize {
        (self.map_size_gib as usize) * 1024 * 1024 * 1024
    }
}
