//! Configuration for trellis-daemon

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Schedule daemon configuration
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Projection daemon configuration
    #[serde(default)]
    pub projection: ProjectionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Schedule daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Reconciliation interval in seconds
    #[serde(default = "default_schedule_interval")]
    pub interval_secs: u64,

    /// Trailing recency window in seconds: composite instances touched
    /// within it are reconciled each pass.
    #[serde(default = "default_window")]
    pub window_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_schedule_interval(),
            window_secs: default_window(),
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs as i64)
    }
}

/// Projection daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionConfig {
    /// Reconciliation interval in seconds
    #[serde(default = "default_projection_interval")]
    pub interval_secs: u64,

    /// Collection lock retry interval in milliseconds
    #[serde(default = "default_lock_interval_ms")]
    pub lock_interval_ms: u64,

    /// Collection lock retry attempts
    #[serde(default = "default_lock_attempts")]
    pub lock_attempts: u32,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_projection_interval(),
            lock_interval_ms: default_lock_interval_ms(),
            lock_attempts: default_lock_attempts(),
        }
    }
}

impl ProjectionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn lock_retry(&self) -> trellis_store::RetryPolicy {
        trellis_store::RetryPolicy {
            interval: Duration::from_millis(self.lock_interval_ms),
            max_attempts: self.lock_attempts,
            max_elapsed: Duration::from_millis(self.lock_interval_ms)
                * self.lock_attempts.saturating_add(1),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_schedule_interval() -> u64 {
    10
}

fn default_window() -> u64 {
    300
}

fn default_projection_interval() -> u64 {
    5
}

fn default_lock_interval_ms() -> u64 {
    200
}

fn default_lock_attempts() -> u32 {
    25
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration from an optional file, then environment
    /// variables with the TRELLIS_ prefix.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TRELLIS")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = DaemonConfig::default();
        assert_eq!(config.schedule.interval_secs, 10);
        assert_eq!(config.schedule.window_secs, 300);
        assert_eq!(config.projection.interval_secs, 5);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.schedule.window_secs, 300);
    }
}
